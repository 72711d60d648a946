//! Hostname and the final summary

use hostprep_common::command_exec::CommandSpec;
use hostprep_common::identity::Role;
use hostprep_common::{StepContext, StepError};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::required;

const HOSTS_PATH: &str = "/etc/hosts";

/// Address Debian-style systems map the local hostname to
const LOCAL_HOST_ADDR: &str = "127.0.1.1";

fn valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// `/etc/hosts` with exactly one entry for this host
pub fn render_hosts(existing: &str, hostname: &str, domain: Option<&str>) -> String {
    let mut out = String::new();
    for line in existing.lines() {
        let first = line.split_whitespace().next();
        if first == Some(LOCAL_HOST_ADDR) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !out.lines().any(|l| l.split_whitespace().next() == Some("127.0.0.1")) {
        out.insert_str(0, "127.0.0.1\tlocalhost\n");
    }
    match domain {
        Some(domain) => out.push_str(&format!(
            "{}\t{}.{}\t{}\n",
            LOCAL_HOST_ADDR, hostname, domain, hostname
        )),
        None => out.push_str(&format!("{}\t{}\n", LOCAL_HOST_ADDR, hostname)),
    }
    out
}

pub(super) fn set_hostname(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let hostname = required(ctx, "HOSTNAME")?;
    if !valid_hostname(hostname) {
        return Err(StepError::precondition(format!(
            "{:?} is not a valid hostname",
            hostname
        )));
    }
    let domain = ctx.config.get_opt("HOST_DOMAIN").map(str::trim);

    ctx.run(CommandSpec::new("hostnamectl").args(["set-hostname", hostname]))?;

    let existing = fs::read_to_string(HOSTS_PATH).unwrap_or_default();
    let hosts = render_hosts(&existing, hostname, domain);
    if hosts != existing {
        ctx.write_file(Path::new(HOSTS_PATH), &hosts)?;
    }
    info!("hostname set to {}", hostname);
    Ok(())
}

pub(super) fn finalize(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let refreshed = ctx.resolver().refresh_effective_names();
    let mut lines = vec!["Provisioning summary:".to_string()];
    for (role, result) in &refreshed {
        match result {
            Ok(name) => lines.push(format!("  {:<12} {}", role.label(), name)),
            Err(e) => {
                warn!("{} role did not resolve: {}", role, e);
                lines.push(format!("  {:<12} unresolved ({})", role.label(), e));
            }
        }
    }
    if refreshed.is_empty() {
        lines.push(format!("  no NIC roles recorded (expected {})", Role::ALL.len()));
    }
    lines.push(format!("  {:<12} {}", "hostname", ctx.config.get("HOSTNAME")));
    lines.push(format!("  {:<12} {}", "vm", ctx.config.get("VM_NAME")));

    for line in &lines {
        ctx.prompter.notify(line);
    }
    info!("finalize: {} roles refreshed", refreshed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_hosts_replaces_local_entry() {
        let existing = "127.0.0.1\tlocalhost\n127.0.1.1\told.example old\n::1 ip6-localhost\n";
        let out = render_hosts(existing, "hv01", Some("lab"));
        assert_eq!(
            out,
            "127.0.0.1\tlocalhost\n::1 ip6-localhost\n127.0.1.1\thv01.lab\thv01\n"
        );
        // Rendering twice is stable.
        assert_eq!(render_hosts(&out, "hv01", Some("lab")), out);
    }

    #[test]
    fn test_render_hosts_from_empty() {
        assert_eq!(
            render_hosts("", "hv02", None),
            "127.0.0.1\tlocalhost\n127.0.1.1\thv02\n"
        );
    }

    #[test]
    fn test_valid_hostname() {
        assert!(valid_hostname("hv01"));
        assert!(valid_hostname("node-7"));
        assert!(!valid_hostname("-bad"));
        assert!(!valid_hostname("has space"));
        assert!(!valid_hostname("dot.ted"));
    }
}
