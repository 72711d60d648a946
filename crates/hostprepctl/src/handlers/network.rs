//! NIC selection, ifupdown configuration and stable renames

use hostprep_common::command_exec::CommandSpec;
use hostprep_common::identity::{HardwareIdentity, RenamePlan, Role};
use hostprep_common::netif::InterfaceInfo;
use hostprep_common::{StepContext, StepError};
use std::path::Path;
use tracing::info;

use super::required;

const INTERFACES_PATH: &str = "/etc/network/interfaces.d/hostprep";
const LINK_DIR: &str = "/etc/systemd/network";

fn describe(iface: &InterfaceInfo) -> String {
    format!(
        "{:<12} pci {:<14} mac {}",
        iface.name,
        iface.pci_address.as_deref().unwrap_or("-"),
        iface.mac_address.as_deref().unwrap_or("-")
    )
}

pub(super) fn select_nics(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let mut available = ctx.inventory.physical_interfaces()?;
    if available.len() < Role::ALL.len() {
        return Err(StepError::precondition(format!(
            "need {} physical interfaces, found {}",
            Role::ALL.len(),
            available.len()
        )));
    }

    for role in Role::ALL {
        let preferred = ctx
            .config
            .preferred_nic(role)
            .and_then(|name| available.iter().position(|i| i.name == name.trim()));

        let pick = match preferred {
            Some(idx)
                if ctx.prompter.confirm(&format!(
                    "Use {} for the {} role?",
                    available[idx].name,
                    role.label()
                ))? =>
            {
                idx
            }
            _ => {
                let options: Vec<String> = available.iter().map(describe).collect();
                ctx.prompter
                    .choose(&format!("Interface for the {} role:", role.label()), &options)?
            }
        };

        // A device can serve one role only.
        let iface = available.remove(pick);
        ctx.resolver().select(role, &iface);
    }
    ctx.resolver().check_unique()?;
    Ok(())
}

fn selected_roles(ctx: &StepContext<'_>) -> Result<Vec<(Role, HardwareIdentity)>, StepError> {
    Role::ALL
        .iter()
        .map(|role| {
            ctx.state
                .identities
                .get(*role)
                .cloned()
                .map(|ident| (*role, ident))
                .ok_or_else(|| {
                    StepError::precondition(format!(
                        "no interface selected for the {} role; run 02_nic_select first",
                        role.label()
                    ))
                })
        })
        .collect()
}

/// ifupdown stanzas for the role aliases and the VM bridge
pub fn render_interfaces(mgt: &str, cluster: &str, host: &str, bridge: &str) -> String {
    format!(
        "# Managed by hostprep\n\
         auto {mgt}\n\
         iface {mgt} inet dhcp\n\
         \n\
         auto {cluster}\n\
         iface {cluster} inet manual\n\
         \n\
         auto {host}\n\
         iface {host} inet manual\n\
         \n\
         auto {bridge}\n\
         iface {bridge} inet manual\n\
         \tbridge_ports {host}\n\
         \tbridge_stp off\n\
         \tbridge_fd 0\n"
    )
}

pub(super) fn configure_ifupdown(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    selected_roles(ctx)?;
    let bridge = required(ctx, "BRIDGE_NAME")?;
    let content = render_interfaces(
        ctx.config.alias(Role::Management),
        ctx.config.alias(Role::Cluster),
        ctx.config.alias(Role::HostAccess),
        bridge,
    );

    ctx.run(
        CommandSpec::new("apt-get").args(["install", "-y", "--no-install-recommends", "ifupdown", "bridge-utils"]),
    )?;
    ctx.write_file(Path::new(INTERFACES_PATH), &content)?;
    info!("ifupdown configured for bridge {}", bridge);
    Ok(())
}

/// systemd .link file pinning `alias` to a device across reboots
pub fn render_link_file(ident: &HardwareIdentity, alias: &str) -> Option<String> {
    // A bridge inherits its first port's MAC, so match on the bus path when known.
    let matcher = match (&ident.pci_address, &ident.mac_address) {
        (Some(pci), _) => format!("Path=pci-{}", pci),
        (None, Some(mac)) => format!("MACAddress={}\nType=ether", mac),
        (None, None) => return None,
    };
    Some(format!(
        "# Managed by hostprep\n[Match]\n{}\n\n[Link]\nName={}\n",
        matcher, alias
    ))
}

pub(super) fn rename_nics(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let roles = selected_roles(ctx)?;
    let plan = Role::ALL
        .iter()
        .fold(RenamePlan::new(), |plan, role| plan.bind(*role, ctx.config.alias(*role)));

    if ctx.dry_run {
        // No renames and no audit records in dry mode.
        let resolver = ctx.resolver();
        resolver.check_unique()?;
        let mut preview = Vec::new();
        for (role, alias) in plan.bindings() {
            let current = resolver.resolve(*role)?;
            preview.push(format!("[dry-run] {} role: {} -> {}", role.label(), current, alias));
        }
        drop(resolver);
        for line in &preview {
            ctx.prompter.notify(line);
        }
        return Ok(());
    }

    ctx.resolver().apply_rename_plan(&plan)?;

    for (role, ident) in &roles {
        let alias = ctx.config.alias(*role);
        if let Some(content) = render_link_file(ident, alias) {
            let path = Path::new(LINK_DIR).join(format!("10-hostprep-{}.link", alias));
            ctx.write_file(&path, &content)?;
        }
    }
    ctx.run(CommandSpec::new("update-initramfs").arg("-u"))?;
    Ok(())
}
