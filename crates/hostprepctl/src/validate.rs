//! Installation validation
//!
//! Read-only: every probe is marked read-only, so validation gives real
//! answers in dry mode too.

use console::style;
use hostprep_common::audit::ConflictLog;
use hostprep_common::command_exec::{CommandRunner, CommandSpec};
use hostprep_common::config::Config;
use hostprep_common::identity::{IdentityResolver, Role};
use hostprep_common::netif::InterfaceInventory;
use hostprep_common::state::ExecutionState;
use hostprep_common::StepRegistry;
use serde::Serialize;

use crate::handlers::{info_field, virsh_query};

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    pub fn print(&self) {
        for check in &self.checks {
            let mark = if check.passed {
                style("PASS").green().bold()
            } else {
                style("FAIL").red().bold()
            };
            println!("  [{}] {:<28} {}", mark, check.name, style(&check.detail).dim());
        }
        println!();
        if self.passed() {
            println!("{}", style("Installation is valid.").green());
        } else {
            println!(
                "{}",
                style(format!("{} check(s) failed.", self.failures())).red()
            );
        }
    }
}

pub struct Validator<'a> {
    pub registry: &'a StepRegistry,
    pub config: &'a Config,
    pub commands: &'a dyn CommandRunner,
    pub inventory: &'a dyn InterfaceInventory,
    pub conflicts: &'a ConflictLog,
}

impl Validator<'_> {
    pub fn run(&self, state: &ExecutionState) -> ValidationReport {
        let mut report = ValidationReport::default();
        report.checks.push(self.check_progress(state));

        // Resolution never renames, but the resolver wants a mutable snapshot.
        let mut identities = state.identities.clone();
        let resolver = IdentityResolver::new(self.inventory, self.conflicts, &mut identities);
        for role in Role::ALL {
            let name = format!("{} NIC resolves", role.label());
            report.checks.push(match resolver.resolve(role) {
                Ok(iface) => CheckResult::new(name, true, iface),
                Err(e) => CheckResult::new(name, false, e.to_string()),
            });
        }
        report.checks.push(match resolver.check_unique() {
            Ok(()) => CheckResult::new("NIC roles are distinct", true, "no shared devices"),
            Err(e) => CheckResult::new("NIC roles are distinct", false, e.to_string()),
        });

        report.checks.push(self.check_libvirtd());
        report.checks.push(self.check_network());
        report.checks.push(self.check_pool());
        report.checks.push(self.check_vm());
        report
    }

    fn check_progress(&self, state: &ExecutionState) -> CheckResult {
        let done = state.resume_point(self.registry);
        let total = self.registry.len();
        let detail = match self.registry.get(done) {
            Some(next) => format!("{}/{} complete, next {}", done, total, next.id),
            None => format!("{}/{} complete", done, total),
        };
        CheckResult::new("all steps complete", done == total, detail)
    }

    fn check_libvirtd(&self) -> CheckResult {
        let result = self.commands.run(
            &CommandSpec::new("systemctl")
                .args(["is-active", "libvirtd"])
                .read_only(),
        );
        let state = result.stdout.trim();
        let detail = if state.is_empty() { "unknown" } else { state };
        CheckResult::new("libvirtd active", result.is_success(), detail)
    }

    fn check_network(&self) -> CheckResult {
        let name = self.config.get("LIBVIRT_NETWORK");
        let active = virsh_query(self.commands, &["net-info", name])
            .map(|out| info_field(&out, "Active") == Some("yes"));
        match active {
            Some(true) => CheckResult::new("libvirt network active", true, name),
            Some(false) => CheckResult::new("libvirt network active", false, format!("{} inactive", name)),
            None => CheckResult::new("libvirt network active", false, format!("{} not defined", name)),
        }
    }

    fn check_pool(&self) -> CheckResult {
        let pool = self.config.get("STORAGE_POOL");
        let state = virsh_query(self.commands, &["pool-info", pool])
            .and_then(|out| info_field(&out, "State").map(str::to_string));
        match state.as_deref() {
            Some("running") => CheckResult::new("storage pool active", true, pool),
            Some(other) => CheckResult::new("storage pool active", false, format!("{} is {}", pool, other)),
            None => CheckResult::new("storage pool active", false, format!("{} not defined", pool)),
        }
    }

    fn check_vm(&self) -> CheckResult {
        let vm = self.config.get("VM_NAME");
        match virsh_query(self.commands, &["domstate", vm]) {
            Some(out) if out.trim() == "running" => CheckResult::new("VM running", true, vm),
            Some(out) => CheckResult::new("VM running", false, format!("{} is {}", vm, out.trim())),
            None => CheckResult::new("VM running", false, format!("{} not defined", vm)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostprep_common::command_exec::RecordingRunner;
    use hostprep_common::identity::HardwareIdentity;
    use hostprep_common::netif::{FakeInventory, InterfaceInfo};
    use hostprep_common::StepId;
    use tempfile::TempDir;

    fn nic(name: &str, pci: &str) -> InterfaceInfo {
        InterfaceInfo::physical(name, Some(pci), None)
    }

    #[test]
    fn test_healthy_installation_passes() {
        let dir = TempDir::new().unwrap();
        let registry = crate::handlers::registry().unwrap();
        let config = Config::from_content(&dir.path().join("c.conf"), "");
        let conflicts = ConflictLog::in_dir(dir.path());
        let inventory = FakeInventory::new(vec![
            nic("mgt", "0000:03:00.0"),
            nic("clu", "0000:04:00.0"),
            nic("hst", "0000:05:00.0"),
        ]);
        let commands = RecordingRunner::new();
        commands.reply("systemctl is-active", 0, "active\n");
        commands.reply("virsh net-info", 0, "Name: host-bridge\nActive: yes\n");
        commands.reply("virsh pool-info", 0, "Name: vmpool\nState: running\n");
        commands.reply("virsh domstate", 0, "running\n");

        let mut state = ExecutionState::default();
        state.mark_completed(StepId::Finalize);
        for (role, iface) in Role::ALL.iter().zip(inventory.interfaces().unwrap()) {
            state.identities.set(*role, HardwareIdentity::from_interface(&iface));
        }

        let validator = Validator {
            registry: &registry,
            config: &config,
            commands: &commands,
            inventory: &inventory,
            conflicts: &conflicts,
        };
        let report = validator.run(&state);
        assert_eq!(report.checks.len(), 9);
        assert!(report.passed(), "{:?}", report.checks);
    }

    #[test]
    fn test_fresh_host_fails_checks() {
        let dir = TempDir::new().unwrap();
        let registry = crate::handlers::registry().unwrap();
        let config = Config::from_content(&dir.path().join("c.conf"), "");
        let conflicts = ConflictLog::in_dir(dir.path());
        let inventory = FakeInventory::new(Vec::new());
        let commands = RecordingRunner::new();
        commands.reply("systemctl is-active", 3, "inactive\n");
        commands.reply("virsh net-info", 1, "");
        commands.reply("virsh pool-info", 0, "State: inactive\n");
        commands.reply("virsh domstate", 0, "shut off\n");

        let validator = Validator {
            registry: &registry,
            config: &config,
            commands: &commands,
            inventory: &inventory,
            conflicts: &conflicts,
        };
        let report = validator.run(&ExecutionState::default());
        // Only the uniqueness check passes with nothing selected.
        assert_eq!(report.failures(), 8);
        assert!(commands.calls().iter().all(|c| !c.contains("start")));
    }
}
