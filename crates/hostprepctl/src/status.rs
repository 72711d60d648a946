//! `status` and `steps` output

use hostprep_common::audit::ConflictLog;
use hostprep_common::config::Config;
use hostprep_common::identity::Role;
use hostprep_common::state::{ExecutionState, ExecutionStateStore};
use hostprep_common::StepRegistry;
use owo_colors::OwoColorize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RoleStatus {
    pub role: String,
    pub alias: String,
    pub selected: Option<String>,
    pub pci_address: Option<String>,
    pub mac_address: Option<String>,
    pub effective_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state_file: String,
    pub config_file: String,
    pub product_version: String,
    pub dry_run: bool,
    pub last_completed_step: Option<String>,
    pub last_run_time: Option<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub next_step: Option<String>,
    pub roles: Vec<RoleStatus>,
    pub rename_conflicts: usize,
}

impl StatusReport {
    pub fn build(
        registry: &StepRegistry,
        store: &ExecutionStateStore,
        state: &ExecutionState,
        config: &Config,
        conflicts: &ConflictLog,
    ) -> Self {
        let resume = state.resume_point(registry);
        let roles = Role::ALL
            .iter()
            .map(|role| {
                let ident = state.identities.get(*role).cloned().unwrap_or_default();
                RoleStatus {
                    role: role.label().to_string(),
                    alias: config.alias(*role).to_string(),
                    selected: ident.selected_name,
                    pci_address: ident.pci_address,
                    mac_address: ident.mac_address,
                    effective_name: ident.effective_name,
                }
            })
            .collect();

        Self {
            state_file: store.path().display().to_string(),
            config_file: config.path().display().to_string(),
            product_version: config.product_version().to_string(),
            dry_run: config.dry_run(),
            last_completed_step: state
                .last_completed_step
                .as_ref()
                .map(|s| s.as_str().to_string()),
            last_run_time: state.last_run_time.map(|t| t.to_rfc3339()),
            completed_steps: resume,
            total_steps: registry.len(),
            next_step: registry.get(resume).map(|d| d.id.to_string()),
            roles,
            rename_conflicts: conflicts.records().map(|r| r.len()).unwrap_or(0),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn print(&self) {
        println!("{}", "[STATE]".bold());
        println!("  State file:      {}", self.state_file);
        println!("  Config file:     {}", self.config_file);
        println!("  Product version: {}", self.product_version);
        if self.dry_run {
            println!("  Mode:            {}", "dry-run".yellow());
        }
        println!(
            "  Progress:        {}/{} steps",
            self.completed_steps, self.total_steps
        );
        println!(
            "  Last completed:  {} ({})",
            self.last_completed_step.as_deref().unwrap_or("none"),
            self.last_run_time.as_deref().unwrap_or("never")
        );
        match &self.next_step {
            Some(next) => println!("  Next step:       {}", next.cyan()),
            None => println!("  Next step:       {}", "all steps complete".green()),
        }

        println!();
        println!("{}", "[NETWORK ROLES]".bold());
        for role in &self.roles {
            match &role.selected {
                Some(selected) => println!(
                    "  {:<12} {:<10} now {:<10} alias {:<6} pci {} mac {}",
                    role.role,
                    selected,
                    role.effective_name.as_deref().unwrap_or("-"),
                    role.alias,
                    role.pci_address.as_deref().unwrap_or("-"),
                    role.mac_address.as_deref().unwrap_or("-"),
                ),
                None => println!("  {:<12} {}", role.role, "not selected".dimmed()),
            }
        }
        if self.rename_conflicts > 0 {
            println!();
            println!(
                "  {} alias conflict(s) recorded, see rename_conflicts.jsonl",
                self.rename_conflicts
            );
        }
    }
}

/// Catalog listing with completion marks
pub fn print_steps(registry: &StepRegistry, resume_point: usize, product_version: &str) {
    for (i, step) in registry.iter().enumerate() {
        let mark = if i < resume_point {
            "[x]".green().to_string()
        } else if i == resume_point {
            "[>]".cyan().to_string()
        } else {
            "[ ]".to_string()
        };
        let mut notes = Vec::new();
        if step.destructive {
            notes.push("destructive".red().to_string());
        }
        if step.handler.is_versioned() {
            notes.push(format!("variant for {}", product_version));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("  ({})", notes.join(", "))
        };
        println!("{} {:>2}. {:<20} {}{}", mark, i + 1, step.id, step.display_name, notes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostprep_common::identity::HardwareIdentity;
    use hostprep_common::StepId;
    use tempfile::TempDir;

    #[test]
    fn test_report_json() {
        let dir = TempDir::new().unwrap();
        let registry = crate::handlers::registry().unwrap();
        let store = ExecutionStateStore::in_dir(dir.path());
        let conflicts = ConflictLog::in_dir(dir.path());
        let config = Config::from_content(&dir.path().join("c.conf"), "MGT_ALIAS=lan0\n");

        let mut state = store.load();
        state.identities.set(
            Role::Management,
            HardwareIdentity {
                selected_name: Some("enp3s0".into()),
                pci_address: Some("0000:03:00.0".into()),
                mac_address: None,
                effective_name: Some("lan0".into()),
            },
        );
        store.save(&mut state, StepId::NicRename).unwrap();

        let report = StatusReport::build(&registry, &store, &store.load(), &config, &conflicts);
        assert_eq!(report.completed_steps, 4);
        assert_eq!(report.next_step.as_deref(), Some("05_kvm_packages"));
        assert_eq!(report.roles[0].alias, "lan0");
        assert_eq!(report.roles[1].selected, None);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["last_completed_step"], "04_nic_rename");
        assert_eq!(json["roles"][0]["effective_name"], "lan0");
    }
}
