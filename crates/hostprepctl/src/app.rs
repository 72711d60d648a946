//! Wiring between the CLI and the engine
//!
//! Config is reloaded for every action, so edits made from the menu (or by
//! hand in another terminal) take effect on the next action.

use anyhow::{bail, Context, Result};
use hostprep_common::audit::ConflictLog;
use hostprep_common::auto_continue::{AutoContinueController, AutoContinueSummary};
use hostprep_common::command_exec::{CommandRunner, SystemCommandRunner};
use hostprep_common::config::{Config, KEY_DRY_RUN};
use hostprep_common::netif::{InterfaceInventory, SysfsInventory};
use hostprep_common::prompt::Prompter;
use hostprep_common::reboot::SystemRebooter;
use hostprep_common::state::{ExecutionState, ExecutionStateStore};
use hostprep_common::{RunResult, StepRegistry, StepRunner};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::handlers;
use crate::status::{self, StatusReport};
use crate::validate::{ValidationReport, Validator};

pub struct App {
    config_path: PathBuf,
    state_dir: PathBuf,
    force_dry_run: bool,
    require_root: bool,
    registry: StepRegistry,
}

impl App {
    pub fn new(config_path: PathBuf, state_dir: PathBuf, force_dry_run: bool) -> Result<Self> {
        let registry = handlers::registry().context("building step catalog")?;
        Ok(Self {
            config_path,
            state_dir,
            force_dry_run,
            require_root: true,
            registry,
        })
    }

    /// Let real runs proceed without root, for hosts where privileges are
    /// granted some other way (capabilities, a wrapper)
    pub fn without_root_check(mut self) -> Self {
        self.require_root = false;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Fresh config from disk plus command-line overrides
    pub fn load_config(&self) -> Config {
        let mut config = Config::load(&self.config_path);
        if self.force_dry_run {
            config.set_override(KEY_DRY_RUN, "yes");
        }
        config
    }

    pub fn store(&self) -> ExecutionStateStore {
        ExecutionStateStore::in_dir(&self.state_dir)
    }

    pub fn conflicts(&self) -> ConflictLog {
        ConflictLog::in_dir(&self.state_dir)
    }

    /// Real runs change the host; refuse them without root
    fn ensure_privileges(&self, config: &Config) -> Result<()> {
        if self.require_root && !config.dry_run() && !is_root() {
            bail!("hostprepctl must run as root to change the host (use --dry-run to preview)");
        }
        Ok(())
    }

    /// Run `f` with a runner wired to the real system
    fn with_runner<T>(
        &self,
        config: &Config,
        f: impl FnOnce(&StepRunner<'_>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_privileges(config)?;
        let store = self.store();
        let conflicts = self.conflicts();
        let commands = SystemCommandRunner::new(config.dry_run());
        let inventory = SysfsInventory::new(&commands);
        let rebooter = SystemRebooter;
        let runner = StepRunner::new(
            &self.registry,
            &store,
            &commands,
            &inventory,
            &conflicts,
            &rebooter,
        );
        f(&runner)
    }

    pub fn run_all(&self, prompter: &mut dyn Prompter) -> Result<AutoContinueSummary> {
        let config = self.load_config();
        info!("run-all requested (dry_run={})", config.dry_run());
        self.with_runner(&config, |runner| {
            let summary = AutoContinueController::new(runner).run_all(&config, prompter)?;
            print_summary(&summary, self.registry.len());
            Ok(summary)
        })
    }

    pub fn run_step(&self, selector: &str, prompter: &mut dyn Prompter) -> Result<RunResult> {
        let config = self.load_config();
        let index = self.registry.parse_selector(selector)?;
        self.with_runner(&config, |runner| {
            let store = runner.store();
            let mut state = store.load();
            let result = runner.run(index, &config, &mut state, prompter)?;
            if let Some(step) = self.registry.get(index) {
                print_result(step.id.as_str(), &result);
            }
            Ok(result)
        })
    }

    pub fn status(&self) -> StatusReport {
        let config = self.load_config();
        let store = self.store();
        StatusReport::build(
            &self.registry,
            &store,
            &store.load(),
            &config,
            &self.conflicts(),
        )
    }

    pub fn print_steps(&self) {
        let config = self.load_config();
        let resume = self.store().resume_point(&self.registry);
        status::print_steps(&self.registry, resume, config.product_version());
    }

    pub fn validate(&self) -> ValidationReport {
        let config = self.load_config();
        let commands = SystemCommandRunner::new(config.dry_run());
        let inventory = SysfsInventory::new(&commands);
        self.validate_with(&config, &self.store().load(), &commands, &inventory)
    }

    pub fn validate_with(
        &self,
        config: &Config,
        state: &ExecutionState,
        commands: &dyn CommandRunner,
        inventory: &dyn InterfaceInventory,
    ) -> ValidationReport {
        let conflicts = self.conflicts();
        Validator {
            registry: &self.registry,
            config,
            commands,
            inventory,
            conflicts: &conflicts,
        }
        .run(state)
    }

    pub fn reset_progress(&self) -> Result<()> {
        self.store()
            .reset_progress()
            .context("resetting progress")?;
        Ok(())
    }

    /// Apply `KEY=VALUE` assignments and save
    pub fn configure(&self, assignments: &[String]) -> Result<Config> {
        // Edits go to the file, not to the overridden view.
        let mut config = Config::load(&self.config_path);
        for assignment in assignments {
            let (key, value) = assignment
                .split_once('=')
                .with_context(|| format!("expected KEY=VALUE, got {:?}", assignment))?;
            config.set(key.trim(), value)?;
        }
        if !assignments.is_empty() {
            config.save()?;
            info!("configuration saved to {}", config.path().display());
        }
        Ok(self.load_config())
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn print_result(id: &str, result: &RunResult) {
    match result {
        RunResult::Done => println!("{} {}", "[DONE]".green(), id),
        RunResult::Canceled => println!("{} {}", "[CANCELED]".yellow(), id),
        RunResult::Failed(detail) => println!(
            "{} {} ({}, code {}): {}",
            "[FAILED]".red(),
            id,
            detail.kind.as_str(),
            detail.code,
            detail.message
        ),
    }
}

fn print_summary(summary: &AutoContinueSummary, total: usize) {
    if summary.already_complete(total) {
        println!("{}", "All steps are already complete.".green());
        return;
    }
    for id in &summary.completed {
        print_result(id.as_str(), &RunResult::Done);
    }
    match &summary.stopped {
        Some((id, result)) => {
            print_result(id.as_str(), result);
            println!("Stopped. Run again to continue from {}.", id);
        }
        None => println!("{}", "All steps complete.".green()),
    }
}

/// Process exit code for a run-all summary
pub fn summary_exit_code(summary: &AutoContinueSummary) -> i32 {
    summary
        .stopped
        .as_ref()
        .map(|(_, result)| result.code())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostprep_common::StepId;
    use tempfile::TempDir;

    fn app(dir: &TempDir, dry_run: bool) -> App {
        App::new(
            dir.path().join("hostprep.conf"),
            dir.path().join("state"),
            dry_run,
        )
        .unwrap()
    }

    #[test]
    fn test_dry_run_flag_overrides_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hostprep.conf"), "DRY_RUN=no\n").unwrap();
        assert!(app(&dir, true).load_config().dry_run());
        assert!(!app(&dir, false).load_config().dry_run());
    }

    #[test]
    fn test_configure_persists_and_rejects_bad_values() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true);
        let config = app
            .configure(&["HOSTNAME=hv07".to_string(), "VM_VCPUS=4".to_string()])
            .unwrap();
        assert_eq!(config.get("HOSTNAME"), "hv07");
        assert_eq!(app.load_config().get("VM_VCPUS"), "4");

        assert!(app.configure(&["VM_VCPUS=many".to_string()]).is_err());
        assert!(app.configure(&["novalue".to_string()]).is_err());
        // The dry-run override is never written back.
        let content = std::fs::read_to_string(dir.path().join("hostprep.conf")).unwrap();
        assert!(!content.contains("DRY_RUN"));
    }

    #[test]
    fn test_reset_progress_keeps_identities() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true);
        let store = app.store();
        let mut state = store.load();
        state
            .identities
            .get_mut(hostprep_common::identity::Role::Management)
            .selected_name = Some("eno1".into());
        store.save(&mut state, StepId::NicSelect).unwrap();

        app.reset_progress().unwrap();
        let status = app.status();
        assert_eq!(status.completed_steps, 0);
        assert_eq!(status.roles[0].selected.as_deref(), Some("eno1"));
    }

    #[test]
    fn test_summary_exit_code() {
        let summary = AutoContinueSummary {
            started_at: 0,
            completed: vec![StepId::Hostname],
            stopped: Some((StepId::NicSelect, RunResult::Canceled)),
        };
        assert_eq!(summary_exit_code(&summary), 2);
    }
}
