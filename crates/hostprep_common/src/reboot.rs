//! Reboot after configured steps
//!
//! Some steps (kernel tuning, NIC renames) only take effect after a reboot.
//! The coordinator is consulted strictly after the state file has been
//! written, so the next boot resumes from the right place.

use console::Term;
use std::cell::RefCell;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::steps::StepId;

/// Something that can reboot the machine
pub trait Rebooter {
    /// Only returns on failure for the real implementation
    fn reboot(&self) -> io::Result<()>;
}

/// `systemctl reboot`, then exit right away
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRebooter;

impl Rebooter for SystemRebooter {
    fn reboot(&self) -> io::Result<()> {
        info!("rebooting via systemctl");
        let status = Command::new("systemctl").arg("reboot").status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("systemctl reboot exited with {}", status),
            ));
        }
        // Nothing may run after the reboot has been requested.
        std::process::exit(0);
    }
}

/// Test rebooter; optionally snapshots a file at reboot time
#[derive(Debug, Default)]
pub struct RecordingRebooter {
    watch: Option<PathBuf>,
    requests: RefCell<Vec<Option<String>>>,
}

impl RecordingRebooter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the content of `path` whenever a reboot is requested
    pub fn watching(path: impl Into<PathBuf>) -> Self {
        Self {
            watch: Some(path.into()),
            requests: RefCell::default(),
        }
    }

    pub fn count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Watched file content at each request
    pub fn snapshots(&self) -> Vec<Option<String>> {
        self.requests.borrow().clone()
    }
}

impl Rebooter for RecordingRebooter {
    fn reboot(&self) -> io::Result<()> {
        let snapshot = self
            .watch
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok());
        self.requests.borrow_mut().push(snapshot);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootDecision {
    NotTriggered,
    /// Dry mode: would have rebooted
    Preview,
    Reboot,
}

#[derive(Debug, Clone)]
pub struct RebootCoordinator {
    auto_reboot: bool,
    triggers: Vec<StepId>,
    delay: Duration,
    dry_run: bool,
}

impl RebootCoordinator {
    pub fn new(auto_reboot: bool, triggers: Vec<StepId>, delay: Duration, dry_run: bool) -> Self {
        Self {
            auto_reboot,
            triggers,
            delay,
            dry_run,
        }
    }

    /// Build from config; unknown trigger ids are dropped with a warning
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        let mut triggers = Vec::new();
        for raw in config.reboot_triggers() {
            match StepId::parse(&raw) {
                Some(id) => {
                    if !triggers.contains(&id) {
                        triggers.push(id);
                    }
                }
                None => warn!("ignoring unknown step {:?} in reboot trigger list", raw),
            }
        }
        Self::new(config.auto_reboot(), triggers, config.reboot_delay(), dry_run)
    }

    pub fn triggers(&self) -> &[StepId] {
        &self.triggers
    }

    pub fn decide(&self, completed: StepId) -> RebootDecision {
        if !self.auto_reboot || !self.triggers.contains(&completed) {
            RebootDecision::NotTriggered
        } else if self.dry_run {
            RebootDecision::Preview
        } else {
            RebootDecision::Reboot
        }
    }

    /// Act on a completed step. Must only be called once its state is saved.
    pub fn after_step(&self, completed: StepId, rebooter: &dyn Rebooter) -> RebootDecision {
        let decision = self.decide(completed);
        match decision {
            RebootDecision::NotTriggered => {}
            RebootDecision::Preview => {
                info!("[dry-run] would reboot after {}", completed);
            }
            RebootDecision::Reboot => {
                info!("reboot triggered by {}", completed);
                self.countdown();
                if let Err(e) = rebooter.reboot() {
                    error!("reboot after {} failed: {}; reboot manually to continue", completed, e);
                }
            }
        }
        decision
    }

    fn countdown(&self) {
        let secs = self.delay.as_secs();
        if secs == 0 {
            return;
        }
        let term = Term::stderr();
        for remaining in (1..=secs).rev() {
            let _ = term.write_line(&format!("Rebooting in {}s...", remaining));
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(content: &str) -> Config {
        Config::from_content(Path::new("/nonexistent/hostprep.conf"), content)
    }

    #[test]
    fn test_multiple_triggers_and_unknown_ids() {
        let cfg = config("AUTO_REBOOT=yes\nREBOOT_AFTER_STEPS=\"04_nic_rename, 06_kernel_tuning bogus\"\n");
        let coordinator = RebootCoordinator::from_config(&cfg, false);
        assert_eq!(
            coordinator.triggers(),
            &[StepId::NicRename, StepId::KernelTuning]
        );
        assert_eq!(coordinator.decide(StepId::NicRename), RebootDecision::Reboot);
        assert_eq!(coordinator.decide(StepId::KernelTuning), RebootDecision::Reboot);
        assert_eq!(coordinator.decide(StepId::Hostname), RebootDecision::NotTriggered);
    }

    #[test]
    fn test_auto_reboot_off_never_triggers() {
        let cfg = config("AUTO_REBOOT=no\nREBOOT_AFTER_STEPS=04_nic_rename\n");
        let coordinator = RebootCoordinator::from_config(&cfg, false);
        assert_eq!(coordinator.decide(StepId::NicRename), RebootDecision::NotTriggered);
    }

    #[test]
    fn test_dry_mode_previews() {
        let rebooter = RecordingRebooter::new();
        let coordinator =
            RebootCoordinator::new(true, vec![StepId::NicRename], Duration::ZERO, true);
        assert_eq!(
            coordinator.after_step(StepId::NicRename, &rebooter),
            RebootDecision::Preview
        );
        assert_eq!(rebooter.count(), 0);
    }

    #[test]
    fn test_real_mode_calls_rebooter() {
        let rebooter = RecordingRebooter::new();
        let coordinator =
            RebootCoordinator::new(true, vec![StepId::NicRename], Duration::ZERO, false);
        assert_eq!(
            coordinator.after_step(StepId::NicRename, &rebooter),
            RebootDecision::Reboot
        );
        assert_eq!(coordinator.after_step(StepId::VmStart, &rebooter), RebootDecision::NotTriggered);
        assert_eq!(rebooter.count(), 1);
    }
}
