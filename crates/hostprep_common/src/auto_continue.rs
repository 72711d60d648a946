//! Run all remaining steps
//!
//! Starts from the persisted resume point and stops at the first step that
//! does not finish. A reboot in real mode ends the process in the middle;
//! running "all" again after boot picks up where the state file says.

use tracing::info;

use crate::config::Config;
use crate::error::ProvisionError;
use crate::prompt::Prompter;
use crate::runner::{RunResult, StepRunner};
use crate::steps::StepId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoContinueSummary {
    /// Index the run started from
    pub started_at: usize,
    pub completed: Vec<StepId>,
    /// The step that ended the run early, with its result
    pub stopped: Option<(StepId, RunResult)>,
}

impl AutoContinueSummary {
    /// Nothing was left to do when the run started
    pub fn already_complete(&self, total: usize) -> bool {
        self.started_at >= total
    }

    pub fn finished(&self) -> bool {
        self.stopped.is_none()
    }
}

pub struct AutoContinueController<'r, 'a> {
    runner: &'r StepRunner<'a>,
}

impl<'r, 'a> AutoContinueController<'r, 'a> {
    pub fn new(runner: &'r StepRunner<'a>) -> Self {
        Self { runner }
    }

    pub fn run_all(
        &self,
        config: &Config,
        prompter: &mut dyn Prompter,
    ) -> Result<AutoContinueSummary, ProvisionError> {
        let registry = self.runner.registry();
        let mut state = self.runner.store().load();
        let started_at = state.resume_point(registry);
        let mut summary = AutoContinueSummary {
            started_at,
            completed: Vec::new(),
            stopped: None,
        };

        if started_at >= registry.len() {
            info!("all {} steps already complete", registry.len());
            prompter.notify("All steps are already complete.");
            return Ok(summary);
        }
        info!(
            "running steps {}..{} of {}",
            started_at + 1,
            registry.len(),
            registry.len()
        );

        for index in started_at..registry.len() {
            let id = match registry.get(index) {
                Some(descriptor) => descriptor.id,
                None => break,
            };
            let result = self.runner.run(index, config, &mut state, prompter)?;
            if result.is_done() {
                summary.completed.push(id);
            } else {
                info!("run-all stopped at {} ({})", id, result.label());
                summary.stopped = Some((id, result));
                break;
            }
        }
        Ok(summary)
    }
}
