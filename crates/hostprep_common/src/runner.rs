//! Step runner
//!
//! Runs one step end to end: pick the handler variant, confirm with the
//! operator, invoke, then persist and maybe reboot. Only a successful step
//! advances progress, and the reboot check always comes after the save.

use tracing::{error, info, warn};

use crate::audit::ConflictLog;
use crate::command_exec::CommandRunner;
use crate::config::Config;
use crate::error::{FailureKind, ProvisionError, StepError, CODE_CANCELED, CODE_SUCCESS};
use crate::netif::InterfaceInventory;
use crate::prompt::Prompter;
use crate::reboot::{RebootCoordinator, Rebooter};
use crate::state::{ExecutionState, ExecutionStateStore};
use crate::steps::{StepContext, StepRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    pub code: i32,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Done,
    Canceled,
    Failed(FailureDetail),
}

impl RunResult {
    /// Map a numeric handler code: 0 done, 2 canceled, anything else failed
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        match code {
            CODE_SUCCESS => RunResult::Done,
            CODE_CANCELED => RunResult::Canceled,
            other => {
                let kind = match other {
                    10 => FailureKind::PreconditionUnmet,
                    20 => FailureKind::Conflict,
                    30 => FailureKind::ExternalCommand,
                    31 => FailureKind::Timeout,
                    40 => FailureKind::Io,
                    _ => FailureKind::Internal,
                };
                RunResult::Failed(FailureDetail {
                    code: other,
                    kind,
                    message: message.into(),
                })
            }
        }
    }

    pub fn from_handler(outcome: Result<(), StepError>) -> Self {
        match outcome {
            Ok(()) => RunResult::Done,
            Err(e) => RunResult::from_code(e.code(), e.to_string()),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            RunResult::Done => CODE_SUCCESS,
            RunResult::Canceled => CODE_CANCELED,
            RunResult::Failed(detail) => detail.code,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RunResult::Done)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunResult::Done => "done",
            RunResult::Canceled => "canceled",
            RunResult::Failed(_) => "failed",
        }
    }
}

pub struct StepRunner<'a> {
    registry: &'a StepRegistry,
    store: &'a ExecutionStateStore,
    commands: &'a dyn CommandRunner,
    inventory: &'a dyn InterfaceInventory,
    conflicts: &'a ConflictLog,
    rebooter: &'a dyn Rebooter,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        registry: &'a StepRegistry,
        store: &'a ExecutionStateStore,
        commands: &'a dyn CommandRunner,
        inventory: &'a dyn InterfaceInventory,
        conflicts: &'a ConflictLog,
        rebooter: &'a dyn Rebooter,
    ) -> Self {
        Self {
            registry,
            store,
            commands,
            inventory,
            conflicts,
            rebooter,
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        self.registry
    }

    pub fn store(&self) -> &ExecutionStateStore {
        self.store
    }

    pub fn dry_run(&self) -> bool {
        self.commands.dry_run()
    }

    /// Run the step at `index`
    ///
    /// `Err` is reserved for engine failures, a failed state write above all;
    /// the caller must stop the session on it.
    pub fn run(
        &self,
        index: usize,
        config: &Config,
        state: &mut ExecutionState,
        prompter: &mut dyn Prompter,
    ) -> Result<RunResult, ProvisionError> {
        let descriptor = self
            .registry
            .get(index)
            .ok_or(ProvisionError::StepIndexOutOfRange {
                index,
                len: self.registry.len(),
            })?;
        let id = descriptor.id;
        let handler = descriptor.handler.select(config.product_version());
        let dry_run = self.dry_run();

        let question = format!(
            "Run step {}/{} {} ({}){}{}?",
            index + 1,
            self.registry.len(),
            id,
            descriptor.display_name,
            if descriptor.destructive { " [DESTRUCTIVE]" } else { "" },
            if dry_run { " [dry-run]" } else { "" },
        );
        match prompter.confirm(&question) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                info!("step {} not confirmed", id);
                return Ok(RunResult::Canceled);
            }
        }

        info!("step {} starting", id);
        let identities_before = state.identities.clone();
        let outcome = {
            let mut ctx = StepContext {
                config,
                state: &mut *state,
                commands: self.commands,
                inventory: self.inventory,
                prompter: &mut *prompter,
                conflicts: self.conflicts,
                dry_run,
            };
            handler(&mut ctx)
        };
        let result = RunResult::from_handler(outcome);

        match &result {
            RunResult::Done => {
                if dry_run {
                    state.mark_completed(id);
                    info!("[dry-run] step {} done, state not persisted", id);
                } else {
                    self.store.save(state, id)?;
                }
                RebootCoordinator::from_config(config, dry_run).after_step(id, self.rebooter);
            }
            RunResult::Canceled => {
                warn!("step {} canceled by operator", id);
                prompter.notify(&format!("Step {} canceled.", id));
            }
            RunResult::Failed(detail) => {
                error!(
                    "step {} failed ({}, code {}): {}",
                    id,
                    detail.kind.as_str(),
                    detail.code,
                    detail.message
                );
                prompter.notify(&format!(
                    "Step {} failed ({}): {}",
                    id,
                    detail.kind.as_str(),
                    detail.message
                ));
                // A partial rename has already changed the host; keep the
                // identity block in step with it. Progress stays unchanged.
                if !dry_run && state.identities != identities_before {
                    self.store.save_identities(state)?;
                    warn!("step {} failed after changing NIC identities; identities saved", id);
                }
            }
        }
        Ok(result)
    }
}
