//! Error types for hostprep.
//!
//! `ProvisionError` covers the engine itself (state, config, catalog lookups).
//! `StepError` is what a step handler returns; it collapses onto the
//! success / cancel / failure contract through `code()`.

use std::path::PathBuf;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::prompt::Canceled;

/// Handler code for success
pub const CODE_SUCCESS: i32 = 0;

/// Handler code for an operator cancel
pub const CODE_CANCELED: i32 = 2;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to persist execution state to {}: {source}", path.display())]
    StatePersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist configuration to {}: {source}", path.display())]
    ConfigPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("step index {index} out of range (catalog has {len} steps)")]
    StepIndexOutOfRange { index: usize, len: usize },

    #[error("unknown step: {0}")]
    UnknownStep(String),

    #[error("duplicate step id in catalog: {0}")]
    DuplicateStep(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure category, used for diagnostics and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A prior step's artifact or state is missing
    PreconditionUnmet,
    /// Identity or naming conflict
    Conflict,
    /// An OS or hypervisor command failed
    ExternalCommand,
    /// A bounded wait ran out
    Timeout,
    /// Local IO
    Io,
    /// Engine error raised inside a handler
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreconditionUnmet => "precondition unmet",
            Self::Conflict => "conflict",
            Self::ExternalCommand => "external command failure",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error("canceled by operator")]
    Canceled,

    #[error("precondition unmet: {0}")]
    Precondition(String),

    #[error("conflict: {0}")]
    Conflict(IdentityError),

    #[error("`{command}` exited with {exit_code}: {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("timed out after {waited_secs}s waiting for {what}")]
    Timeout { what: String, waited_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] ProvisionError),
}

impl StepError {
    /// Numeric handler code: 0 is never returned here, 2 means canceled.
    pub fn code(&self) -> i32 {
        match self {
            StepError::Canceled => CODE_CANCELED,
            StepError::Precondition(_) => 10,
            StepError::Conflict(_) => 20,
            StepError::Command { .. } => 30,
            StepError::Timeout { .. } => 31,
            StepError::Io(_) => 40,
            StepError::Engine(_) => 50,
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        StepError::Precondition(msg.into())
    }
}

impl From<Canceled> for StepError {
    fn from(_: Canceled) -> Self {
        StepError::Canceled
    }
}

impl From<IdentityError> for StepError {
    fn from(err: IdentityError) -> Self {
        match err {
            // A role that cannot be found means an earlier step did not run.
            IdentityError::NotFound { .. } | IdentityError::NotSelected { .. } => {
                StepError::Precondition(err.to_string())
            }
            IdentityError::Inventory(e) => StepError::Io(e),
            other => StepError::Conflict(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn test_cancel_code_is_two() {
        assert_eq!(StepError::Canceled.code(), CODE_CANCELED);
    }

    #[test]
    fn test_failure_codes_avoid_contract_values() {
        let errors = vec![
            StepError::precondition("x"),
            StepError::Timeout {
                what: "net".into(),
                waited_secs: 3,
            },
            StepError::Command {
                command: "virsh".into(),
                exit_code: 1,
                stderr: String::new(),
            },
        ];
        for err in errors {
            assert_ne!(err.code(), CODE_SUCCESS);
            assert_ne!(err.code(), CODE_CANCELED);
        }
    }

    #[test]
    fn test_identity_not_found_is_precondition() {
        let err: StepError = IdentityError::NotFound {
            role: Role::Cluster,
        }
        .into();
        assert_eq!(err.code(), 10);

        let err: StepError = IdentityError::DuplicateDevice {
            first: Role::Management,
            second: Role::Cluster,
            detail: "same PCI".into(),
        }
        .into();
        assert_eq!(err.code(), 20);
    }
}
