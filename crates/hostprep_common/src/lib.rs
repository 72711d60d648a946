//! hostprep common - engine, state and hardware identity for host provisioning
//!
//! Everything here is usable without root: the OS is reached only through the
//! `CommandRunner`, `InterfaceInventory` and `Rebooter` seams.

pub mod audit;
pub mod auto_continue;
pub mod command_exec;
pub mod config;
pub mod error;
pub mod identity;
pub mod kvfile;
pub mod netif;
pub mod poll;
pub mod prompt;
pub mod reboot;
pub mod runner;
pub mod state;
pub mod steps;
pub mod version;

pub use error::{FailureKind, ProvisionError, StepError};
pub use runner::{FailureDetail, RunResult, StepRunner};
pub use steps::{StepContext, StepDescriptor, StepHandler, StepId, StepRegistry};
