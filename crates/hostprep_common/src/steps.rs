//! Step catalog
//!
//! Steps are identified by `StepId`, whose string form is what gets
//! persisted. Ids are never reused or renumbered: an installed host may hold
//! any of them in its state file. The registry order is the execution order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::audit::ConflictLog;
use crate::command_exec::{CommandResult, CommandRunner, CommandSpec};
use crate::config::Config;
use crate::error::{ProvisionError, StepError};
use crate::identity::IdentityResolver;
use crate::kvfile;
use crate::netif::InterfaceInventory;
use crate::poll;
use crate::prompt::Prompter;
use crate::state::ExecutionState;
use crate::version::select_variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepId {
    Hostname,
    NicSelect,
    NicIfupdown,
    NicRename,
    KvmPackages,
    KernelTuning,
    LibvirtNetwork,
    StoragePrepare,
    StoragePool,
    VmImage,
    VmDefine,
    VmStart,
    Finalize,
}

impl StepId {
    pub const ALL: [StepId; 13] = [
        StepId::Hostname,
        StepId::NicSelect,
        StepId::NicIfupdown,
        StepId::NicRename,
        StepId::KvmPackages,
        StepId::KernelTuning,
        StepId::LibvirtNetwork,
        StepId::StoragePrepare,
        StepId::StoragePool,
        StepId::VmImage,
        StepId::VmDefine,
        StepId::VmStart,
        StepId::Finalize,
    ];

    /// Persisted form
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Hostname => "01_hostname",
            StepId::NicSelect => "02_nic_select",
            StepId::NicIfupdown => "03_nic_ifupdown",
            StepId::NicRename => "04_nic_rename",
            StepId::KvmPackages => "05_kvm_packages",
            StepId::KernelTuning => "06_kernel_tuning",
            StepId::LibvirtNetwork => "07_libvirt_network",
            StepId::StoragePrepare => "08_storage_prepare",
            StepId::StoragePool => "09_storage_pool",
            StepId::VmImage => "10_vm_image",
            StepId::VmDefine => "11_vm_define",
            StepId::VmStart => "12_vm_start",
            StepId::Finalize => "13_finalize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.iter().copied().find(|id| id.as_str() == s)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ProvisionError::UnknownStep(s.to_string()))
    }
}

/// Everything a handler may touch
pub struct StepContext<'a> {
    pub config: &'a Config,
    pub state: &'a mut ExecutionState,
    pub commands: &'a dyn CommandRunner,
    pub inventory: &'a dyn InterfaceInventory,
    pub prompter: &'a mut dyn Prompter,
    pub conflicts: &'a ConflictLog,
    pub dry_run: bool,
}

impl<'a> StepContext<'a> {
    /// Run a command; non-zero exit is an ExternalCommandFailure
    pub fn run(&self, spec: CommandSpec) -> Result<CommandResult, StepError> {
        self.commands.run(&spec).check()
    }

    /// Run a read-only probe and return whatever it produced
    pub fn probe(&self, spec: CommandSpec) -> CommandResult {
        self.commands.run(&spec.read_only())
    }

    /// Identity resolver over this step's state
    pub fn resolver(&mut self) -> IdentityResolver<'_> {
        IdentityResolver::new(self.inventory, self.conflicts, &mut self.state.identities)
    }

    /// Second confirmation; declining cancels the step
    pub fn confirm_destructive(&mut self, warning: &str, token: &str) -> Result<(), StepError> {
        if self.prompter.confirm_destructive(warning, token)? {
            Ok(())
        } else {
            info!("destructive action declined: {}", warning);
            Err(StepError::Canceled)
        }
    }

    /// Write a file atomically, or just log it in dry mode
    pub fn write_file(&self, path: &Path, content: &str) -> Result<(), StepError> {
        if self.dry_run {
            info!(
                "[dry-run] would write {} ({} bytes)",
                path.display(),
                content.len()
            );
            return Ok(());
        }
        info!("writing {}", path.display());
        kvfile::atomic_write(path, content.as_bytes())?;
        Ok(())
    }

    /// Bounded wait using the configured timeout and interval.
    /// Skipped in dry mode, where nothing was created to wait for.
    pub fn wait_for<F>(&self, what: &str, mut probe: F) -> Result<(), StepError>
    where
        F: FnMut(&Self) -> Result<bool, StepError>,
    {
        if self.dry_run {
            info!("[dry-run] not waiting for {}", what);
            return Ok(());
        }
        poll::wait_until(
            what,
            self.config.poll_timeout(),
            self.config.poll_interval(),
            || probe(self),
        )
    }
}

pub type HandlerFn = fn(&mut StepContext<'_>) -> Result<(), StepError>;

/// Handler, possibly split by product version
#[derive(Clone, Copy)]
pub enum StepHandler {
    Single(HandlerFn),
    Versioned { legacy: HandlerFn, new: HandlerFn },
}

impl StepHandler {
    /// Concrete handler for a configured product version
    pub fn select(&self, product_version: &str) -> HandlerFn {
        match *self {
            StepHandler::Single(handler) => handler,
            StepHandler::Versioned { legacy, new } => {
                select_variant(product_version, legacy, new)
            }
        }
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, StepHandler::Versioned { .. })
    }
}

impl fmt::Debug for StepHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepHandler::Single(_) => f.write_str("Single"),
            StepHandler::Versioned { .. } => f.write_str("Versioned"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub id: StepId,
    pub display_name: &'static str,
    pub handler: StepHandler,
    /// Shown in the menu; the handler asks for the second confirmation itself
    pub destructive: bool,
}

impl StepDescriptor {
    pub fn new(id: StepId, display_name: &'static str, handler: HandlerFn) -> Self {
        Self {
            id,
            display_name,
            handler: StepHandler::Single(handler),
            destructive: false,
        }
    }

    pub fn versioned(
        id: StepId,
        display_name: &'static str,
        legacy: HandlerFn,
        new: HandlerFn,
    ) -> Self {
        Self {
            id,
            display_name,
            handler: StepHandler::Versioned { legacy, new },
            destructive: false,
        }
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }
}

/// Fixed, ordered step catalog
#[derive(Debug, Clone)]
pub struct StepRegistry {
    steps: Vec<StepDescriptor>,
}

impl StepRegistry {
    /// Build the catalog; duplicate ids are rejected
    pub fn new(steps: Vec<StepDescriptor>) -> Result<Self, ProvisionError> {
        for (i, step) in steps.iter().enumerate() {
            if steps[..i].iter().any(|s| s.id == step.id) {
                return Err(ProvisionError::DuplicateStep(step.id.to_string()));
            }
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StepDescriptor> {
        self.steps.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.steps.iter()
    }

    pub fn index_of(&self, id: StepId) -> Result<usize, ProvisionError> {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ProvisionError::UnknownStep(id.to_string()))
    }

    /// Resolve a CLI selector: 1-based number or step id
    pub fn parse_selector(&self, selector: &str) -> Result<usize, ProvisionError> {
        let selector = selector.trim();
        if let Ok(n) = selector.parse::<usize>() {
            if n >= 1 && n <= self.len() {
                return Ok(n - 1);
            }
            return Err(ProvisionError::StepIndexOutOfRange {
                index: n,
                len: self.len(),
            });
        }
        let id = StepId::parse(selector)
            .ok_or_else(|| ProvisionError::UnknownStep(selector.to_string()))?;
        self.index_of(id)
    }
}
