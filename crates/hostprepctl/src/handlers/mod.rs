//! Built-in provisioning steps
//!
//! Every handler is idempotent: it probes first and only changes what is not
//! already in place, so re-running a step after a partial failure is safe.

mod host;
mod hypervisor;
mod network;
mod storage;
mod vm;

use hostprep_common::command_exec::{CommandRunner, CommandSpec};
use hostprep_common::error::ProvisionError;
use hostprep_common::{StepContext, StepDescriptor, StepError, StepId, StepRegistry};

/// The step catalog, in execution order
pub fn registry() -> Result<StepRegistry, ProvisionError> {
    StepRegistry::new(vec![
        StepDescriptor::new(StepId::Hostname, "Set hostname", host::set_hostname),
        StepDescriptor::new(StepId::NicSelect, "Select network interfaces", network::select_nics),
        StepDescriptor::new(StepId::NicIfupdown, "Configure ifupdown", network::configure_ifupdown),
        StepDescriptor::new(StepId::NicRename, "Rename interfaces to stable aliases", network::rename_nics),
        StepDescriptor::new(StepId::KvmPackages, "Install virtualization packages", hypervisor::install_packages),
        StepDescriptor::new(StepId::KernelTuning, "Apply kernel settings", hypervisor::tune_kernel),
        StepDescriptor::new(StepId::LibvirtNetwork, "Create libvirt bridge network", hypervisor::define_network),
        StepDescriptor::new(StepId::StoragePrepare, "Prepare storage device", storage::prepare_device)
            .destructive(),
        StepDescriptor::new(StepId::StoragePool, "Define storage pool", storage::define_pool),
        StepDescriptor::new(StepId::VmImage, "Fetch VM image", vm::fetch_image),
        StepDescriptor::versioned(
            StepId::VmDefine,
            "Define virtual machine",
            vm::define_vm_legacy,
            vm::define_vm,
        ),
        StepDescriptor::new(StepId::VmStart, "Start virtual machine", vm::start_vm),
        StepDescriptor::new(StepId::Finalize, "Finalize", host::finalize),
    ])
}

/// Config value that must be set for a step to make sense
fn required<'c>(ctx: &StepContext<'c>, key: &str) -> Result<&'c str, StepError> {
    ctx.config
        .get_opt(key)
        .map(str::trim)
        .ok_or_else(|| StepError::precondition(format!("{} is not configured", key)))
}

/// Output of a read-only `virsh` query, if it succeeded
pub(crate) fn virsh_query(commands: &dyn CommandRunner, args: &[&str]) -> Option<String> {
    let spec = CommandSpec::new("virsh").args(args.iter().copied()).read_only();
    let result = commands.run(&spec);
    if result.is_success() {
        Some(result.stdout)
    } else {
        None
    }
}

fn virsh_probe(ctx: &StepContext<'_>, args: &[&str]) -> Option<String> {
    virsh_query(ctx.commands, args)
}

/// Value of a `Key: value` line in virsh info output
pub(crate) fn info_field<'o>(output: &'o str, field: &str) -> Option<&'o str> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim().eq_ignore_ascii_case(field)).then(|| value.trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_complete_and_ordered() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), StepId::ALL.len());
        for (i, step) in registry.iter().enumerate() {
            assert_eq!(step.id, StepId::ALL[i]);
        }
        let destructive: Vec<StepId> = registry.iter().filter(|s| s.destructive).map(|s| s.id).collect();
        assert_eq!(destructive, vec![StepId::StoragePrepare]);
        let versioned: Vec<StepId> = registry
            .iter()
            .filter(|s| s.handler.is_versioned())
            .map(|s| s.id)
            .collect();
        assert_eq!(versioned, vec![StepId::VmDefine]);
    }

    #[test]
    fn test_info_field() {
        let out = "Name:           host-bridge\nUUID:           1234\nActive:         yes\nPersistent:     yes\n";
        assert_eq!(info_field(out, "active"), Some("yes"));
        assert_eq!(info_field(out, "Name"), Some("host-bridge"));
        assert_eq!(info_field(out, "Bridge"), None);
    }
}
