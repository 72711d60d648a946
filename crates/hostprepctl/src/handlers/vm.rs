//! Guest image, definition and start-up

use hostprep_common::command_exec::CommandSpec;
use hostprep_common::{StepContext, StepError};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{required, virsh_probe};

fn image_path(ctx: &StepContext<'_>) -> Result<PathBuf, StepError> {
    let mount = required(ctx, "STORAGE_MOUNT")?;
    let vm = required(ctx, "VM_NAME")?;
    Ok(Path::new(mount).join(format!("{}.qcow2", vm)))
}

pub(super) fn fetch_image(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let url = required(ctx, "VM_IMAGE_URL")?;
    let dest = image_path(ctx)?;
    if dest.exists() {
        info!("image {} already present", dest.display());
        return Ok(());
    }
    let partial = dest.with_extension("qcow2.part");
    let dest_str = dest.to_string_lossy().into_owned();
    let partial_str = partial.to_string_lossy().into_owned();

    ctx.run(CommandSpec::new("curl").args([
        "-fL",
        "--retry",
        "3",
        "-o",
        partial_str.as_str(),
        url,
    ]))?;
    ctx.run(CommandSpec::new("mv").args([partial_str.as_str(), dest_str.as_str()]))?;
    Ok(())
}

/// virt-install arguments shared by both variants
pub fn virt_install_args(
    name: &str,
    memory_mb: u64,
    vcpus: u64,
    image: &str,
    network: &str,
) -> Vec<String> {
    vec![
        "--name".into(),
        name.into(),
        "--memory".into(),
        memory_mb.to_string(),
        "--vcpus".into(),
        vcpus.to_string(),
        "--import".into(),
        "--disk".into(),
        format!("path={},format=qcow2,bus=virtio", image),
        "--network".into(),
        format!("network={},model=virtio", network),
        "--graphics".into(),
        "none".into(),
        "--noautoconsole".into(),
        "--noreboot".into(),
    ]
}

fn define_with(ctx: &mut StepContext<'_>, os_args: &[&str]) -> Result<(), StepError> {
    let vm = required(ctx, "VM_NAME")?;
    let network = required(ctx, "LIBVIRT_NETWORK")?;
    if virsh_probe(ctx, &["dominfo", vm]).is_some() {
        info!("domain {} already defined", vm);
        return Ok(());
    }
    let image = image_path(ctx)?;
    if !ctx.dry_run && !image.exists() {
        return Err(StepError::precondition(format!(
            "image {} is missing; run 10_vm_image first",
            image.display()
        )));
    }

    let args = virt_install_args(
        vm,
        ctx.config.number("VM_MEMORY_MB"),
        ctx.config.number("VM_VCPUS"),
        &image.to_string_lossy(),
        network,
    );
    ctx.run(
        CommandSpec::new("virt-install")
            .args(args)
            .args(os_args.iter().copied()),
    )?;
    Ok(())
}

/// Older virt-install: no osinfo detection
pub(super) fn define_vm_legacy(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    define_with(ctx, &["--os-variant", "generic"])
}

pub(super) fn define_vm(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    define_with(ctx, &["--osinfo", "detect=on,require=off"])
}

fn domain_running(ctx: &StepContext<'_>, vm: &str) -> bool {
    virsh_probe(ctx, &["domstate", vm])
        .map(|out| out.trim() == "running")
        .unwrap_or(false)
}

pub(super) fn start_vm(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let vm = required(ctx, "VM_NAME")?;
    ctx.run(CommandSpec::new("virsh").args(["autostart", vm]))?;
    if domain_running(ctx, vm) {
        info!("domain {} already running", vm);
        return Ok(());
    }
    ctx.run(CommandSpec::new("virsh").args(["start", vm]))?;
    ctx.wait_for(&format!("domain {} to run", vm), |ctx| Ok(domain_running(ctx, vm)))
}
