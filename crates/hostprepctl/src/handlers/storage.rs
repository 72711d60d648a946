//! VM storage: wipe and format the device, then a libvirt pool on it

use hostprep_common::command_exec::CommandSpec;
use hostprep_common::{StepContext, StepError};
use tracing::{info, warn};

use super::{info_field, required, virsh_probe};

/// Filesystem label written by `prepare_device`
const POOL_LABEL: &str = "hostprep-pool";

fn block_device_exists(ctx: &StepContext<'_>, device: &str) -> bool {
    ctx.probe(CommandSpec::new("test").args(["-b", device])).exit_code == 0
}

/// A device already carrying our label was formatted by an earlier run
fn already_prepared(ctx: &StepContext<'_>, device: &str) -> bool {
    let out = ctx.probe(CommandSpec::new("blkid").args(["-o", "value", "-s", "LABEL", device]));
    out.exit_code == 0 && out.stdout.trim() == POOL_LABEL
}

fn is_mounted(ctx: &StepContext<'_>, device: &str) -> bool {
    ctx.probe(CommandSpec::new("findmnt").args(["-n", "-S", device])).exit_code == 0
}

pub(super) fn prepare_device(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let device = required(ctx, "STORAGE_DEVICE")?;
    if !block_device_exists(ctx, device) {
        return Err(StepError::precondition(format!(
            "{} is not a block device",
            device
        )));
    }
    if already_prepared(ctx, device) {
        info!("{} already carries label {}; not wiping", device, POOL_LABEL);
        ctx.prompter
            .notify(&format!("{} is already prepared ({}); skipping.", device, POOL_LABEL));
        return Ok(());
    }
    if is_mounted(ctx, device) {
        return Err(StepError::precondition(format!(
            "{} is mounted; refusing to wipe it",
            device
        )));
    }

    ctx.confirm_destructive(
        &format!("all data on {} will be erased", device),
        device,
    )?;

    warn!("wiping {}", device);
    ctx.run(CommandSpec::new("wipefs").args(["-a", device]))?;
    ctx.run(CommandSpec::new("mkfs.ext4").args(["-F", "-L", POOL_LABEL, device]))?;
    info!("{} formatted", device);
    Ok(())
}

pub(super) fn define_pool(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let device = required(ctx, "STORAGE_DEVICE")?;
    let pool = required(ctx, "STORAGE_POOL")?;
    let target = required(ctx, "STORAGE_MOUNT")?;

    if !block_device_exists(ctx, device) {
        return Err(StepError::precondition(format!(
            "{} is missing; run 08_storage_prepare first",
            device
        )));
    }

    match virsh_probe(ctx, &["pool-info", pool]) {
        Some(_) => info!("storage pool {} already defined", pool),
        None => {
            ctx.run(CommandSpec::new("virsh").args([
                "pool-define-as",
                pool,
                "fs",
                "--source-dev",
                device,
                "--target",
                target,
            ]))?;
            ctx.run(CommandSpec::new("virsh").args(["pool-build", pool]))?;
        }
    }
    ctx.run(CommandSpec::new("virsh").args(["pool-autostart", pool]))?;

    let running = virsh_probe(ctx, &["pool-info", pool])
        .map(|out| info_field(&out, "State") == Some("running"))
        .unwrap_or(false);
    if !running {
        ctx.run(CommandSpec::new("virsh").args(["pool-start", pool]))?;
    }
    Ok(())
}
