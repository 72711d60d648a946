//! KVM packages, kernel settings and the libvirt bridge network

use hostprep_common::command_exec::CommandSpec;
use hostprep_common::{StepContext, StepError};
use std::path::Path;
use tracing::info;

use super::{info_field, required, virsh_probe};

const KVM_PACKAGES: &[&str] = &[
    "qemu-system-x86",
    "qemu-utils",
    "libvirt-daemon-system",
    "libvirt-clients",
    "virtinst",
    "ovmf",
];

const SYSCTL_PATH: &str = "/etc/sysctl.d/90-hostprep.conf";
const MODULES_PATH: &str = "/etc/modules-load.d/hostprep.conf";

const SYSCTL_SETTINGS: &[(&str, &str)] = &[
    ("net.ipv4.ip_forward", "1"),
    ("net.bridge.bridge-nf-call-iptables", "0"),
    ("net.bridge.bridge-nf-call-ip6tables", "0"),
    ("vm.swappiness", "10"),
    ("kernel.numa_balancing", "0"),
];

pub(super) fn install_packages(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    ctx.run(CommandSpec::new("apt-get").arg("update"))?;
    ctx.run(
        CommandSpec::new("apt-get")
            .args(["install", "-y", "--no-install-recommends"])
            .args(KVM_PACKAGES.iter().copied()),
    )?;
    ctx.run(CommandSpec::new("systemctl").args(["enable", "--now", "libvirtd"]))?;
    info!("virtualization packages installed");
    Ok(())
}

pub fn render_sysctl() -> String {
    let mut out = String::from("# Managed by hostprep\n");
    for (key, value) in SYSCTL_SETTINGS {
        out.push_str(&format!("{} = {}\n", key, value));
    }
    out
}

pub(super) fn tune_kernel(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    ctx.write_file(Path::new(MODULES_PATH), "br_netfilter\nvhost_net\n")?;
    ctx.run(CommandSpec::new("modprobe").arg("br_netfilter"))?;
    ctx.run(CommandSpec::new("modprobe").arg("vhost_net"))?;
    ctx.write_file(Path::new(SYSCTL_PATH), &render_sysctl())?;
    ctx.run(CommandSpec::new("sysctl").arg("--system"))?;
    Ok(())
}

pub fn render_network_xml(name: &str, bridge: &str) -> String {
    format!(
        "<network>\n  <name>{}</name>\n  <forward mode=\"bridge\"/>\n  <bridge name=\"{}\"/>\n</network>\n",
        name, bridge
    )
}

fn network_active(ctx: &StepContext<'_>, name: &str) -> bool {
    virsh_probe(ctx, &["net-info", name])
        .map(|out| info_field(&out, "Active") == Some("yes"))
        .unwrap_or(false)
}

pub(super) fn define_network(ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let name = required(ctx, "LIBVIRT_NETWORK")?;
    let bridge = required(ctx, "BRIDGE_NAME")?;

    match virsh_probe(ctx, &["net-info", name]) {
        Some(_) => info!("libvirt network {} already defined", name),
        None => {
            ctx.run(
                CommandSpec::new("virsh")
                    .args(["net-define", "/dev/stdin"])
                    .stdin(render_network_xml(name, bridge)),
            )?;
        }
    }
    ctx.run(CommandSpec::new("virsh").args(["net-autostart", name]))?;
    if !network_active(ctx, name) {
        ctx.run(CommandSpec::new("virsh").args(["net-start", name]))?;
    }

    ctx.wait_for(&format!("libvirt network {}", name), |ctx| {
        Ok(network_active(ctx, name))
    })
}
