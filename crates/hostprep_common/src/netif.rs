//! Network interface inventory
//!
//! Reads what the kernel currently calls each interface, together with the
//! hardware facts that survive renames (PCI address, MAC). Renames go through
//! the command layer so they honor dry mode.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command_exec::{CommandRunner, CommandSpec};
use crate::identity::{normalize_mac, normalize_pci};

/// Linux IFNAMSIZ minus the trailing NUL
pub const MAX_IFNAME_LEN: usize = 15;

/// Default sysfs mount point
pub const SYSFS_ROOT: &str = "/sys";

/// One interface as the kernel currently reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    /// Normalized `DDDD:BB:SS.F`, absent for non-PCI devices
    pub pci_address: Option<String>,
    /// Normalized lowercase colon form
    pub mac_address: Option<String>,
    pub is_virtual: bool,
    pub is_bridge: bool,
}

impl InterfaceInfo {
    /// Physical NIC: neither virtual nor a bridge
    pub fn is_physical(&self) -> bool {
        !self.is_virtual && !self.is_bridge
    }

    /// Convenience constructor for a physical PCI NIC
    pub fn physical(name: &str, pci: Option<&str>, mac: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            pci_address: pci.and_then(normalize_pci),
            mac_address: mac.and_then(normalize_mac),
            is_virtual: false,
            is_bridge: false,
        }
    }
}

/// Source of interface facts and the rename primitive
pub trait InterfaceInventory {
    /// All interfaces, sorted by name
    fn interfaces(&self) -> io::Result<Vec<InterfaceInfo>>;

    /// Rename `from` to `to`
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Physical interfaces only
    fn physical_interfaces(&self) -> io::Result<Vec<InterfaceInfo>> {
        Ok(self
            .interfaces()?
            .into_iter()
            .filter(InterfaceInfo::is_physical)
            .collect())
    }
}

/// Inventory backed by `/sys/class/net`
pub struct SysfsInventory<'a> {
    root: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> SysfsInventory<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self::with_root(SYSFS_ROOT, runner)
    }

    /// Use a different sysfs root (tests build a fake tree)
    pub fn with_root(root: impl Into<PathBuf>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    fn read_interface(&self, name: &str, dir: &Path) -> InterfaceInfo {
        let device = dir.join("device");
        let has_device = device.exists();

        // device -> ../../../0000:03:00.0 for PCI NICs
        let pci_address = fs::read_link(&device)
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
            .and_then(|n| normalize_pci(&n));

        let mac_address = fs::read_to_string(dir.join("address"))
            .ok()
            .and_then(|s| normalize_mac(s.trim()));

        let is_virtual =
            self.root.join("devices/virtual/net").join(name).exists() || !has_device;
        let is_bridge = dir.join("bridge").is_dir();

        InterfaceInfo {
            name: name.to_string(),
            pci_address,
            mac_address,
            is_virtual,
            is_bridge,
        }
    }
}

impl InterfaceInventory for SysfsInventory<'_> {
    fn interfaces(&self) -> io::Result<Vec<InterfaceInfo>> {
        let class_net = self.root.join("class/net");
        let mut out = Vec::new();
        for entry in fs::read_dir(&class_net)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push(self.read_interface(&name, &entry.path()));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("sysfs inventory: {} interfaces", out.len());
        Ok(out)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        if to.is_empty() || to.len() > MAX_IFNAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid interface name {:?}", to),
            ));
        }
        info!("renaming interface {} -> {}", from, to);
        let steps = [
            CommandSpec::new("ip").args(["link", "set", "dev", from, "down"]),
            CommandSpec::new("ip").args(["link", "set", "dev", from, "name", to]),
            CommandSpec::new("ip").args(["link", "set", "dev", to, "up"]),
        ];
        for spec in &steps {
            let result = self.runner.run(spec);
            if !result.is_success() {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "`{}` exited with {}: {}",
                        result.command_line,
                        result.exit_code,
                        result.stderr.trim()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// In-memory inventory for tests and previews
#[derive(Debug, Default)]
pub struct FakeInventory {
    interfaces: RefCell<Vec<InterfaceInfo>>,
    renames: RefCell<Vec<(String, String)>>,
}

impl FakeInventory {
    pub fn new(interfaces: Vec<InterfaceInfo>) -> Self {
        Self {
            interfaces: RefCell::new(interfaces),
            renames: RefCell::new(Vec::new()),
        }
    }

    /// Every rename performed so far, in order
    pub fn renames(&self) -> Vec<(String, String)> {
        self.renames.borrow().clone()
    }

    /// Simulate the kernel renaming an interface behind our back
    pub fn kernel_rename(&self, from: &str, to: &str) {
        for iface in self.interfaces.borrow_mut().iter_mut() {
            if iface.name == from {
                iface.name = to.to_string();
            }
        }
    }

    pub fn add(&self, iface: InterfaceInfo) {
        self.interfaces.borrow_mut().push(iface);
    }
}

impl InterfaceInventory for FakeInventory {
    fn interfaces(&self) -> io::Result<Vec<InterfaceInfo>> {
        let mut list = self.interfaces.borrow().clone();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut list = self.interfaces.borrow_mut();
        if to.is_empty() || to.len() > MAX_IFNAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid name"));
        }
        if list.iter().any(|i| i.name == to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to),
            ));
        }
        let iface = list
            .iter_mut()
            .find(|i| i.name == from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.to_string()))?;
        iface.name = to.to_string();
        self.renames
            .borrow_mut()
            .push((from.to_string(), to.to_string()));
        Ok(())
    }
}
