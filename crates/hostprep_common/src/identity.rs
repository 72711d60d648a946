//! Hardware identity resolver
//!
//! Binds the three logical network roles to physical NICs. Interface names
//! churn across reboots and renames; PCI address and MAC do not, so those are
//! what a role is really bound to. The name is only where the device happens
//! to be right now.
//!
//! Resolution order for a role:
//! 1. recorded effective name, if present, physical, and not contradicted
//! 2. PCI address among physical interfaces
//! 3. MAC address among physical interfaces
//! 4. originally selected name, if present and not contradicted
//!
//! PCI is always preferred over MAC. If firmware renumbers the bus between
//! runs a stale PCI record will miss and resolution falls through to MAC.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{ConflictLog, RenameConflictRecord};
use crate::netif::{InterfaceInfo, InterfaceInventory, MAX_IFNAME_LEN};

/// Logical network role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Management,
    Cluster,
    HostAccess,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Management, Role::Cluster, Role::HostAccess];

    /// Prefix of this role's keys in the state and config files
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Role::Management => "MGT",
            Role::Cluster => "CLUSTER",
            Role::HostAccess => "HOST",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Management => "management",
            Role::Cluster => "cluster",
            Role::HostAccess => "host-access",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("no interface has been selected for the {role} role")]
    NotSelected { role: Role },

    #[error("no present interface matches the {role} role")]
    NotFound { role: Role },

    #[error("{first} and {second} roles resolve to the same device ({detail})")]
    DuplicateDevice {
        first: Role,
        second: Role,
        detail: String,
    },

    #[error("alias {alias:?} requested for both {first} and {second}")]
    DuplicateAlias {
        alias: String,
        first: Role,
        second: Role,
    },

    #[error("invalid interface alias {alias:?}: {reason}")]
    InvalidAlias { alias: String, reason: &'static str },

    #[error("no free temporary name to move the current holder of {alias:?}")]
    NoFreeTemporaryName { alias: String },

    #[error("renaming {from} to {to} failed: {reason}")]
    Rename {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid rename plan: {0}")]
    InvalidPlan(String),

    #[error("interface inventory unavailable: {0}")]
    Inventory(#[from] std::io::Error),
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a PCI address to `dddd:bb:ss.f`, prepending domain `0000`
///
/// Accepts `03:00.0`, `0000:03:00.0`, `pci@0000:03:00.0`, any case.
pub fn normalize_pci(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("pci@").unwrap_or(raw);
    let parts: Vec<&str> = raw.split(':').collect();
    let (domain, bus, devfn) = match parts.as_slice() {
        [bus, devfn] => ("0000", *bus, *devfn),
        [domain, bus, devfn] => (*domain, *bus, *devfn),
        _ => return None,
    };
    let (slot, func) = devfn.split_once('.')?;

    let domain = parse_hex(domain, 4)?;
    let bus = parse_hex(bus, 2)?;
    let slot = parse_hex(slot, 2)?;
    let func = parse_hex(func, 1)?;
    if slot > 0x1f || func > 7 {
        return None;
    }
    Some(format!("{:04x}:{:02x}:{:02x}.{:x}", domain, bus, slot, func))
}

fn parse_hex(s: &str, max_len: usize) -> Option<u32> {
    if s.is_empty() || s.len() > max_len || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

/// Normalize a MAC address to lowercase colon-separated form
///
/// Hyphen separators become colons; dotted `aabb.ccdd.eeff` is also accepted.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase().replace('-', ":");
    let octets: Vec<String> = if lowered.contains(':') {
        lowered.split(':').map(str::to_string).collect()
    } else {
        let hex: String = lowered.chars().filter(|c| *c != '.').collect();
        if hex.len() != 12 {
            return None;
        }
        hex.as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect()
    };

    if octets.len() != 6 {
        return None;
    }
    let mut out = Vec::with_capacity(6);
    for octet in octets {
        let value = parse_hex(&octet, 2)?;
        out.push(format!("{:02x}", value));
    }
    Some(out.join(":"))
}

// ============================================================================
// Identity records
// ============================================================================

/// What is known about the device bound to one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareIdentity {
    /// Name the operator picked at selection time
    pub selected_name: Option<String>,
    pub pci_address: Option<String>,
    pub mac_address: Option<String>,
    /// Name currently in effect (after renames)
    pub effective_name: Option<String>,
}

impl HardwareIdentity {
    /// Capture an interface as the device for a role
    pub fn from_interface(iface: &InterfaceInfo) -> Self {
        Self {
            selected_name: Some(iface.name.clone()),
            pci_address: iface.pci_address.clone(),
            mac_address: iface.mac_address.clone(),
            effective_name: Some(iface.name.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected_name.is_none()
            && self.pci_address.is_none()
            && self.mac_address.is_none()
            && self.effective_name.is_none()
    }

    /// Compare against a live interface by PCI, else MAC.
    /// `None` when neither fact is available on both sides.
    fn compare(&self, iface: &InterfaceInfo) -> Option<bool> {
        match (&self.pci_address, &iface.pci_address) {
            (Some(a), Some(b)) => Some(a == b),
            _ => match (&self.mac_address, &iface.mac_address) {
                (Some(a), Some(b)) => Some(a == b),
                _ => None,
            },
        }
    }

    /// The live interface is provably this device
    pub fn describes(&self, iface: &InterfaceInfo) -> bool {
        self.compare(iface) == Some(true)
    }

    /// The live interface is provably a different device
    pub fn contradicts(&self, iface: &InterfaceInfo) -> bool {
        self.compare(iface) == Some(false)
    }

    /// Two records name the same physical device.
    ///
    /// PCI decides when both sides have it; MAC is only consulted when
    /// neither side has a PCI address.
    pub fn same_device(&self, other: &Self) -> bool {
        match (&self.pci_address, &other.pci_address) {
            (Some(a), Some(b)) => a == b,
            (None, None) => matches!(
                (&self.mac_address, &other.mac_address),
                (Some(a), Some(b)) if a == b
            ),
            _ => false,
        }
    }

    fn shared_fact(&self, other: &Self) -> String {
        match (&self.pci_address, &other.pci_address) {
            (Some(pci), Some(_)) => format!("both have PCI {}", pci),
            _ => format!(
                "both have MAC {}",
                self.mac_address.as_deref().unwrap_or("?")
            ),
        }
    }
}

/// Identity of every role, as persisted with the execution state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    roles: BTreeMap<Role, HardwareIdentity>,
}

impl IdentitySnapshot {
    pub fn get(&self, role: Role) -> Option<&HardwareIdentity> {
        self.roles.get(&role).filter(|i| !i.is_empty())
    }

    pub fn get_mut(&mut self, role: Role) -> &mut HardwareIdentity {
        self.roles.entry(role).or_default()
    }

    pub fn set(&mut self, role: Role, identity: HardwareIdentity) {
        self.roles.insert(role, identity);
    }

    pub fn clear(&mut self, role: Role) {
        self.roles.remove(&role);
    }

    /// Roles with a non-empty record, in role order
    pub fn configured(&self) -> impl Iterator<Item = (Role, &HardwareIdentity)> {
        self.roles
            .iter()
            .filter(|(_, i)| !i.is_empty())
            .map(|(r, i)| (*r, i))
    }

    /// State-file keys: `<P>_NIC`, `<P>_NIC_PCI`, `<P>_NIC_MAC`, `<P>_NIC_EFFECTIVE`
    pub fn to_kv(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for role in Role::ALL {
            let ident = self.roles.get(&role).cloned().unwrap_or_default();
            let p = role.key_prefix();
            out.push((format!("{}_NIC", p), ident.selected_name.unwrap_or_default()));
            out.push((format!("{}_NIC_PCI", p), ident.pci_address.unwrap_or_default()));
            out.push((format!("{}_NIC_MAC", p), ident.mac_address.unwrap_or_default()));
            out.push((
                format!("{}_NIC_EFFECTIVE", p),
                ident.effective_name.unwrap_or_default(),
            ));
        }
        out
    }

    /// Inverse of `to_kv`. Addresses are re-normalized; junk becomes absent.
    pub fn from_kv(map: &BTreeMap<String, String>) -> Self {
        let non_empty = |key: String| map.get(&key).filter(|v| !v.trim().is_empty()).cloned();
        let mut snapshot = Self::default();
        for role in Role::ALL {
            let p = role.key_prefix();
            let ident = HardwareIdentity {
                selected_name: non_empty(format!("{}_NIC", p)),
                pci_address: non_empty(format!("{}_NIC_PCI", p))
                    .and_then(|v| normalize_pci(&v)),
                mac_address: non_empty(format!("{}_NIC_MAC", p))
                    .and_then(|v| normalize_mac(&v)),
                effective_name: non_empty(format!("{}_NIC_EFFECTIVE", p)),
            };
            if !ident.is_empty() {
                snapshot.roles.insert(role, ident);
            }
        }
        snapshot
    }

    /// Whether a key belongs to the identity block
    pub fn owns_key(key: &str) -> bool {
        Role::ALL.iter().any(|role| {
            let p = role.key_prefix();
            key == format!("{}_NIC", p)
                || key == format!("{}_NIC_PCI", p)
                || key == format!("{}_NIC_MAC", p)
                || key == format!("{}_NIC_EFFECTIVE", p)
        })
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Find the live interface for an identity, by the documented priority
pub fn resolve_among<'i>(
    identity: &HardwareIdentity,
    interfaces: &'i [InterfaceInfo],
) -> Option<&'i InterfaceInfo> {
    if let Some(effective) = identity.effective_name.as_deref() {
        if let Some(iface) = interfaces.iter().find(|i| i.name == effective) {
            if iface.is_physical() && !identity.contradicts(iface) {
                return Some(iface);
            }
        }
    }

    if let Some(pci) = identity.pci_address.as_deref() {
        if let Some(iface) = interfaces
            .iter()
            .find(|i| i.is_physical() && i.pci_address.as_deref() == Some(pci))
        {
            return Some(iface);
        }
    }

    if let Some(mac) = identity.mac_address.as_deref() {
        if let Some(iface) = interfaces
            .iter()
            .find(|i| i.is_physical() && i.mac_address.as_deref() == Some(mac))
        {
            return Some(iface);
        }
    }

    if let Some(selected) = identity.selected_name.as_deref() {
        if let Some(iface) = interfaces.iter().find(|i| i.name == selected) {
            if !identity.contradicts(iface) {
                return Some(iface);
            }
        }
    }

    None
}

/// Check an alias can be used as an interface name
pub fn validate_alias(alias: &str) -> Result<(), IdentityError> {
    let reason = if alias.is_empty() {
        Some("empty")
    } else if alias.len() > MAX_IFNAME_LEN {
        Some("longer than 15 bytes")
    } else if alias == "." || alias == ".." {
        Some("reserved name")
    } else if !alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(IdentityError::InvalidAlias {
            alias: alias.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Temporary names tried, in order, when an alias holder must move aside
pub fn temp_name_candidates(alias: &str) -> Vec<String> {
    let prefix_len = alias.len().min(MAX_IFNAME_LEN - 2);
    let prefix = &alias[..prefix_len];
    let mut names: Vec<String> = (0..4).map(|n| format!("{}o{}", prefix, n)).collect();
    names.extend((0..4).map(|n| format!("hpx{}", n)));
    names
}

/// Desired alias per role, applied as a unit
#[derive(Debug, Clone, Default)]
pub struct RenamePlan {
    bindings: Vec<(Role, String)>,
}

impl RenamePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, role: Role, alias: impl Into<String>) -> Self {
        self.bindings.push((role, alias.into()));
        self
    }

    pub fn bindings(&self) -> &[(Role, String)] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Resolver over a live inventory and the persisted identity records
pub struct IdentityResolver<'a> {
    inventory: &'a dyn InterfaceInventory,
    conflicts: &'a ConflictLog,
    identities: &'a mut IdentitySnapshot,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(
        inventory: &'a dyn InterfaceInventory,
        conflicts: &'a ConflictLog,
        identities: &'a mut IdentitySnapshot,
    ) -> Self {
        Self {
            inventory,
            conflicts,
            identities,
        }
    }

    pub fn identities(&self) -> &IdentitySnapshot {
        self.identities
    }

    fn identity(&self, role: Role) -> Result<&HardwareIdentity, IdentityError> {
        self.identities
            .get(role)
            .ok_or(IdentityError::NotSelected { role })
    }

    /// Current interface name for a role. Pure: never renames anything.
    pub fn resolve(&self, role: Role) -> Result<String, IdentityError> {
        let identity = self.identity(role)?;
        let interfaces = self.inventory.interfaces()?;
        let found = resolve_among(identity, &interfaces)
            .map(|iface| iface.name.clone())
            .ok_or(IdentityError::NotFound { role })?;
        debug!("resolved {} role to {}", role, found);
        Ok(found)
    }

    /// Record the operator's choice of interface for a role
    pub fn select(&mut self, role: Role, iface: &InterfaceInfo) {
        info!(
            "selected {} for {} role (pci {}, mac {})",
            iface.name,
            role,
            iface.pci_address.as_deref().unwrap_or("-"),
            iface.mac_address.as_deref().unwrap_or("-")
        );
        self.identities
            .set(role, HardwareIdentity::from_interface(iface));
    }

    /// Make `alias` free for `desired`.
    ///
    /// If some other device currently holds the alias it is moved to a
    /// temporary name and a conflict record is appended. Returns the record,
    /// or `None` when nothing had to move.
    pub fn free_reserved_name(
        &mut self,
        alias: &str,
        desired: &HardwareIdentity,
    ) -> Result<Option<RenameConflictRecord>, IdentityError> {
        validate_alias(alias)?;
        let interfaces = self.inventory.interfaces()?;

        let holder = match interfaces.iter().find(|i| i.name == alias) {
            Some(holder) => holder.clone(),
            None => return Ok(None),
        };
        if desired.describes(&holder) {
            debug!("{} already refers to the desired device", alias);
            return Ok(None);
        }

        let temp = temp_name_candidates(alias)
            .into_iter()
            .find(|candidate| !interfaces.iter().any(|i| &i.name == candidate))
            .ok_or_else(|| IdentityError::NoFreeTemporaryName {
                alias: alias.to_string(),
            })?;

        self.inventory
            .rename(alias, &temp)
            .map_err(|e| IdentityError::Rename {
                from: alias.to_string(),
                to: temp.clone(),
                reason: e.to_string(),
            })?;
        warn!(
            "alias {} was held by {} ({}); moved it to {}",
            alias,
            holder.name,
            holder.pci_address.as_deref().unwrap_or("no pci"),
            temp
        );

        // A role that followed the old holder by name must follow it to its new name.
        for role in Role::ALL {
            let ident = self.identities.get_mut(role);
            if ident.effective_name.as_deref() == Some(alias) && ident.describes(&holder) {
                ident.effective_name = Some(temp.clone());
            }
        }

        let record = RenameConflictRecord {
            alias: alias.to_string(),
            prior_occupant_pci: holder.pci_address.clone(),
            prior_occupant_mac: holder.mac_address.clone(),
            relocated_to: temp,
            timestamp: Local::now(),
        };
        if let Err(e) = self.conflicts.append(&record) {
            warn!(
                "could not append to {}: {}",
                self.conflicts.path().display(),
                e
            );
        }
        Ok(Some(record))
    }

    /// Give the role's device the name `alias`
    pub fn bind_alias(&mut self, role: Role, alias: &str) -> Result<(), IdentityError> {
        validate_alias(alias)?;
        let desired = self.identity(role)?.clone();
        let interfaces = self.inventory.interfaces()?;
        let current = resolve_among(&desired, &interfaces)
            .map(|i| i.name.clone())
            .ok_or(IdentityError::NotFound { role })?;

        if current != alias {
            self.free_reserved_name(alias, &desired)?;
            self.inventory
                .rename(&current, alias)
                .map_err(|e| IdentityError::Rename {
                    from: current.clone(),
                    to: alias.to_string(),
                    reason: e.to_string(),
                })?;
            info!("{} role: {} is now {}", role, current, alias);
        }

        self.identities.get_mut(role).effective_name = Some(alias.to_string());
        Ok(())
    }

    /// Fail if any two configured roles are the same physical device
    pub fn check_unique(&self) -> Result<(), IdentityError> {
        let configured: Vec<(Role, &HardwareIdentity)> = self.identities.configured().collect();

        for (i, (first, a)) in configured.iter().enumerate() {
            for (second, b) in configured.iter().skip(i + 1) {
                if a.same_device(b) {
                    return Err(IdentityError::DuplicateDevice {
                        first: *first,
                        second: *second,
                        detail: a.shared_fact(b),
                    });
                }
            }
        }

        let interfaces = self.inventory.interfaces()?;
        let mut seen: Vec<(Role, &str)> = Vec::new();
        for (role, ident) in &configured {
            let Some(iface) = resolve_among(ident, &interfaces) else {
                continue;
            };
            if let Some((other, _)) = seen.iter().find(|(_, name)| *name == iface.name) {
                return Err(IdentityError::DuplicateDevice {
                    first: *other,
                    second: *role,
                    detail: format!("both resolve to interface {}", iface.name),
                });
            }
            seen.push((*role, iface.name.as_str()));
        }
        Ok(())
    }

    /// Bind every alias in the plan, after checking it cannot collide
    pub fn apply_rename_plan(&mut self, plan: &RenamePlan) -> Result<(), IdentityError> {
        let bindings = plan.bindings();
        for (i, (role_a, alias_a)) in bindings.iter().enumerate() {
            validate_alias(alias_a)?;
            self.identity(*role_a)?;
            for (role_b, alias_b) in bindings.iter().skip(i + 1) {
                if role_a == role_b {
                    return Err(IdentityError::InvalidPlan(format!(
                        "{} role appears twice",
                        role_a
                    )));
                }
                if alias_a == alias_b {
                    return Err(IdentityError::DuplicateAlias {
                        alias: alias_a.clone(),
                        first: *role_a,
                        second: *role_b,
                    });
                }
            }
        }

        self.check_unique()?;

        for (role, alias) in bindings {
            self.bind_alias(*role, alias)?;
        }

        self.check_unique()
    }

    /// Re-resolve every configured role and record its effective name
    pub fn refresh_effective_names(&mut self) -> Vec<(Role, Result<String, IdentityError>)> {
        let roles: Vec<Role> = self.identities.configured().map(|(r, _)| r).collect();
        let mut out = Vec::new();
        for role in roles {
            let result = self.resolve(role);
            if let Ok(name) = &result {
                self.identities.get_mut(role).effective_name = Some(name.clone());
            }
            out.push((role, result));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netif::FakeInventory;
    use tempfile::TempDir;

    fn nic(name: &str, pci: &str, mac: &str) -> InterfaceInfo {
        InterfaceInfo::physical(name, Some(pci), Some(mac))
    }

    #[test]
    fn test_normalize_pci() {
        assert_eq!(normalize_pci("03:00.0").as_deref(), Some("0000:03:00.0"));
        assert_eq!(normalize_pci("0000:3B:00.1").as_deref(), Some("0000:3b:00.1"));
        assert_eq!(normalize_pci("pci@0001:03:1f.7").as_deref(), Some("0001:03:1f.7"));
        assert_eq!(normalize_pci(" 3:0.0 ").as_deref(), Some("0000:03:00.0"));
        assert!(normalize_pci("03:00").is_none());
        assert!(normalize_pci("0000:03:00.8").is_none());
        assert!(normalize_pci("usb1").is_none());
        assert!(normalize_pci("1-1:1.0").is_none());
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("AA-BB-CC-DD-EE-0F").as_deref(),
            Some("aa:bb:cc:dd:ee:0f")
        );
        assert_eq!(
            normalize_mac("aabb.ccdd.ee0f").as_deref(),
            Some("aa:bb:cc:dd:ee:0f")
        );
        assert_eq!(
            normalize_mac("a:b:c:d:e:f").as_deref(),
            Some("0a:0b:0c:0d:0e:0f")
        );
        assert!(normalize_mac("aa:bb:cc").is_none());
        assert!(normalize_mac("zz:bb:cc:dd:ee:ff").is_none());
    }

    #[test]
    fn test_resolve_priority_pci_over_mac() {
        // Effective name is stale, PCI points at one NIC, MAC at another.
        let ident = HardwareIdentity {
            selected_name: Some("eth0".into()),
            pci_address: Some("0000:04:00.0".into()),
            mac_address: Some("aa:aa:aa:aa:aa:01".into()),
            effective_name: Some("gone0".into()),
        };
        let ifaces = vec![
            nic("enp3s0", "0000:03:00.0", "aa:aa:aa:aa:aa:01"),
            nic("enp4s0", "0000:04:00.0", "aa:aa:aa:aa:aa:02"),
        ];
        assert_eq!(resolve_among(&ident, &ifaces).unwrap().name, "enp4s0");
    }

    #[test]
    fn test_resolve_skips_virtual_effective_name() {
        let ident = HardwareIdentity {
            selected_name: None,
            pci_address: None,
            mac_address: Some("aa:aa:aa:aa:aa:01".into()),
            effective_name: Some("br0".into()),
        };
        let mut bridge = nic("br0", "0000:09:00.0", "aa:aa:aa:aa:aa:01");
        bridge.pci_address = None;
        bridge.is_bridge = true;
        let ifaces = vec![bridge, nic("eno1", "0000:03:00.0", "aa:aa:aa:aa:aa:01")];
        assert_eq!(resolve_among(&ident, &ifaces).unwrap().name, "eno1");
    }

    #[test]
    fn test_resolve_effective_name_contradicted_by_pci() {
        let ident = HardwareIdentity {
            selected_name: Some("eno1".into()),
            pci_address: Some("0000:04:00.0".into()),
            mac_address: None,
            effective_name: Some("mgt".into()),
        };
        // Somebody else now carries "mgt".
        let ifaces = vec![
            nic("mgt", "0000:03:00.0", "aa:aa:aa:aa:aa:01"),
            nic("mgto0", "0000:04:00.0", "aa:aa:aa:aa:aa:02"),
        ];
        assert_eq!(resolve_among(&ident, &ifaces).unwrap().name, "mgto0");
    }

    #[test]
    fn test_resolve_falls_back_to_selected_name() {
        let ident = HardwareIdentity {
            selected_name: Some("eth5".into()),
            ..Default::default()
        };
        let mut iface = InterfaceInfo::physical("eth5", None, None);
        iface.is_virtual = true;
        assert_eq!(resolve_among(&ident, &[iface]).unwrap().name, "eth5");
        assert!(resolve_among(&ident, &[]).is_none());
    }

    #[test]
    fn test_resolve_idempotent() {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::in_dir(dir.path());
        let inv = FakeInventory::new(vec![nic("eno1", "0000:03:00.0", "aa:aa:aa:aa:aa:01")]);
        let mut snapshot = IdentitySnapshot::default();
        snapshot.set(
            Role::Management,
            HardwareIdentity {
                pci_address: Some("0000:03:00.0".into()),
                ..Default::default()
            },
        );
        let resolver = IdentityResolver::new(&inv, &log, &mut snapshot);
        let first = resolver.resolve(Role::Management).unwrap();
        let second = resolver.resolve(Role::Management).unwrap();
        assert_eq!(first, second);
        assert!(inv.renames().is_empty());
    }

    #[test]
    fn test_resolve_unselected_role() {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::in_dir(dir.path());
        let inv = FakeInventory::default();
        let mut snapshot = IdentitySnapshot::default();
        let resolver = IdentityResolver::new(&inv, &log, &mut snapshot);
        assert!(matches!(
            resolver.resolve(Role::Cluster),
            Err(IdentityError::NotSelected { role: Role::Cluster })
        ));
    }

    #[test]
    fn test_free_reserved_name_noop_when_already_bound() {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::in_dir(dir.path());
        let inv = FakeInventory::new(vec![nic("mgt", "0000:04:00.0", "aa:aa:aa:aa:aa:02")]);
        let mut snapshot = IdentitySnapshot::default();
        let desired = HardwareIdentity {
            pci_address: Some("0000:04:00.0".into()),
            ..Default::default()
        };
        let mut resolver = IdentityResolver::new(&inv, &log, &mut snapshot);
        assert!(resolver.free_reserved_name("mgt", &desired).unwrap().is_none());
        assert!(inv.renames().is_empty());
        assert!(log.records().unwrap().is_empty());
    }

    #[test]
    fn test_temp_candidates_respect_ifnamsiz() {
        let names = temp_name_candidates("averyveryverylongalias");
        assert!(names.iter().all(|n| n.len() <= MAX_IFNAME_LEN));
        assert_eq!(temp_name_candidates("mgt")[0], "mgto0");
        assert_eq!(temp_name_candidates("mgt").last().unwrap(), "hpx3");
    }

    #[test]
    fn test_free_reserved_name_skips_taken_candidates() {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::in_dir(dir.path());
        let inv = FakeInventory::new(vec![
            nic("mgt", "0000:03:00.0", "aa:aa:aa:aa:aa:01"),
            nic("mgto0", "0000:05:00.0", "aa:aa:aa:aa:aa:05"),
        ]);
        let mut snapshot = IdentitySnapshot::default();
        let desired = HardwareIdentity {
            pci_address: Some("0000:04:00.0".into()),
            ..Default::default()
        };
        let mut resolver = IdentityResolver::new(&inv, &log, &mut snapshot);
        let record = resolver.free_reserved_name("mgt", &desired).unwrap().unwrap();
        assert_eq!(record.relocated_to, "mgto1");
    }

    #[test]
    fn test_validate_alias() {
        assert!(validate_alias("mgt").is_ok());
        assert!(validate_alias("").is_err());
        assert!(validate_alias("has space").is_err());
        assert!(validate_alias("sixteen-chars-xx").is_err());
        assert!(validate_alias("..").is_err());
    }

    #[test]
    fn test_same_device_rules() {
        let a = HardwareIdentity {
            pci_address: Some("0000:03:00.0".into()),
            mac_address: Some("aa:aa:aa:aa:aa:01".into()),
            ..Default::default()
        };
        let b = HardwareIdentity {
            pci_address: Some("0000:04:00.0".into()),
            mac_address: Some("aa:aa:aa:aa:aa:01".into()),
            ..Default::default()
        };
        // PCI differs, MAC is not consulted.
        assert!(!a.same_device(&b));

        let c = HardwareIdentity {
            mac_address: Some("aa:aa:aa:aa:aa:01".into()),
            ..Default::default()
        };
        let d = HardwareIdentity {
            mac_address: Some("aa:aa:aa:aa:aa:01".into()),
            ..Default::default()
        };
        assert!(c.same_device(&d));
        // PCI missing on one side only.
        assert!(!a.same_device(&c));
    }

    #[test]
    fn test_snapshot_kv_round_trip_normalizes() {
        let mut map = BTreeMap::new();
        map.insert("MGT_NIC".to_string(), "eno1".to_string());
        map.insert("MGT_NIC_PCI".to_string(), "03:00.0".to_string());
        map.insert("MGT_NIC_MAC".to_string(), "AA-BB-CC-DD-EE-FF".to_string());
        map.insert("MGT_NIC_EFFECTIVE".to_string(), "mgt".to_string());
        map.insert("CLUSTER_NIC".to_string(), "".to_string());

        let snapshot = IdentitySnapshot::from_kv(&map);
        let mgt = snapshot.get(Role::Management).unwrap();
        assert_eq!(mgt.pci_address.as_deref(), Some("0000:03:00.0"));
        assert_eq!(mgt.mac_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert!(snapshot.get(Role::Cluster).is_none());

        let kv = snapshot.to_kv();
        assert_eq!(kv.len(), 12);
        assert!(IdentitySnapshot::owns_key("HOST_NIC_EFFECTIVE"));
        assert!(!IdentitySnapshot::owns_key("LAST_COMPLETED_STEP"));
    }
}
