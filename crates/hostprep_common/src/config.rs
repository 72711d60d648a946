//! Configuration
//!
//! Plain `KEY=VALUE` file, reloaded before every menu action. A missing file
//! or a missing key is never an error: every known key has a built-in
//! default. Unknown keys are kept so that hand edits survive a rewrite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::identity::Role;
use crate::kvfile;
use crate::steps::StepId;
use crate::version::ProductVersion;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostprep/hostprep.conf";

pub const KEY_PRODUCT_VERSION: &str = "PRODUCT_VERSION";
pub const KEY_DRY_RUN: &str = "DRY_RUN";
pub const KEY_AUTO_REBOOT: &str = "AUTO_REBOOT";
pub const KEY_REBOOT_AFTER_STEPS: &str = "REBOOT_AFTER_STEPS";
pub const KEY_REBOOT_DELAY_SECS: &str = "REBOOT_DELAY_SECS";
pub const KEY_POLL_TIMEOUT_SECS: &str = "POLL_TIMEOUT_SECS";
pub const KEY_POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";

/// How a value is validated by `Config::set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Flag,
    Number,
    Version,
    StepList,
    Alias,
}

/// Known keys, their defaults and what they accept
const KNOWN_KEYS: &[(&str, &str, ValueKind)] = &[
    (KEY_PRODUCT_VERSION, "6.2.1", ValueKind::Version),
    (KEY_DRY_RUN, "no", ValueKind::Flag),
    (KEY_AUTO_REBOOT, "yes", ValueKind::Flag),
    (
        KEY_REBOOT_AFTER_STEPS,
        "04_nic_rename 05_kvm_packages",
        ValueKind::StepList,
    ),
    (KEY_REBOOT_DELAY_SECS, "5", ValueKind::Number),
    ("HOSTNAME", "hv01", ValueKind::Text),
    ("HOST_DOMAIN", "local", ValueKind::Text),
    ("MGT_NIC", "", ValueKind::Text),
    ("CLUSTER_NIC", "", ValueKind::Text),
    ("HOST_NIC", "", ValueKind::Text),
    ("MGT_ALIAS", "mgt", ValueKind::Alias),
    ("CLUSTER_ALIAS", "clu", ValueKind::Alias),
    ("HOST_ALIAS", "hst", ValueKind::Alias),
    ("LIBVIRT_NETWORK", "host-bridge", ValueKind::Text),
    ("BRIDGE_NAME", "br-host", ValueKind::Alias),
    ("STORAGE_DEVICE", "/dev/sdb", ValueKind::Text),
    ("STORAGE_POOL", "vmpool", ValueKind::Text),
    ("STORAGE_MOUNT", "/var/lib/hostprep/pool", ValueKind::Text),
    ("VM_NAME", "guest01", ValueKind::Text),
    (
        "VM_IMAGE_URL",
        "https://cloud.debian.org/images/cloud/bookworm/latest/debian-12-generic-amd64.qcow2",
        ValueKind::Text,
    ),
    ("VM_MEMORY_MB", "4096", ValueKind::Number),
    ("VM_VCPUS", "2", ValueKind::Number),
    (KEY_POLL_TIMEOUT_SECS, "120", ValueKind::Number),
    (KEY_POLL_INTERVAL_SECS, "3", ValueKind::Number),
];

fn known(key: &str) -> Option<&'static (&'static str, &'static str, ValueKind)> {
    KNOWN_KEYS.iter().find(|(k, _, _)| *k == key)
}

/// Parse a yes/no style flag
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "true" | "on" => Some(true),
        "0" | "n" | "no" | "false" | "off" | "" => Some(false),
        _ => None,
    }
}

/// One line of `config --show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub is_default: bool,
}

/// Loaded configuration
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    values: BTreeMap<String, String>,
    /// In-memory overrides (command-line flags); never written back
    overrides: BTreeMap<String, String>,
}

impl Config {
    /// Load from disk. Never fails: unreadable means defaults.
    pub fn load(path: &Path) -> Self {
        let values = match kvfile::read(path) {
            Ok(Some(values)) => values,
            Ok(None) => {
                debug!("no config at {}, using defaults", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("cannot read {}: {}; using defaults", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            values,
            overrides: BTreeMap::new(),
        }
    }

    /// Build from file content (tests, previews)
    pub fn from_content(path: &Path, content: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            values: kvfile::parse(content),
            overrides: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective value: override, then file, then default, then empty
    pub fn get(&self, key: &str) -> &str {
        if let Some(v) = self.overrides.get(key) {
            return v;
        }
        if let Some(v) = self.values.get(key) {
            return v;
        }
        known(key).map(|(_, default, _)| *default).unwrap_or("")
    }

    /// Non-empty effective value
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        Some(self.get(key)).filter(|v| !v.trim().is_empty())
    }

    pub fn flag(&self, key: &str) -> bool {
        match parse_flag(self.get(key)) {
            Some(v) => v,
            None => {
                let default = known(key).map(|(_, d, _)| *d).unwrap_or("no");
                warn!("{}={:?} is not a flag; using {}", key, self.get(key), default);
                parse_flag(default).unwrap_or(false)
            }
        }
    }

    pub fn number(&self, key: &str) -> u64 {
        match self.get(key).trim().parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                let default = known(key).map(|(_, d, _)| *d).unwrap_or("0");
                warn!("{}={:?} is not a number; using {}", key, self.get(key), default);
                default.parse().unwrap_or(0)
            }
        }
    }

    pub fn product_version(&self) -> &str {
        self.get(KEY_PRODUCT_VERSION)
    }

    pub fn dry_run(&self) -> bool {
        self.flag(KEY_DRY_RUN)
    }

    pub fn auto_reboot(&self) -> bool {
        self.flag(KEY_AUTO_REBOOT)
    }

    /// Raw reboot trigger ids, split on spaces and commas
    pub fn reboot_triggers(&self) -> Vec<String> {
        self.get(KEY_REBOOT_AFTER_STEPS)
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn reboot_delay(&self) -> Duration {
        Duration::from_secs(self.number(KEY_REBOOT_DELAY_SECS))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.number(KEY_POLL_TIMEOUT_SECS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.number(KEY_POLL_INTERVAL_SECS).max(1))
    }

    /// Interface name preselected for a role, if configured
    pub fn preferred_nic(&self, role: Role) -> Option<&str> {
        self.get_opt(&format!("{}_NIC", role.key_prefix()))
    }

    /// Stable alias a role's NIC gets renamed to
    pub fn alias(&self, role: Role) -> &str {
        self.get(&format!("{}_ALIAS", role.key_prefix()))
    }

    /// Override a value for this process only
    pub fn set_override(&mut self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), value.to_string());
    }

    /// Validate and store a value; call `save` to persist
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ProvisionError> {
        let invalid = |reason: String| ProvisionError::InvalidConfig {
            key: key.to_string(),
            reason,
        };
        if !kvfile::is_valid_key(key) {
            return Err(invalid("keys are upper-case letters, digits and '_'".into()));
        }
        let value = value.trim();
        if let Some((_, _, kind)) = known(key) {
            match kind {
                ValueKind::Text => {}
                ValueKind::Flag => {
                    if parse_flag(value).is_none() {
                        return Err(invalid(format!("{:?} is not yes/no", value)));
                    }
                }
                ValueKind::Number => {
                    if value.parse::<u64>().is_err() {
                        return Err(invalid(format!("{:?} is not a number", value)));
                    }
                }
                ValueKind::Version => {
                    if let Err(e) = value.parse::<ProductVersion>() {
                        return Err(invalid(e.to_string()));
                    }
                }
                ValueKind::StepList => {
                    for id in value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                    {
                        if StepId::parse(id).is_none() {
                            return Err(invalid(format!("unknown step {:?}", id)));
                        }
                    }
                }
                ValueKind::Alias => {
                    crate::identity::validate_alias(value).map_err(|e| invalid(e.to_string()))?;
                }
            }
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Rewrite the file atomically. Known keys first, in catalog order.
    pub fn save(&self) -> Result<(), ProvisionError> {
        let mut entries: Vec<(&str, &str)> = Vec::new();
        for (key, _, _) in KNOWN_KEYS {
            if let Some(v) = self.values.get(*key) {
                entries.push((*key, v.as_str()));
            }
        }
        for (key, value) in &self.values {
            if known(key).is_none() {
                entries.push((key.as_str(), value.as_str()));
            }
        }
        let mut content = String::from("# hostprep configuration\n");
        content.push_str(&kvfile::render(entries));
        kvfile::atomic_write(&self.path, content.as_bytes()).map_err(|source| {
            ProvisionError::ConfigPersist {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Every known key plus any extra keys from the file
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let mut out: Vec<ConfigEntry> = KNOWN_KEYS
            .iter()
            .map(|(key, _, _)| ConfigEntry {
                key: key.to_string(),
                value: self.get(key).to_string(),
                is_default: !self.values.contains_key(*key) && !self.overrides.contains_key(*key),
            })
            .collect();
        for (key, value) in &self.values {
            if known(key).is_none() {
                out.push(ConfigEntry {
                    key: key.clone(),
                    value: value.clone(),
                    is_default: false,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.conf"));
        assert_eq!(config.product_version(), "6.2.1");
        assert!(!config.dry_run());
        assert!(config.auto_reboot());
        // Interface renames and the KVM kernel modules need a fresh boot.
        assert_eq!(config.reboot_triggers(), vec!["04_nic_rename", "05_kvm_packages"]);
        assert_eq!(config.alias(Role::Management), "mgt");
        assert_eq!(config.poll_timeout(), Duration::from_secs(120));
        assert!(config.preferred_nic(Role::Cluster).is_none());
        assert_eq!(config.get("NOT_A_KEY"), "");
    }

    #[test]
    fn test_file_values_and_junk_lines() {
        let config = Config::from_content(
            Path::new("/tmp/x.conf"),
            "DRY_RUN=yes\nthis is junk\nREBOOT_AFTER_STEPS=\"03_nic_ifupdown, 07_libvirt_network\"\nPOLL_TIMEOUT_SECS=abc\n",
        );
        assert!(config.dry_run());
        assert_eq!(
            config.reboot_triggers(),
            vec!["03_nic_ifupdown".to_string(), "07_libvirt_network".to_string()]
        );
        // Unparsable number falls back to the default.
        assert_eq!(config.poll_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_set_validates_known_keys() {
        let mut config = Config::from_content(Path::new("/tmp/x.conf"), "");
        assert!(config.set("DRY_RUN", "maybe").is_err());
        assert!(config.set("VM_VCPUS", "four").is_err());
        assert!(config.set("PRODUCT_VERSION", "latest").is_err());
        assert!(config.set("REBOOT_AFTER_STEPS", "03_nic_ifupdown 99_bogus").is_err());
        assert!(config.set("MGT_ALIAS", "way-too-long-alias").is_err());
        assert!(config.set("lower", "x").is_err());

        config.set("PRODUCT_VERSION", "6.10.0").unwrap();
        config.set("CUSTOM_KEY", "anything").unwrap();
        assert_eq!(config.product_version(), "6.10.0");
    }

    #[test]
    fn test_save_round_trip_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostprep.conf");
        let mut config = Config::load(&path);
        config.set("HOSTNAME", "node 7").unwrap();
        config.set("SITE_TAG", "rack-4").unwrap();
        config.save().unwrap();

        let reloaded = Config::load(&path);
        assert_eq!(reloaded.get("HOSTNAME"), "node 7");
        assert_eq!(reloaded.get("SITE_TAG"), "rack-4");
        let entries = reloaded.entries();
        let host = entries.iter().find(|e| e.key == "HOSTNAME").unwrap();
        assert!(!host.is_default);
        let vcpus = entries.iter().find(|e| e.key == "VM_VCPUS").unwrap();
        assert!(vcpus.is_default);
    }

    #[test]
    fn test_override_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostprep.conf");
        let mut config = Config::load(&path);
        config.set_override(KEY_DRY_RUN, "yes");
        assert!(config.dry_run());
        config.save().unwrap();
        assert!(!Config::load(&path).dry_run());
    }
}
