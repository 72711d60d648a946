//! Hardware identity: alias reclaiming, rename plans, uniqueness.

use hostprep_common::audit::ConflictLog;
use hostprep_common::identity::{
    HardwareIdentity, IdentityError, IdentityResolver, IdentitySnapshot, RenamePlan, Role,
};
use hostprep_common::netif::{FakeInventory, InterfaceInfo, InterfaceInventory};
use tempfile::TempDir;

fn nic(name: &str, pci: &str, mac: &str) -> InterfaceInfo {
    InterfaceInfo::physical(name, Some(pci), Some(mac))
}

fn selected(iface: &InterfaceInfo) -> HardwareIdentity {
    HardwareIdentity::from_interface(iface)
}

#[test]
fn test_reclaim_alias_from_other_device() {
    let dir = TempDir::new().unwrap();
    let conflicts = ConflictLog::in_dir(dir.path());
    let holder = nic("mgt", "0000:03:00.0", "52:54:00:00:00:03");
    let wanted = nic("enp4s0", "0000:04:00.0", "52:54:00:00:00:04");
    let inventory = FakeInventory::new(vec![holder, wanted.clone()]);

    let mut identities = IdentitySnapshot::default();
    identities.set(Role::Management, selected(&wanted));
    let mut resolver = IdentityResolver::new(&inventory, &conflicts, &mut identities);

    let desired = resolver.identities().get(Role::Management).cloned().unwrap();
    let record = resolver
        .free_reserved_name("mgt", &desired)
        .unwrap()
        .expect("holder should have been moved");
    assert_eq!(record.relocated_to, "mgto0");
    assert_eq!(record.prior_occupant_pci.as_deref(), Some("0000:03:00.0"));

    resolver.bind_alias(Role::Management, "mgt").unwrap();
    assert_eq!(resolver.resolve(Role::Management).unwrap(), "mgt");

    let names: Vec<String> = inventory
        .interfaces()
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["mgt".to_string(), "mgto0".to_string()]);

    let records = conflicts.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].alias, "mgt");
    assert_eq!(
        identities.get(Role::Management).unwrap().effective_name.as_deref(),
        Some("mgt")
    );
}

#[test]
fn test_bind_alias_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let conflicts = ConflictLog::in_dir(dir.path());
    let wanted = nic("enp4s0", "0000:04:00.0", "52:54:00:00:00:04");
    let inventory = FakeInventory::new(vec![wanted.clone()]);
    let mut identities = IdentitySnapshot::default();
    identities.set(Role::Cluster, selected(&wanted));

    let mut resolver = IdentityResolver::new(&inventory, &conflicts, &mut identities);
    resolver.bind_alias(Role::Cluster, "clu").unwrap();
    resolver.bind_alias(Role::Cluster, "clu").unwrap();

    assert_eq!(inventory.renames().len(), 1);
    assert!(conflicts.records().unwrap().is_empty());
}

#[test]
fn test_rename_plan_swaps_names() {
    let dir = TempDir::new().unwrap();
    let conflicts = ConflictLog::in_dir(dir.path());
    // Each role's device currently carries the other role's alias.
    let a = nic("clu", "0000:03:00.0", "52:54:00:00:00:03");
    let b = nic("mgt", "0000:04:00.0", "52:54:00:00:00:04");
    let inventory = FakeInventory::new(vec![a.clone(), b.clone()]);
    let mut identities = IdentitySnapshot::default();
    identities.set(Role::Management, selected(&a));
    identities.set(Role::Cluster, selected(&b));

    let mut resolver = IdentityResolver::new(&inventory, &conflicts, &mut identities);
    let plan = RenamePlan::new()
        .bind(Role::Management, "mgt")
        .bind(Role::Cluster, "clu");
    resolver.apply_rename_plan(&plan).unwrap();

    let live = inventory.interfaces().unwrap();
    let by_pci = |pci: &str| {
        live.iter()
            .find(|i| i.pci_address.as_deref() == Some(pci))
            .map(|i| i.name.clone())
            .unwrap()
    };
    assert_eq!(by_pci("0000:03:00.0"), "mgt");
    assert_eq!(by_pci("0000:04:00.0"), "clu");
    assert_eq!(resolver.resolve(Role::Management).unwrap(), "mgt");
    assert_eq!(resolver.resolve(Role::Cluster).unwrap(), "clu");
    assert_eq!(conflicts.records().unwrap().len(), 1);
}

#[test]
fn test_shared_pci_is_rejected_before_any_rename() {
    let dir = TempDir::new().unwrap();
    let conflicts = ConflictLog::in_dir(dir.path());
    let port = nic("enp3s0", "0000:03:00.0", "52:54:00:00:00:03");
    let inventory = FakeInventory::new(vec![port.clone(), nic("enp5s0", "0000:05:00.0", "52:54:00:00:00:05")]);
    let mut identities = IdentitySnapshot::default();
    identities.set(Role::Management, selected(&port));
    let mut twin = selected(&port);
    twin.selected_name = Some("enp5s0".into());
    twin.mac_address = Some("52:54:00:00:00:05".into());
    identities.set(Role::HostAccess, twin);

    let mut resolver = IdentityResolver::new(&inventory, &conflicts, &mut identities);
    let plan = RenamePlan::new()
        .bind(Role::Management, "mgt")
        .bind(Role::HostAccess, "hst");
    match resolver.apply_rename_plan(&plan) {
        Err(IdentityError::DuplicateDevice { first, second, .. }) => {
            assert_eq!(first, Role::Management);
            assert_eq!(second, Role::HostAccess);
        }
        other => panic!("expected DuplicateDevice, got {:?}", other),
    }
    assert!(inventory.renames().is_empty());
}

#[test]
fn test_duplicate_alias_in_plan() {
    let dir = TempDir::new().unwrap();
    let conflicts = ConflictLog::in_dir(dir.path());
    let a = nic("enp3s0", "0000:03:00.0", "52:54:00:00:00:03");
    let b = nic("enp4s0", "0000:04:00.0", "52:54:00:00:00:04");
    let inventory = FakeInventory::new(vec![a.clone(), b.clone()]);
    let mut identities = IdentitySnapshot::default();
    identities.set(Role::Management, selected(&a));
    identities.set(Role::Cluster, selected(&b));

    let mut resolver = IdentityResolver::new(&inventory, &conflicts, &mut identities);
    let plan = RenamePlan::new()
        .bind(Role::Management, "lan0")
        .bind(Role::Cluster, "lan0");
    assert!(matches!(
        resolver.apply_rename_plan(&plan),
        Err(IdentityError::DuplicateAlias { .. })
    ));
    assert!(inventory.renames().is_empty());
}

#[test]
fn test_refresh_follows_kernel_renames() {
    let dir = TempDir::new().unwrap();
    let conflicts = ConflictLog::in_dir(dir.path());
    let a = nic("eth0", "0000:03:00.0", "52:54:00:00:00:03");
    let inventory = FakeInventory::new(vec![a.clone()]);
    let mut identities = IdentitySnapshot::default();
    identities.set(Role::Management, selected(&a));

    inventory.kernel_rename("eth0", "enp3s0");
    let mut resolver = IdentityResolver::new(&inventory, &conflicts, &mut identities);
    let refreshed = resolver.refresh_effective_names();
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].1.as_deref().unwrap(), "enp3s0");
    assert_eq!(
        identities.get(Role::Management).unwrap().effective_name.as_deref(),
        Some("enp3s0")
    );
}
