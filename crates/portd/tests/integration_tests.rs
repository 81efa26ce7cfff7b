//! Integration tests for portd
//!
//! Drives the reconciliation engine against the in-memory kernel and store:
//! - Startup reconciliation, idempotence and convergence
//! - Incremental primary and secondary updates
//! - Connected-route bookkeeping across address changes
//! - Snapshot reload and persistence

use pretty_assertions::assert_eq;
use sonic_portd::connected_route::connected_routes;
use sonic_portd::mock::{KernelOp, MockTransport};
use sonic_portd::{
    diff_ports, AddressFamily, AddressSet, ColumnChanges, DesiredStateStore, L3Sync, MemoryStore,
    NetAddress, PortRow, PortdError, VrfRow,
};

const VRF: &str = "vrf_default";

fn row(name: &str, ip4: Option<&str>, ip6: Option<&str>, secondary4: &[&str]) -> PortRow {
    PortRow {
        name: name.to_string(),
        ip4_address: ip4.map(str::to_string),
        ip6_address: ip6.map(str::to_string),
        ip4_address_secondary: secondary4.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn store_with(ports: Vec<PortRow>) -> MemoryStore {
    MemoryStore::with_vrfs(vec![VrfRow {
        name: VRF.to_string(),
        ports,
    }])
}

fn set(addrs: &[&str]) -> AddressSet {
    addrs.iter().map(|a| NetAddress::new(*a)).collect()
}

fn routes_for(store: &MemoryStore, port: &str) -> Vec<String> {
    connected_routes(store)
        .into_iter()
        .filter(|r| r.port.as_deref() == Some(port))
        .map(|r| r.prefix)
        .collect()
}

#[test]
fn test_new_primary_creates_connected_route() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth1"]));
    let mut store = store_with(vec![]);

    sync.sync_port(
        &mut store,
        VRF,
        &row("eth1", Some("10.0.0.5/24"), None, &[]),
        ColumnChanges::all(),
    );

    assert_eq!(sync.transport().ops(), &[KernelOp::add("eth1", "10.0.0.5/24")]);
    let routes = store.routes();
    assert_eq!(routes.len(), 1);
    let (_, route) = routes[0];
    assert_eq!(route.prefix, "10.0.0.0/24");
    assert_eq!(route.vrf, VRF);
    assert_eq!(route.from, "connected");
    assert_eq!(route.sub_address_family.as_deref(), Some("unicast"));
    assert_eq!(route.address_family, Some(AddressFamily::Ipv4));
    assert_eq!(route.distance, 0);
    assert!(route.selected);
    assert_eq!(route.nexthops.len(), 1);
    assert_eq!(store.nexthop(route.nexthops[0]).unwrap().ports, vec!["eth1"]);
    assert!(store.is_dirty());
}

#[test]
fn test_primary_change_same_subnet() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth1"]));
    let mut store = store_with(vec![]);
    sync.sync_port(
        &mut store,
        VRF,
        &row("eth1", Some("10.0.0.5/24"), None, &[]),
        ColumnChanges::all(),
    );
    sync.transport_mut().take_ops();

    let stats = sync.sync_port(
        &mut store,
        VRF,
        &row("eth1", Some("10.0.0.9/24"), None, &[]),
        ColumnChanges::none(),
    );

    assert_eq!(
        sync.transport().ops(),
        &[
            KernelOp::delete("eth1", "10.0.0.5/24"),
            KernelOp::add("eth1", "10.0.0.9/24"),
        ]
    );
    assert_eq!(stats.routes_deleted, 1);
    assert_eq!(stats.routes_added, 1);
    assert_eq!(routes_for(&store, "eth1"), vec!["10.0.0.0/24"]);
    assert_eq!(store.nexthop_count(), 1);
}

#[test]
fn test_secondary_list_change() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth2"]));
    let mut store = store_with(vec![]);
    let before = row("eth2", None, None, &["192.168.1.1/24", "192.168.1.2/24"]);
    sync.sync_port(&mut store, VRF, &before, ColumnChanges::all());
    sync.transport_mut().take_ops();

    let after = row("eth2", None, None, &["192.168.1.2/24", "192.168.1.3/24"]);
    sync.sync_port(
        &mut store,
        VRF,
        &after,
        ColumnChanges::between(Some(&before), &after),
    );

    assert_eq!(
        sync.transport().ops(),
        &[
            KernelOp::delete_secondary("eth2", "192.168.1.1/24"),
            KernelOp::add_secondary("eth2", "192.168.1.3/24"),
        ]
    );
    assert_eq!(
        sync.transport().addresses("eth2", AddressFamily::Ipv4),
        set(&["192.168.1.2/24", "192.168.1.3/24"])
    );
}

#[test]
fn test_startup_removes_unknown_interface_addresses() {
    let mut mock = MockTransport::new();
    mock.seed("eth3", "172.16.0.1/16");
    let mut sync = L3Sync::new(mock);
    let mut store = store_with(vec![row("eth1", None, None, &[])]);

    sync.reconcile_on_init(&mut store);

    assert_eq!(sync.transport().ops(), &[KernelOp::delete("eth3", "172.16.0.1/16")]);
    assert!(sync.port("eth3").is_none());
    assert!(sync.transport().configured_interfaces().is_empty());
}

#[test]
fn test_startup_is_idempotent() {
    let mut mock = MockTransport::with_interfaces(&["eth1", "eth2"]);
    mock.seed("eth1", "10.0.0.77/24");
    mock.seed("eth2", "2001:db8:2::9/64");
    let mut store = store_with(vec![
        row("eth1", Some("10.0.0.5/24"), Some("2001:db8::5/64"), &[]),
        row("eth2", None, None, &["10.2.0.1/24"]),
    ]);
    let mut sync = L3Sync::new(mock);

    let first = sync.reconcile_on_init(&mut store);
    assert!(!first.is_noop());
    let routes_after_first = connected_routes(&store);

    sync.transport_mut().take_ops();
    let second = sync.reconcile_on_init(&mut store);

    assert!(second.is_noop());
    assert!(sync.transport().ops().is_empty());
    assert_eq!(connected_routes(&store), routes_after_first);
}

#[test]
fn test_startup_converges_kernel_to_desired() {
    let mut mock = MockTransport::with_interfaces(&["eth1", "eth2", "eth3", "eth4"]);
    mock.seed("eth1", "10.0.0.5/24");
    mock.seed("eth1", "10.0.0.6/24");
    mock.seed("eth1", "2001:db8::99/64");
    mock.seed("eth2", "10.2.0.1/24");
    mock.seed("eth3", "172.16.0.1/16");
    mock.seed("eth3", "2001:db8:3::1/64");
    mock.seed_link_local("eth1", "fe80::1/64");

    let mut desired_eth2 = row("eth2", None, Some("2001:db8:2::1/64"), &["10.2.0.1/24"]);
    desired_eth2.ip6_address_secondary = vec!["2001:db8:2::2/64".to_string()];
    let mut store = store_with(vec![
        row("eth1", Some("10.0.0.5/24"), None, &["10.0.1.1/24"]),
        desired_eth2,
        row("eth4", Some("10.4.0.1/24"), None, &[]),
    ]);
    let mut sync = L3Sync::new(mock);

    sync.reconcile_on_init(&mut store);

    let kernel = sync.transport();
    assert_eq!(
        kernel.addresses("eth1", AddressFamily::Ipv4),
        set(&["10.0.0.5/24", "10.0.1.1/24"])
    );
    assert!(kernel.addresses("eth1", AddressFamily::Ipv6).is_empty());
    assert_eq!(
        kernel.addresses("eth2", AddressFamily::Ipv4),
        set(&["10.2.0.1/24"])
    );
    assert_eq!(
        kernel.addresses("eth2", AddressFamily::Ipv6),
        set(&["2001:db8:2::1/64", "2001:db8:2::2/64"])
    );
    assert!(kernel.addresses("eth3", AddressFamily::Ipv4).is_empty());
    assert!(kernel.addresses("eth3", AddressFamily::Ipv6).is_empty());
    assert_eq!(
        kernel.addresses("eth4", AddressFamily::Ipv4),
        set(&["10.4.0.1/24"])
    );
    // link-local addresses are never touched
    assert_eq!(kernel.link_local("eth1"), set(&["fe80::1/64"]));

    assert_eq!(routes_for(&store, "eth1"), vec!["10.0.0.0/24"]);
    assert_eq!(routes_for(&store, "eth2"), vec!["2001:db8:2::/64"]);
    assert_eq!(routes_for(&store, "eth4"), vec!["10.4.0.0/24"]);
    assert!(routes_for(&store, "eth3").is_empty());
}

#[test]
fn test_one_connected_route_per_primary() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth1"]));
    let mut store = store_with(vec![]);
    let steps: Vec<(Option<&str>, Option<&str>)> = vec![
        (Some("10.0.0.5/24"), None),
        (Some("10.0.0.9/24"), None),
        (Some("10.0.1.9/24"), Some("2001:db8::1/64")),
        (None, Some("2001:db8::1/64")),
        (None, Some("2001:db8:1::1/48")),
        (None, None),
        (Some("10.9.0.1/16"), None),
    ];

    for (ip4, ip6) in steps {
        sync.sync_port(
            &mut store,
            VRF,
            &row("eth1", ip4, ip6, &[]),
            ColumnChanges::none(),
        );
        let expected = usize::from(ip4.is_some()) + usize::from(ip6.is_some());
        assert_eq!(routes_for(&store, "eth1").len(), expected);
        assert_eq!(store.nexthop_count(), expected);
    }

    sync.remove_port(&mut store, "eth1");
    assert!(connected_routes(&store).is_empty());
    assert_eq!(store.nexthop_count(), 0);
}

#[test]
fn test_multiple_vrfs_skip_route_synthesis() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth1"]));
    let mut store = MemoryStore::with_vrfs(vec![
        VrfRow {
            name: "vrf_default".to_string(),
            ports: Vec::new(),
        },
        VrfRow {
            name: "vrf_red".to_string(),
            ports: Vec::new(),
        },
    ]);

    let stats = sync.sync_port(
        &mut store,
        "vrf_red",
        &row("eth1", Some("10.0.0.5/24"), None, &[]),
        ColumnChanges::all(),
    );

    assert_eq!(sync.transport().ops(), &[KernelOp::add("eth1", "10.0.0.5/24")]);
    assert_eq!(stats.routes_added, 0);
    assert_eq!(stats.failures, 1);
    assert!(store.routes().is_empty());
}

#[test]
fn test_duplicate_secondary_keeps_first() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth2"]));
    let mut store = store_with(vec![]);

    sync.sync_port(
        &mut store,
        VRF,
        &row("eth2", None, None, &["10.2.0.1/24", "10.2.0.1/24"]),
        ColumnChanges::all(),
    );

    assert_eq!(
        sync.transport().ops(),
        &[KernelOp::add_secondary("eth2", "10.2.0.1/24")]
    );
}

#[test]
fn test_snapshot_reload_and_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portd_db.json");

    let mut store = MemoryStore::load_or_empty(&path).unwrap();
    store.replace_vrfs(vec![VrfRow {
        name: VRF.to_string(),
        ports: vec![row("eth1", Some("10.0.0.5/24"), None, &[])],
    }]);
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth1", "eth2"]));
    sync.reconcile_on_init(&mut store);
    assert!(store.commit().unwrap());

    // next revision: eth1 removed, eth2 added
    let previous = store.replace_vrfs(vec![VrfRow {
        name: VRF.to_string(),
        ports: vec![row("eth2", Some("10.2.0.1/24"), None, &[])],
    }]);
    let changes = diff_ports(&previous, store.vrfs());
    assert_eq!(changes.len(), 2);
    let stats = sync.apply_port_changes(&mut store, &changes);
    assert_eq!(stats.routes_added, 1);
    assert_eq!(stats.routes_deleted, 1);
    assert!(store.commit().unwrap());

    let reloaded = MemoryStore::load(&path).unwrap();
    assert_eq!(routes_for(&reloaded, "eth2"), vec!["10.2.0.0/24"]);
    assert!(routes_for(&reloaded, "eth1").is_empty());
    assert!(reloaded.find_port("eth1").is_none());
    assert_eq!(sync.transport().configured_interfaces(), vec!["eth2"]);
}

#[test]
fn test_malformed_snapshot_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portd_db.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        MemoryStore::load_or_empty(&path),
        Err(PortdError::Json(_))
    ));
}

#[test]
fn test_invalid_address_is_skipped() {
    let mut sync = L3Sync::new(MockTransport::with_interfaces(&["eth1"]));
    let mut store = store_with(vec![]);

    let stats = sync.sync_port(
        &mut store,
        VRF,
        &row("eth1", Some("10.0.0.5/33"), None, &["10.1.0.1/24"]),
        ColumnChanges::all(),
    );

    // the bad primary fails on its own; the secondary still lands
    assert_eq!(
        sync.transport().ops(),
        &[KernelOp::add_secondary("eth1", "10.1.0.1/24")]
    );
    assert!(stats.failures >= 1);
    assert!(store.routes().is_empty());
}
