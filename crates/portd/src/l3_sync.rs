//! L3 reconciliation engine
//!
//! `L3Sync` converges kernel interface addresses with the desired state.
//! The startup pass compares a full kernel dump with every port in the
//! store; afterwards each port change is applied incrementally against the
//! shadow cache, which only ever learns from the store.
//!
//! Individual kernel or route failures are logged and skipped; the next
//! event or restart repairs whatever a pass left undone.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::connected_route::{self, add_connected_route, del_connected_route};
use crate::netlink::{AddressCommand, AddressTransport};
use crate::store::{ColumnChanges, DesiredStateStore, PortChange, PortRow};
use crate::tables::LOOPBACK_INTERFACE;
use crate::types::{AddressFamily, AddressSet, KernelPort, KernelPortMap, NetAddress, Port, PortMap};

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub addresses_added: usize,
    pub addresses_deleted: usize,
    pub routes_added: usize,
    pub routes_deleted: usize,
    pub failures: usize,
}

impl ReconcileStats {
    /// True if the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.addresses_added == 0
            && self.addresses_deleted == 0
            && self.routes_added == 0
            && self.routes_deleted == 0
    }

    fn merge(&mut self, other: ReconcileStats) {
        self.addresses_added += other.addresses_added;
        self.addresses_deleted += other.addresses_deleted;
        self.routes_added += other.routes_added;
        self.routes_deleted += other.routes_deleted;
        self.failures += other.failures;
    }
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "addresses +{}/-{}, routes +{}/-{}, {} failed",
            self.addresses_added,
            self.addresses_deleted,
            self.routes_added,
            self.routes_deleted,
            self.failures
        )
    }
}

/// Issue one kernel operation, folding the outcome into `stats`
fn apply<T: AddressTransport>(
    transport: &mut T,
    stats: &mut ReconcileStats,
    cmd: AddressCommand,
    ifname: &str,
    address: &NetAddress,
    family: AddressFamily,
    secondary: bool,
) {
    match transport.set_address(cmd, ifname, address, family, secondary) {
        Ok(()) => match cmd {
            AddressCommand::Add => stats.addresses_added += 1,
            AddressCommand::Delete => stats.addresses_deleted += 1,
        },
        Err(e) => {
            stats.failures += 1;
            warn!(port = %ifname, address = %address, "Failed to {} address: {}", cmd, e);
        }
    }
}

/// Add or delete a port's primary and secondary addresses of both families
fn apply_all<T: AddressTransport>(
    transport: &mut T,
    stats: &mut ReconcileStats,
    cmd: AddressCommand,
    port: &Port,
) {
    for family in AddressFamily::ALL {
        if let Some(primary) = port.primary(family) {
            apply(transport, stats, cmd, &port.name, primary, family, false);
        }
        for addr in port.secondary(family) {
            apply(transport, stats, cmd, &port.name, addr, family, true);
        }
    }
}

fn release_route(
    store: &mut dyn DesiredStateStore,
    stats: &mut ReconcileStats,
    port_name: &str,
    address: &NetAddress,
    family: AddressFamily,
) {
    match del_connected_route(store, address, port_name, family) {
        Ok(()) => stats.routes_deleted += 1,
        Err(e) => {
            stats.failures += 1;
            warn!(port = %port_name, address = %address, "Connected route not released: {}", e);
        }
    }
}

fn create_route(
    store: &mut dyn DesiredStateStore,
    stats: &mut ReconcileStats,
    port: &Port,
    family: AddressFamily,
) {
    match add_connected_route(store, port, family) {
        Ok(_) => stats.routes_added += 1,
        Err(e) => {
            stats.failures += 1;
            warn!(port = %port.name, "Connected route not added: {}", e);
        }
    }
}

/// Reconciliation engine
pub struct L3Sync<T: AddressTransport> {
    transport: T,

    /// Shadow cache: what the kernel was last told, per port
    ports: PortMap,
}

impl<T: AddressTransport> L3Sync<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            ports: PortMap::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.get(name)
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// Push every address of `port` to the kernel
    pub fn add_ipaddr(&mut self, port: &Port) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        apply_all(&mut self.transport, &mut stats, AddressCommand::Add, port);
        stats
    }

    /// Remove every address of `port` from the kernel
    pub fn del_ipaddr(&mut self, port: &Port) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        apply_all(&mut self.transport, &mut stats, AddressCommand::Delete, port);
        stats
    }

    /// Dump both families into one map
    fn dump_kernel(&mut self) -> KernelPortMap {
        let mut merged = KernelPortMap::new();
        for family in AddressFamily::ALL {
            let dump = match self.transport.dump_addresses(family) {
                Ok(dump) => dump,
                Err(e) => {
                    warn!("Kernel {} address dump failed: {}", family, e);
                    continue;
                }
            };
            for (name, observed) in dump {
                let entry = merged
                    .entry(name)
                    .or_insert_with_key(|name| KernelPort::new(name.as_str()));
                for addr in observed.addresses(family) {
                    entry.addresses_mut(family).insert(addr.clone());
                }
            }
        }
        merged
    }

    /// Every L3 port of the store, as the shadow it should become
    fn desired_ports(store: &dyn DesiredStateStore) -> PortMap {
        let mut desired = PortMap::new();
        for (vrf, row) in store.ports() {
            if row.name == LOOPBACK_INTERFACE {
                debug!("Ignoring loopback interface in desired state");
                continue;
            }
            if !row.has_l3() {
                continue;
            }
            desired
                .entry(row.name.clone())
                .or_insert_with(|| Port::from_row(vrf, row));
            debug!(port = %row.name, vrf = %vrf, "L3 interface added to DB port list");
        }
        desired
    }

    fn log_port_lists(kernel: &KernelPortMap, desired: &PortMap) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        debug!("Dump of kernel ports");
        for port in kernel.values() {
            debug!("Port Name : {}", port.name);
            for addr in &port.ip4addr {
                debug!("IPv4 addr : {}", addr);
            }
            for addr in &port.ip6addr {
                debug!("IPv6 addr : {}", addr);
            }
        }
        debug!("Dump of DB ports");
        for port in desired.values() {
            debug!("Port Name : {}", port.name);
            if let Some(addr) = &port.ip4_address {
                debug!("IPv4 addr : {}", addr);
            }
            if let Some(addr) = &port.ip6_address {
                debug!("IPv6 addr : {}", addr);
            }
            for addr in &port.secondary_ip4addr {
                debug!("Secondary IPv4 addr : {}", addr);
            }
            for addr in &port.secondary_ip6addr {
                debug!("Secondary IPv6 addr : {}", addr);
            }
        }
    }

    /// Startup pass: converge the kernel with every port in the store.
    ///
    /// Kernel interfaces unknown to the store lose all their addresses.
    /// Known interfaces lose addresses the store does not list and gain the
    /// ones they lack. Every desired port is registered in the shadow cache,
    /// then connected routes are audited against the shadow primaries.
    #[instrument(skip(self, store))]
    pub fn reconcile_on_init(&mut self, store: &mut dyn DesiredStateStore) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let kernel = self.dump_kernel();
        let desired = Self::desired_ports(&*store);
        Self::log_port_lists(&kernel, &desired);

        for (name, observed) in &kernel {
            if name == LOOPBACK_INTERFACE {
                continue;
            }
            match desired.get(name) {
                None => {
                    debug!(port = %name, "Port is no longer L3. Deleting IP addresses from kernel");
                    for family in AddressFamily::ALL {
                        for addr in observed.addresses(family) {
                            apply(
                                &mut self.transport,
                                &mut stats,
                                AddressCommand::Delete,
                                name,
                                addr,
                                family,
                                false,
                            );
                        }
                    }
                }
                Some(port) => {
                    for family in AddressFamily::ALL {
                        for addr in observed.addresses(family) {
                            if !port.contains(family, addr) {
                                apply(
                                    &mut self.transport,
                                    &mut stats,
                                    AddressCommand::Delete,
                                    name,
                                    addr,
                                    family,
                                    false,
                                );
                            }
                        }
                    }
                }
            }
        }

        let empty = KernelPort::default();
        for (name, port) in &desired {
            let observed = kernel.get(name).unwrap_or(&empty);
            for family in AddressFamily::ALL {
                let present = observed.addresses(family);
                if let Some(primary) = port.primary(family) {
                    if !present.contains(primary) {
                        apply(
                            &mut self.transport,
                            &mut stats,
                            AddressCommand::Add,
                            name,
                            primary,
                            family,
                            false,
                        );
                    }
                }
                for addr in port.secondary(family).difference(present) {
                    apply(
                        &mut self.transport,
                        &mut stats,
                        AddressCommand::Add,
                        name,
                        addr,
                        family,
                        true,
                    );
                }
            }
        }

        self.ports = desired;
        stats.merge(self.audit_connected_routes(store));

        info!(ports = self.ports.len(), "Startup reconciliation done: {}", stats);
        stats
    }

    /// Make the store hold exactly one connected route per shadow primary.
    ///
    /// Connected routes whose owner has no matching primary are removed,
    /// duplicates included; missing ones are created.
    pub fn audit_connected_routes(&self, store: &mut dyn DesiredStateStore) -> ReconcileStats {
        let mut stats = ReconcileStats::default();

        let mut expected: BTreeMap<(String, AddressFamily), Option<String>> = BTreeMap::new();
        for port in self.ports.values() {
            for family in AddressFamily::ALL {
                if let Some(addr) = port.primary(family) {
                    let network = connected_route::connected_prefix(family, addr).ok();
                    expected.insert((port.name.clone(), family), network);
                }
            }
        }

        let mut satisfied = BTreeMap::new();
        for route in connected_route::connected_routes(&*store) {
            let key = (route.port.clone().unwrap_or_default(), route.family);
            let wanted = expected.get(&key).and_then(|n| n.as_deref());
            if wanted == Some(route.prefix.as_str()) && !satisfied.contains_key(&key) {
                satisfied.insert(key, route.id);
                continue;
            }
            match connected_route::remove_route(store, &route) {
                Ok(()) => {
                    stats.routes_deleted += 1;
                    info!(prefix = %route.prefix, port = ?route.port, "Removed stale connected route");
                }
                Err(e) => {
                    stats.failures += 1;
                    warn!(prefix = %route.prefix, "Stale connected route not removed: {}", e);
                }
            }
        }

        for (port_name, family) in expected.keys() {
            if satisfied.contains_key(&(port_name.clone(), *family)) {
                continue;
            }
            if let Some(port) = self.ports.get(port_name) {
                create_route(store, &mut stats, port, *family);
            }
        }
        stats
    }

    /// Apply one port row change.
    ///
    /// A port seen for the first time with addresses gets a shadow and all
    /// its columns are treated as modified. A shadowed port whose row no
    /// longer carries any address is torn down.
    #[instrument(skip(self, store, row, changes), fields(port = %row.name))]
    pub fn sync_port(
        &mut self,
        store: &mut dyn DesiredStateStore,
        vrf: &str,
        row: &PortRow,
        changes: ColumnChanges,
    ) -> ReconcileStats {
        if row.name == LOOPBACK_INTERFACE {
            debug!("Ignoring loopback interface");
            return ReconcileStats::default();
        }

        let desired = Port::from_row(vrf, row);
        let (mut shadow, changes) = match self.ports.remove(&row.name) {
            Some(shadow) if !desired.is_l3() => {
                debug!("Port became L2, removing its addresses");
                return self.teardown(store, &shadow);
            }
            Some(shadow) => (shadow, changes),
            None if !desired.is_l3() => return ReconcileStats::default(),
            None => {
                debug!("New L3 port");
                (Port::new(&row.name, vrf), ColumnChanges::all())
            }
        };
        shadow.vrf = desired.vrf.clone();
        shadow.internal_vid = desired.internal_vid;

        let mut stats = ReconcileStats::default();
        for family in AddressFamily::ALL {
            self.reconfig_primary(
                store,
                &mut stats,
                &mut shadow,
                family,
                desired.primary(family).cloned(),
            );
        }
        for family in AddressFamily::ALL {
            if changes.secondary(family) {
                debug!("{} secondary addresses modified", family);
                self.reconfig_secondary(&mut stats, &mut shadow, family, desired.secondary(family));
            }
        }

        self.ports.insert(row.name.clone(), shadow);
        stats
    }

    /// Port disappeared from the store
    #[instrument(skip(self, store))]
    pub fn remove_port(&mut self, store: &mut dyn DesiredStateStore, name: &str) -> ReconcileStats {
        match self.ports.remove(name) {
            Some(shadow) => self.teardown(store, &shadow),
            None => ReconcileStats::default(),
        }
    }

    /// Apply a batch of port changes in order
    pub fn apply_port_changes(
        &mut self,
        store: &mut dyn DesiredStateStore,
        changes: &[PortChange],
    ) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for change in changes {
            let result = match change {
                PortChange::Updated { vrf, row, changes } => {
                    self.sync_port(store, vrf, row, *changes)
                }
                PortChange::Removed { name } => self.remove_port(store, name),
            };
            stats.merge(result);
        }
        stats
    }

    fn teardown(&mut self, store: &mut dyn DesiredStateStore, shadow: &Port) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        apply_all(&mut self.transport, &mut stats, AddressCommand::Delete, shadow);
        for family in AddressFamily::ALL {
            if let Some(primary) = shadow.primary(family) {
                release_route(store, &mut stats, &shadow.name, primary, family);
            }
        }
        stats
    }

    fn reconfig_primary(
        &mut self,
        store: &mut dyn DesiredStateStore,
        stats: &mut ReconcileStats,
        shadow: &mut Port,
        family: AddressFamily,
        desired: Option<NetAddress>,
    ) {
        let current = shadow.primary(family).cloned();
        if current == desired {
            return;
        }

        if let Some(old) = current {
            apply(
                &mut self.transport,
                stats,
                AddressCommand::Delete,
                &shadow.name,
                &old,
                family,
                false,
            );
            release_route(store, stats, &shadow.name, &old, family);
        }

        *shadow.primary_mut(family) = desired.clone();

        if let Some(new) = desired {
            apply(
                &mut self.transport,
                stats,
                AddressCommand::Add,
                &shadow.name,
                &new,
                family,
                false,
            );
            create_route(store, stats, shadow, family);
        }
    }

    fn reconfig_secondary(
        &mut self,
        stats: &mut ReconcileStats,
        shadow: &mut Port,
        family: AddressFamily,
        desired: &AddressSet,
    ) {
        let removed: Vec<NetAddress> = shadow.secondary(family).difference(desired).cloned().collect();
        let added: Vec<NetAddress> = desired.difference(shadow.secondary(family)).cloned().collect();

        for addr in removed {
            apply(
                &mut self.transport,
                stats,
                AddressCommand::Delete,
                &shadow.name,
                &addr,
                family,
                true,
            );
            shadow.secondary_mut(family).remove(&addr);
        }
        for addr in added {
            apply(
                &mut self.transport,
                stats,
                AddressCommand::Add,
                &shadow.name,
                &addr,
                family,
                true,
            );
            shadow.secondary_mut(family).insert(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{KernelOp, MockTransport};
    use crate::store::{MemoryStore, VrfRow};
    use pretty_assertions::assert_eq;

    fn store_with(ports: Vec<PortRow>) -> MemoryStore {
        MemoryStore::with_vrfs(vec![VrfRow {
            name: "vrf_default".to_string(),
            ports,
        }])
    }

    fn row(name: &str, ip4: Option<&str>, secondary: &[&str]) -> PortRow {
        PortRow {
            name: name.to_string(),
            ip4_address: ip4.map(str::to_string),
            ip4_address_secondary: secondary.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn engine(ifaces: &[&str]) -> L3Sync<MockTransport> {
        L3Sync::new(MockTransport::with_interfaces(ifaces))
    }

    #[test]
    fn test_new_primary_adds_address_and_route() {
        let mut sync = engine(&["eth1"]);
        let mut store = store_with(vec![]);
        let r = row("eth1", Some("10.0.0.5/24"), &[]);

        let stats = sync.sync_port(&mut store, "vrf_default", &r, ColumnChanges::all());

        assert_eq!(sync.transport().ops(), &[KernelOp::add("eth1", "10.0.0.5/24")]);
        assert_eq!(stats.addresses_added, 1);
        assert_eq!(stats.routes_added, 1);
        let routes = connected_route::connected_routes(&store);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].prefix, "10.0.0.0/24");
        assert_eq!(routes[0].port.as_deref(), Some("eth1"));
        assert!(sync.port("eth1").is_some());
    }

    #[test]
    fn test_unchanged_primary_is_noop() {
        let mut sync = engine(&["eth1"]);
        let mut store = store_with(vec![]);
        let r = row("eth1", Some("10.0.0.5/24"), &[]);
        sync.sync_port(&mut store, "vrf_default", &r, ColumnChanges::all());
        sync.transport_mut().take_ops();

        let stats = sync.sync_port(&mut store, "vrf_default", &r, ColumnChanges::none());
        assert!(stats.is_noop());
        assert!(sync.transport().ops().is_empty());
    }

    #[test]
    fn test_primary_change_deletes_before_add() {
        let mut sync = engine(&["eth1"]);
        let mut store = store_with(vec![]);
        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth1", Some("10.0.0.5/24"), &[]),
            ColumnChanges::all(),
        );
        sync.transport_mut().take_ops();

        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth1", Some("10.0.1.9/24"), &[]),
            ColumnChanges::none(),
        );
        assert_eq!(
            sync.transport().ops(),
            &[
                KernelOp::delete("eth1", "10.0.0.5/24"),
                KernelOp::add("eth1", "10.0.1.9/24"),
            ]
        );
        let routes = connected_route::connected_routes(&store);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].prefix, "10.0.1.0/24");
    }

    #[test]
    fn test_secondary_diff() {
        let mut sync = engine(&["eth2"]);
        let mut store = store_with(vec![]);
        let before = row("eth2", None, &["192.168.1.1/24", "192.168.1.2/24"]);
        sync.sync_port(&mut store, "vrf_default", &before, ColumnChanges::all());
        sync.transport_mut().take_ops();

        let after = row("eth2", None, &["192.168.1.2/24", "192.168.1.3/24"]);
        let changes = ColumnChanges::between(Some(&before), &after);
        sync.sync_port(&mut store, "vrf_default", &after, changes);

        assert_eq!(
            sync.transport().ops(),
            &[
                KernelOp::delete_secondary("eth2", "192.168.1.1/24"),
                KernelOp::add_secondary("eth2", "192.168.1.3/24"),
            ]
        );
        // secondaries never get routes
        assert!(connected_route::connected_routes(&store).is_empty());
    }

    #[test]
    fn test_secondary_skipped_when_column_unmodified() {
        let mut sync = engine(&["eth2"]);
        let mut store = store_with(vec![]);
        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth2", Some("10.2.0.1/24"), &["192.168.1.1/24"]),
            ColumnChanges::all(),
        );
        sync.transport_mut().take_ops();

        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth2", Some("10.2.0.1/24"), &["192.168.1.9/24"]),
            ColumnChanges::none(),
        );
        assert!(sync.transport().ops().is_empty());
    }

    #[test]
    fn test_port_becomes_l2() {
        let mut sync = engine(&["eth1"]);
        let mut store = store_with(vec![]);
        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth1", Some("10.0.0.5/24"), &["10.9.0.1/24"]),
            ColumnChanges::all(),
        );
        sync.transport_mut().take_ops();

        let stats = sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth1", None, &[]),
            ColumnChanges::all(),
        );
        assert_eq!(
            sync.transport().ops(),
            &[
                KernelOp::delete("eth1", "10.0.0.5/24"),
                KernelOp::delete_secondary("eth1", "10.9.0.1/24"),
            ]
        );
        assert_eq!(stats.routes_deleted, 1);
        assert!(sync.port("eth1").is_none());
        assert!(connected_route::connected_routes(&store).is_empty());
    }

    #[test]
    fn test_remove_port() {
        let mut sync = engine(&["eth1"]);
        let mut store = store_with(vec![]);
        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth1", Some("10.0.0.5/24"), &[]),
            ColumnChanges::all(),
        );
        let stats = sync.remove_port(&mut store, "eth1");
        assert_eq!(stats.addresses_deleted, 1);
        assert!(sync.ports().is_empty());
        assert!(sync.remove_port(&mut store, "eth1").is_noop());
    }

    #[test]
    fn test_loopback_ignored() {
        let mut sync = engine(&[]);
        let mut store = store_with(vec![]);
        let stats = sync.sync_port(
            &mut store,
            "vrf_default",
            &row("lo", Some("10.255.255.1/32"), &[]),
            ColumnChanges::all(),
        );
        assert!(stats.is_noop());
        assert!(sync.transport().ops().is_empty());
    }

    #[test]
    fn test_kernel_failure_does_not_abort() {
        // eth7 missing from the kernel; the route is still synthesized
        let mut sync = engine(&[]);
        let mut store = store_with(vec![]);
        let stats = sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth7", Some("10.7.0.1/24"), &["10.8.0.1/24"]),
            ColumnChanges::all(),
        );
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.routes_added, 1);
        assert!(sync.port("eth7").is_some());
    }

    #[test]
    fn test_init_deletes_unknown_port_addresses() {
        let mut mock = MockTransport::with_interfaces(&["eth3"]);
        mock.seed("eth3", "172.16.0.1/16");
        let mut sync = L3Sync::new(mock);
        let mut store = store_with(vec![]);

        sync.reconcile_on_init(&mut store);

        assert_eq!(sync.transport().ops(), &[KernelOp::delete("eth3", "172.16.0.1/16")]);
        assert!(sync.port("eth3").is_none());
    }

    #[test]
    fn test_init_registers_shadow_and_converges() {
        let mut mock = MockTransport::with_interfaces(&["eth1", "eth2"]);
        mock.seed("eth1", "10.0.0.5/24");
        mock.seed("eth1", "10.0.0.99/24");
        let mut store = store_with(vec![
            row("eth1", Some("10.0.0.5/24"), &[]),
            row("eth2", Some("10.2.0.1/24"), &["10.3.0.1/24"]),
        ]);
        let mut sync = L3Sync::new(mock);

        let stats = sync.reconcile_on_init(&mut store);

        assert_eq!(
            sync.transport().ops(),
            &[
                KernelOp::delete("eth1", "10.0.0.99/24"),
                KernelOp::add("eth2", "10.2.0.1/24"),
                KernelOp::add_secondary("eth2", "10.3.0.1/24"),
            ]
        );
        assert_eq!(stats.routes_added, 2);
        assert_eq!(sync.ports().len(), 2);

        // a later event with the same values changes nothing
        sync.transport_mut().take_ops();
        let r = row("eth1", Some("10.0.0.5/24"), &[]);
        assert!(sync
            .sync_port(&mut store, "vrf_default", &r, ColumnChanges::none())
            .is_noop());
    }

    #[test]
    fn test_init_leaves_link_local_to_kernel() {
        let mut store = store_with(vec![PortRow {
            name: "eth1".to_string(),
            ip6_address: Some("fe80::1/64".to_string()),
            ip6_address_secondary: vec![
                "fe80::2/64".to_string(),
                "2001:db8::2/64".to_string(),
            ],
            ..Default::default()
        }]);
        let mut sync = engine(&["eth1"]);

        sync.reconcile_on_init(&mut store);
        assert_eq!(
            sync.transport().ops(),
            &[KernelOp::add_secondary("eth1", "2001:db8::2/64")]
        );
        assert!(connected_route::connected_routes(&store).is_empty());

        // second pass: the dump shows the global secondary, nothing left to do
        sync.transport_mut().take_ops();
        let stats = sync.reconcile_on_init(&mut store);
        assert!(stats.is_noop());
        assert!(sync.transport().ops().is_empty());
    }

    #[test]
    fn test_init_dump_failure_keeps_going() {
        let mut mock = MockTransport::with_interfaces(&["eth1"]);
        mock.set_dump_failure(true);
        let mut sync = L3Sync::new(mock);
        let mut store = store_with(vec![row("eth1", Some("10.0.0.5/24"), &[])]);

        sync.reconcile_on_init(&mut store);
        assert_eq!(sync.transport().ops(), &[KernelOp::add("eth1", "10.0.0.5/24")]);
    }

    #[test]
    fn test_audit_removes_stale_route() {
        let mut sync = engine(&["eth1"]);
        let mut store = store_with(vec![]);
        sync.sync_port(
            &mut store,
            "vrf_default",
            &row("eth1", Some("10.0.0.5/24"), &[]),
            ColumnChanges::all(),
        );
        // a leftover route for a port the engine does not know
        let ghost = Port {
            ip4_address: Some(NetAddress::new("10.66.0.1/24")),
            ..Port::new("eth66", "vrf_default")
        };
        add_connected_route(&mut store, &ghost, AddressFamily::Ipv4).unwrap();

        let stats = sync.audit_connected_routes(&mut store);
        assert_eq!(stats.routes_deleted, 1);
        assert_eq!(stats.routes_added, 0);
        let routes = connected_route::connected_routes(&store);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].port.as_deref(), Some("eth1"));
    }

    #[test]
    fn test_apply_port_changes() {
        let mut sync = engine(&["eth1", "eth2"]);
        let mut store = store_with(vec![]);
        let changes = vec![
            PortChange::Updated {
                vrf: "vrf_default".to_string(),
                row: row("eth1", Some("10.0.0.5/24"), &[]),
                changes: ColumnChanges::all(),
            },
            PortChange::Updated {
                vrf: "vrf_default".to_string(),
                row: row("eth2", None, &["10.2.0.1/24"]),
                changes: ColumnChanges::all(),
            },
            PortChange::Removed {
                name: "eth1".to_string(),
            },
        ];

        let stats = sync.apply_port_changes(&mut store, &changes);
        assert_eq!(stats.addresses_added, 2);
        assert_eq!(stats.addresses_deleted, 1);
        assert_eq!(stats.routes_added, 1);
        assert_eq!(stats.routes_deleted, 1);
        assert_eq!(sync.ports().keys().collect::<Vec<_>>(), vec!["eth2"]);
    }

    #[test]
    fn test_bulk_add_del() {
        let mut sync = engine(&["eth1"]);
        let mut port = Port::new("eth1", "vrf_default");
        port.ip4_address = Some(NetAddress::new("10.0.0.1/24"));
        port.ip6_address = Some(NetAddress::new("2001:db8::1/64"));
        port.secondary_ip6addr.insert(NetAddress::new("2001:db8:1::1/64"));

        assert_eq!(sync.add_ipaddr(&port).addresses_added, 3);
        assert_eq!(sync.del_ipaddr(&port).addresses_deleted, 3);
        assert!(sync.transport().configured_interfaces().is_empty());
    }
}
