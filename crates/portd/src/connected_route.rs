//! Connected route synthesis
//!
//! Every active primary address owns exactly one connected route whose
//! prefix is the address's masked network and whose single next-hop is the
//! owning port. Secondary addresses get no route.

use tracing::{debug, info, instrument};

use crate::error::{PortdError, Result};
use crate::prefix;
use crate::store::{DesiredStateStore, NextHopId, NextHopRow, RouteId, RouteRow, VrfRow};
use crate::tables::{route_values, CONNECTED_ROUTE_DISTANCE, PORT_TABLE, ROUTE_TABLE};
use crate::types::{AddressFamily, NetAddress, Port};

/// `network/len` for an interface address
pub fn connected_prefix(family: AddressFamily, address: &NetAddress) -> Result<String> {
    prefix::network_string(family, address.as_str())
}

/// The one VRF connected routes live in. Zero or several VRFs is an error.
pub fn single_vrf(store: &dyn DesiredStateStore) -> Result<&VrfRow> {
    match store.vrfs() {
        [] => Err(PortdError::NoVrf),
        [vrf] => Ok(vrf),
        vrfs => Err(PortdError::UnsupportedMultiVrf { count: vrfs.len() }),
    }
}

/// Insert the connected route and next-hop for `port`'s primary address of
/// `family`. Marks the store transaction dirty on success.
#[instrument(skip(store, port), fields(port = %port.name))]
pub fn add_connected_route(
    store: &mut dyn DesiredStateStore,
    port: &Port,
    family: AddressFamily,
) -> Result<RouteId> {
    let address = port.primary(family).ok_or_else(|| {
        PortdError::not_found(PORT_TABLE, format!("{} {} primary address", port.name, family))
    })?;
    let network = connected_prefix(family, address)?;
    let vrf = single_vrf(store)?.name.clone();

    let nexthop = store.insert_nexthop(NextHopRow {
        ports: vec![port.name.clone()],
    });
    let route = store.insert_route(RouteRow {
        vrf,
        prefix: network.clone(),
        address_family: Some(family),
        sub_address_family: Some(route_values::SUB_FAMILY_UNICAST.to_string()),
        from: route_values::FROM_CONNECTED.to_string(),
        distance: CONNECTED_ROUTE_DISTANCE,
        selected: true,
        nexthops: vec![nexthop],
    });
    store.mark_dirty();

    info!(prefix = %network, "Added connected route");
    Ok(route)
}

fn family_matches(row: &RouteRow, family: AddressFamily) -> bool {
    match family {
        // untagged rows are treated as IPv4
        AddressFamily::Ipv4 => row.address_family.map_or(true, |f| f == AddressFamily::Ipv4),
        AddressFamily::Ipv6 => row.address_family == Some(AddressFamily::Ipv6),
    }
}

fn is_connected(row: &RouteRow) -> bool {
    row.from == route_values::FROM_CONNECTED
        && row
            .sub_address_family
            .as_deref()
            .map_or(true, |s| s == route_values::SUB_FAMILY_UNICAST)
}

/// A connected route row as seen in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedRoute {
    pub id: RouteId,
    pub family: AddressFamily,
    pub prefix: String,
    /// Port of the first next-hop, if resolvable
    pub port: Option<String>,
    pub nexthops: Vec<NextHopId>,
}

/// Every connected route in the store
pub fn connected_routes(store: &dyn DesiredStateStore) -> Vec<ConnectedRoute> {
    store
        .routes()
        .into_iter()
        .filter(|(_, row)| is_connected(row))
        .map(|(id, row)| ConnectedRoute {
            id,
            family: row.address_family.unwrap_or(AddressFamily::Ipv4),
            prefix: row.prefix.clone(),
            port: row
                .nexthops
                .first()
                .and_then(|nh| store.nexthop(*nh))
                .and_then(|nh| nh.ports.first())
                .cloned(),
            nexthops: row.nexthops.clone(),
        })
        .collect()
}

/// Find the connected route of `port_name` for `address`
pub fn find_connected_route(
    store: &dyn DesiredStateStore,
    address: &NetAddress,
    port_name: &str,
    family: AddressFamily,
) -> Result<Option<ConnectedRoute>> {
    let network = connected_prefix(family, address)?;

    for (id, row) in store.routes() {
        if !family_matches(row, family) || row.prefix != network || !is_connected(row) {
            continue;
        }
        let owner = row
            .nexthops
            .first()
            .and_then(|nh| store.nexthop(*nh))
            .and_then(|nh| nh.ports.first());
        if owner.map(String::as_str) == Some(port_name) {
            return Ok(Some(ConnectedRoute {
                id,
                family,
                prefix: network,
                port: Some(port_name.to_string()),
                nexthops: row.nexthops.clone(),
            }));
        }
    }
    Ok(None)
}

/// Delete a route row together with its next-hops
pub fn remove_route(store: &mut dyn DesiredStateStore, route: &ConnectedRoute) -> Result<()> {
    for nexthop in &route.nexthops {
        store.delete_nexthop(*nexthop)?;
    }
    store.delete_route(route.id)?;
    store.mark_dirty();
    Ok(())
}

/// Remove the connected route of `port_name` for `address`.
///
/// A missing route means the shadow and the store disagree and is reported
/// as `NotFound`.
#[instrument(skip(store, address), fields(address = %address))]
pub fn del_connected_route(
    store: &mut dyn DesiredStateStore,
    address: &NetAddress,
    port_name: &str,
    family: AddressFamily,
) -> Result<()> {
    let Some(route) = find_connected_route(&*store, address, port_name, family)? else {
        return Err(PortdError::not_found(
            ROUTE_TABLE,
            connected_prefix(family, address)?,
        ));
    };
    remove_route(store, &route)?;

    debug!(port = %port_name, prefix = %route.prefix, "Deleted connected route");
    Ok(())
}
