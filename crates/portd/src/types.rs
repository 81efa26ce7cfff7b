//! Address model types
//!
//! `NetAddress` is the canonical `"addr/len"` string, `AddressSet` a set of
//! them. `Port` is the engine's shadow of what the kernel was last told;
//! `KernelPort` is one dump pass worth of observed kernel state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use netlink_packet_route::AddressFamily as RtnlAddressFamily;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PortdError;
use crate::prefix;
use crate::tables::{hw_config_keys, route_values, NO_INTERNAL_VLAN};

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// Full mask length (32 or 128)
    pub fn max_prefix_len(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    /// rtnetlink family of this address family
    pub fn rtnl(self) -> RtnlAddressFamily {
        match self {
            AddressFamily::Ipv4 => RtnlAddressFamily::Inet,
            AddressFamily::Ipv6 => RtnlAddressFamily::Inet6,
        }
    }

    pub fn from_rtnl(family: RtnlAddressFamily) -> Option<Self> {
        match family {
            RtnlAddressFamily::Inet => Some(AddressFamily::Ipv4),
            RtnlAddressFamily::Inet6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => route_values::FAMILY_IPV4,
            AddressFamily::Ipv6 => route_values::FAMILY_IPV6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An interface address with prefix length, e.g. `10.0.0.5/24`
///
/// Identity is the string. Well-formed input is canonicalized on
/// construction so `10.0.0.5` and `10.0.0.5/32` compare equal; input that
/// does not parse is kept verbatim and rejected later by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NetAddress(String);

impl NetAddress {
    pub fn new(s: impl Into<String>) -> Self {
        let raw: String = s.into();
        let family = if raw.contains(':') {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        };
        match prefix::parse_prefix(family, &raw) {
            Ok(p) => NetAddress(p.to_string()),
            Err(_) => NetAddress(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for an IPv6 link-local (fe80::/10) address
    pub fn is_link_local(&self) -> bool {
        self.family() == AddressFamily::Ipv6
            && prefix::parse_prefix(AddressFamily::Ipv6, &self.0)
                .is_ok_and(|p| prefix::is_link_local(p.addr()))
    }

    /// Family guessed from the textual form
    pub fn family(&self) -> AddressFamily {
        if self.0.contains(':') {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        }
    }
}

impl From<String> for NetAddress {
    fn from(s: String) -> Self {
        NetAddress::new(s)
    }
}

impl From<&str> for NetAddress {
    fn from(s: &str) -> Self {
        NetAddress::new(s)
    }
}

impl From<NetAddress> for String {
    fn from(a: NetAddress) -> Self {
        a.0
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unordered set of addresses for one interface, family and role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet(BTreeSet<NetAddress>);

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a configured list. Repeated entries are logged and the
    /// first occurrence kept.
    pub fn from_config<S: AsRef<str>>(port: &str, list: &[S]) -> Self {
        let mut set = Self::new();
        for item in list {
            let addr = NetAddress::new(item.as_ref());
            if set.contains(&addr) {
                let err = PortdError::DuplicateEntry {
                    port: port.to_string(),
                    address: addr.to_string(),
                };
                warn!("{}", err);
                continue;
            }
            set.insert(addr);
        }
        set
    }

    pub fn insert(&mut self, addr: NetAddress) -> bool {
        self.0.insert(addr)
    }

    pub fn remove(&mut self, addr: &NetAddress) -> bool {
        self.0.remove(addr)
    }

    pub fn contains(&self, addr: &NetAddress) -> bool {
        self.0.contains(addr)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetAddress> {
        self.0.iter()
    }

    pub fn retain(&mut self, keep: impl FnMut(&NetAddress) -> bool) {
        self.0.retain(keep)
    }

    /// Entries in `self` that are not in `other`
    pub fn difference<'a>(&'a self, other: &'a AddressSet) -> impl Iterator<Item = &'a NetAddress> {
        self.0.difference(&other.0)
    }
}

impl FromIterator<NetAddress> for AddressSet {
    fn from_iter<I: IntoIterator<Item = NetAddress>>(iter: I) -> Self {
        AddressSet(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a AddressSet {
    type Item = &'a NetAddress;
    type IntoIter = std::collections::btree_set::Iter<'a, NetAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Shadow of one port's last applied L3 configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub vrf: String,
    pub internal_vid: i32,
    pub ip4_address: Option<NetAddress>,
    pub ip6_address: Option<NetAddress>,
    pub secondary_ip4addr: AddressSet,
    pub secondary_ip6addr: AddressSet,
}

impl Port {
    /// Empty shadow, nothing applied yet
    pub fn new(name: impl Into<String>, vrf: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vrf: vrf.into(),
            internal_vid: NO_INTERNAL_VLAN,
            ip4_address: None,
            ip6_address: None,
            secondary_ip4addr: AddressSet::new(),
            secondary_ip6addr: AddressSet::new(),
        }
    }

    /// Materialize the desired state of a store row
    ///
    /// IPv6 link-local addresses are left to the kernel: address dumps never
    /// report them, so they are dropped here with a debug log.
    pub fn from_row(vrf: &str, row: &crate::store::PortRow) -> Self {
        let managed = |addr: &NetAddress| {
            if addr.is_link_local() {
                debug!(port = %row.name, address = %addr, "Link local IPv6 address in desired state, ignoring");
                false
            } else {
                true
            }
        };

        let mut secondary_ip6addr =
            AddressSet::from_config(&row.name, &row.ip6_address_secondary);
        secondary_ip6addr.retain(managed);

        Self {
            name: row.name.clone(),
            vrf: vrf.to_string(),
            internal_vid: internal_vlan_id(&row.hw_config),
            ip4_address: row.ip4_address.as_deref().map(NetAddress::new),
            ip6_address: row
                .ip6_address
                .as_deref()
                .map(NetAddress::new)
                .filter(managed),
            secondary_ip4addr: AddressSet::from_config(&row.name, &row.ip4_address_secondary),
            secondary_ip6addr,
        }
    }

    pub fn primary(&self, family: AddressFamily) -> Option<&NetAddress> {
        match family {
            AddressFamily::Ipv4 => self.ip4_address.as_ref(),
            AddressFamily::Ipv6 => self.ip6_address.as_ref(),
        }
    }

    pub fn primary_mut(&mut self, family: AddressFamily) -> &mut Option<NetAddress> {
        match family {
            AddressFamily::Ipv4 => &mut self.ip4_address,
            AddressFamily::Ipv6 => &mut self.ip6_address,
        }
    }

    pub fn secondary(&self, family: AddressFamily) -> &AddressSet {
        match family {
            AddressFamily::Ipv4 => &self.secondary_ip4addr,
            AddressFamily::Ipv6 => &self.secondary_ip6addr,
        }
    }

    pub fn secondary_mut(&mut self, family: AddressFamily) -> &mut AddressSet {
        match family {
            AddressFamily::Ipv4 => &mut self.secondary_ip4addr,
            AddressFamily::Ipv6 => &mut self.secondary_ip6addr,
        }
    }

    /// True if the address is this port's primary or one of its secondaries
    pub fn contains(&self, family: AddressFamily, addr: &NetAddress) -> bool {
        self.primary(family) == Some(addr) || self.secondary(family).contains(addr)
    }

    /// True if any address is configured
    pub fn is_l3(&self) -> bool {
        self.ip4_address.is_some()
            || self.ip6_address.is_some()
            || !self.secondary_ip4addr.is_empty()
            || !self.secondary_ip6addr.is_empty()
    }
}

/// Kernel addresses observed on one interface during a dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelPort {
    pub name: String,
    pub ip4addr: AddressSet,
    pub ip6addr: AddressSet,
}

impl KernelPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn addresses(&self, family: AddressFamily) -> &AddressSet {
        match family {
            AddressFamily::Ipv4 => &self.ip4addr,
            AddressFamily::Ipv6 => &self.ip6addr,
        }
    }

    pub fn addresses_mut(&mut self, family: AddressFamily) -> &mut AddressSet {
        match family {
            AddressFamily::Ipv4 => &mut self.ip4addr,
            AddressFamily::Ipv6 => &mut self.ip6addr,
        }
    }
}

/// Interface name → kernel observed addresses
pub type KernelPortMap = BTreeMap<String, KernelPort>;

/// Interface name → shadow port
pub type PortMap = BTreeMap<String, Port>;

/// Internal VLAN id from a port's hw_config map, -1 when absent or zero
pub fn internal_vlan_id(hw_config: &BTreeMap<String, String>) -> i32 {
    hw_config
        .get(hw_config_keys::INTERNAL_VLAN_ID)
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|vid| *vid != 0)
        .unwrap_or(NO_INTERNAL_VLAN)
}
