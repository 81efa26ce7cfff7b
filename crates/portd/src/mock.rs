//! In-memory kernel for tests
//!
//! `MockTransport` keeps per-interface address sets and records every
//! add/delete it accepts, so engine tests can assert on the exact kernel
//! operations a pass issued.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PortdError, Result};
use crate::netlink::{AddressCommand, AddressTransport};
use crate::prefix::parse_prefix;
use crate::tables::LOOPBACK_INTERFACE;
use crate::types::{AddressFamily, AddressSet, KernelPort, KernelPortMap, NetAddress};

/// One accepted kernel operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelOp {
    pub command: AddressCommand,
    pub ifname: String,
    pub address: NetAddress,
    pub family: AddressFamily,
    pub secondary: bool,
}

impl KernelOp {
    pub fn add(ifname: &str, address: &str) -> Self {
        Self::new(AddressCommand::Add, ifname, address, false)
    }

    pub fn add_secondary(ifname: &str, address: &str) -> Self {
        Self::new(AddressCommand::Add, ifname, address, true)
    }

    pub fn delete(ifname: &str, address: &str) -> Self {
        Self::new(AddressCommand::Delete, ifname, address, false)
    }

    pub fn delete_secondary(ifname: &str, address: &str) -> Self {
        Self::new(AddressCommand::Delete, ifname, address, true)
    }

    fn new(command: AddressCommand, ifname: &str, address: &str, secondary: bool) -> Self {
        let address = NetAddress::new(address);
        Self {
            command,
            ifname: ifname.to_string(),
            family: address.family(),
            address,
            secondary,
        }
    }
}

/// Fake kernel address table
#[derive(Debug, Clone)]
pub struct MockTransport {
    interfaces: BTreeSet<String>,
    addresses: KernelPortMap,
    link_local: BTreeMap<String, AddressSet>,
    ops: Vec<KernelOp>,
    fail_dump: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Kernel with only the loopback interface
    pub fn new() -> Self {
        let mut interfaces = BTreeSet::new();
        interfaces.insert(LOOPBACK_INTERFACE.to_string());
        Self {
            interfaces,
            addresses: KernelPortMap::new(),
            link_local: BTreeMap::new(),
            ops: Vec::new(),
            fail_dump: false,
        }
    }

    pub fn with_interfaces(names: &[&str]) -> Self {
        let mut mock = Self::new();
        for name in names {
            mock.add_interface(name);
        }
        mock
    }

    pub fn add_interface(&mut self, name: &str) {
        self.interfaces.insert(name.to_string());
    }

    /// Place an address in the kernel without recording an operation
    pub fn seed(&mut self, ifname: &str, address: &str) {
        self.add_interface(ifname);
        let address = NetAddress::new(address);
        let family = address.family();
        self.addresses
            .entry(ifname.to_string())
            .or_insert_with(|| KernelPort::new(ifname))
            .addresses_mut(family)
            .insert(address);
    }

    /// Place an IPv6 link-local address, invisible to dumps
    pub fn seed_link_local(&mut self, ifname: &str, address: &str) {
        self.add_interface(ifname);
        self.link_local
            .entry(ifname.to_string())
            .or_default()
            .insert(NetAddress::new(address));
    }

    /// Make every following dump fail
    pub fn set_dump_failure(&mut self, fail: bool) {
        self.fail_dump = fail;
    }

    /// Addresses of one family currently on an interface
    pub fn addresses(&self, ifname: &str, family: AddressFamily) -> AddressSet {
        self.addresses
            .get(ifname)
            .map(|p| p.addresses(family).clone())
            .unwrap_or_default()
    }

    /// Interface names that carry any dumpable address
    pub fn configured_interfaces(&self) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|(_, p)| !p.ip4addr.is_empty() || !p.ip6addr.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn link_local(&self, ifname: &str) -> AddressSet {
        self.link_local.get(ifname).cloned().unwrap_or_default()
    }

    pub fn ops(&self) -> &[KernelOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<KernelOp> {
        std::mem::take(&mut self.ops)
    }
}

impl AddressTransport for MockTransport {
    fn set_address(
        &mut self,
        cmd: AddressCommand,
        ifname: &str,
        address: &NetAddress,
        family: AddressFamily,
        secondary: bool,
    ) -> Result<()> {
        if !self.interfaces.contains(ifname) {
            return Err(PortdError::interface_not_found(ifname));
        }
        let prefix = parse_prefix(family, address.as_str())
            .map_err(|_| PortdError::invalid_address(address.as_str(), "malformed prefix"))?;
        let canonical = NetAddress::new(prefix.to_string());

        let set = if canonical.is_link_local() {
            self.link_local.entry(ifname.to_string()).or_default()
        } else {
            self.addresses
                .entry(ifname.to_string())
                .or_insert_with(|| KernelPort::new(ifname))
                .addresses_mut(family)
        };
        match cmd {
            AddressCommand::Add => {
                set.insert(canonical.clone());
            }
            AddressCommand::Delete => {
                set.remove(&canonical);
            }
        }

        self.ops.push(KernelOp {
            command: cmd,
            ifname: ifname.to_string(),
            address: canonical,
            family,
            secondary,
        });
        Ok(())
    }

    fn dump_addresses(&mut self, family: AddressFamily) -> Result<KernelPortMap> {
        if self.fail_dump {
            return Err(PortdError::transport("recv", "mock dump failure"));
        }
        Ok(self
            .addresses
            .iter()
            .filter(|(name, port)| {
                name.as_str() != LOOPBACK_INTERFACE && !port.addresses(family).is_empty()
            })
            .map(|(name, port)| {
                let mut observed = KernelPort::new(name.as_str());
                *observed.addresses_mut(family) = port.addresses(family).clone();
                (name.clone(), observed)
            })
            .collect())
    }
}
