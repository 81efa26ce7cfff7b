//! Netlink transport for interface addresses
//!
//! One long-lived `NETLINK_ROUTE` socket, bound to the IPv4/IPv6 address
//! groups, carries address add/delete requests and GETADDR dumps.
//! The engine talks to it through [`AddressTransport`] so it can be driven
//! by an in-memory kernel in tests.

use std::fmt;
use std::num::NonZeroI32;

use netlink_packet_core::{NetlinkPayload, NLM_F_MULTIPART};
use netlink_packet_route::address::{
    AddressAttribute, AddressHeaderFlags, AddressMessage, AddressScope,
};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tracing::{debug, instrument, trace, warn};

use crate::error::{PortdError, Result};
use crate::prefix::parse_prefix;
use crate::tables::LOOPBACK_INTERFACE;
use crate::types::{AddressFamily, KernelPort, KernelPortMap, NetAddress};
use crate::wire::{self, RTMGRP_IPV4_IFADDR, RTMGRP_IPV6_IFADDR};

/// Default receive buffer for dump and notification datagrams
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 32 * 1024;

/// Kernel address operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressCommand {
    Add,
    Delete,
}

impl AddressCommand {
    /// Wrap an address body as RTM_NEWADDR or RTM_DELADDR
    pub fn into_message(self, msg: AddressMessage) -> RouteNetlinkMessage {
        match self {
            AddressCommand::Add => RouteNetlinkMessage::NewAddress(msg),
            AddressCommand::Delete => RouteNetlinkMessage::DelAddress(msg),
        }
    }

    pub fn from_message(msg: &RouteNetlinkMessage) -> Option<(Self, &AddressMessage)> {
        match msg {
            RouteNetlinkMessage::NewAddress(m) => Some((AddressCommand::Add, m)),
            RouteNetlinkMessage::DelAddress(m) => Some((AddressCommand::Delete, m)),
            _ => None,
        }
    }
}

impl fmt::Display for AddressCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressCommand::Add => f.write_str("add"),
            AddressCommand::Delete => f.write_str("delete"),
        }
    }
}

/// Kernel-side address programming used by the reconciliation engine
pub trait AddressTransport {
    /// Add or delete one address on an interface.
    ///
    /// Fails with `InterfaceNotFound` or `InvalidAddress` before anything is
    /// sent. A failed send is logged and reported as success.
    fn set_address(
        &mut self,
        cmd: AddressCommand,
        ifname: &str,
        address: &NetAddress,
        family: AddressFamily,
        secondary: bool,
    ) -> Result<()>;

    /// Dump every address of one family, excluding the loopback interface
    /// and IPv6 link-local addresses.
    fn dump_addresses(&mut self, family: AddressFamily) -> Result<KernelPortMap>;
}

/// Interface name/index lookups
pub trait InterfaceResolver {
    fn name_to_index(&self, name: &str) -> Option<u32>;
    fn index_to_name(&self, index: u32) -> Option<String>;
}

/// Resolver backed by if_nametoindex(3)/if_indextoname(3)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl InterfaceResolver for SystemResolver {
    fn name_to_index(&self, name: &str) -> Option<u32> {
        nix::net::if_::if_nametoindex(name)
            .ok()
            .filter(|index| *index != 0)
    }

    fn index_to_name(&self, index: u32) -> Option<String> {
        nix::net::if_::if_indextoname(index)
            .ok()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// An address change the kernel announced on the notification groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelAddressEvent {
    pub command: AddressCommand,
    pub ifname: String,
    pub family: AddressFamily,
    pub address: NetAddress,
    pub secondary: bool,
}

/// Outcome of parsing one dump datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpProgress {
    Continue,
    Done,
}

/// Address body resolved to an interface name
struct AddressRecord {
    ifname: String,
    family: AddressFamily,
    address: NetAddress,
    secondary: bool,
    link_scope: bool,
}

fn decode_address<R: InterfaceResolver + ?Sized>(
    msg: &AddressMessage,
    resolver: &R,
) -> Option<AddressRecord> {
    let family = AddressFamily::from_rtnl(msg.header.family)?;
    let Some(ifname) = resolver.index_to_name(msg.header.index) else {
        trace!(ifindex = msg.header.index, "Address on unknown ifindex, skipping");
        return None;
    };

    let ip = msg.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(ip) => Some(*ip),
        _ => None,
    })?;
    if AddressFamily::of(&ip) != family {
        return None;
    }

    Some(AddressRecord {
        ifname,
        family,
        address: NetAddress::new(format!("{}/{}", ip, msg.header.prefix_len)),
        secondary: msg.header.flags.contains(AddressHeaderFlags::Secondary),
        link_scope: msg.header.scope == AddressScope::Link,
    })
}

fn error_code(code: Option<NonZeroI32>) -> i32 {
    code.map_or(0, NonZeroI32::get)
}

/// Fold one dump datagram into `ports`.
///
/// Only messages carrying `dump_seq` count; anything else on the socket is
/// stray and skipped. The dump ends on NLMSG_DONE, an error reply, a
/// message without NLM_F_MULTI, or an undecodable datagram.
pub fn parse_dump_datagram<R: InterfaceResolver + ?Sized>(
    buf: &[u8],
    dump_seq: u32,
    family: AddressFamily,
    resolver: &R,
    ports: &mut KernelPortMap,
) -> DumpProgress {
    for msg in wire::messages(buf) {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("Dropping rest of address dump: {}", e);
                return DumpProgress::Done;
            }
        };
        if msg.header.sequence_number != dump_seq {
            trace!(seq = msg.header.sequence_number, "Stray netlink message during dump");
            continue;
        }

        match &msg.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(body)) => {
                match decode_address(body, resolver) {
                    Some(record)
                        if record.family == family && record.ifname != LOOPBACK_INTERFACE =>
                    {
                        if family == AddressFamily::Ipv6 && record.link_scope {
                            debug!(port = %record.ifname, address = %record.address, "Link local IPv6 address, ignoring");
                        } else {
                            debug!(port = %record.ifname, address = %record.address, "Kernel address");
                            ports
                                .entry(record.ifname.clone())
                                .or_insert_with(|| KernelPort::new(&record.ifname))
                                .addresses_mut(family)
                                .insert(record.address);
                        }
                    }
                    _ => {}
                }
            }
            NetlinkPayload::Done(_) => {
                debug!("End of multi part message");
                return DumpProgress::Done;
            }
            NetlinkPayload::Error(err) => {
                warn!(errno = error_code(err.code), "Kernel rejected address dump");
                return DumpProgress::Done;
            }
            _ => {}
        }

        if msg.header.flags & NLM_F_MULTIPART == 0 {
            debug!("End of message. Not a multipart message");
            return DumpProgress::Done;
        }
    }
    DumpProgress::Continue
}

/// Decode address notifications from one datagram.
///
/// Error replies to earlier fire-and-forget requests are logged here too.
pub fn parse_notifications<R: InterfaceResolver + ?Sized>(
    buf: &[u8],
    resolver: &R,
) -> Vec<KernelAddressEvent> {
    let mut events = Vec::new();
    for msg in wire::messages(buf) {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping undecodable notification: {}", e);
                continue;
            }
        };
        let inner = match &msg.payload {
            NetlinkPayload::InnerMessage(inner) => inner,
            NetlinkPayload::Error(err) => {
                if err.code.is_some() {
                    warn!(
                        seq = msg.header.sequence_number,
                        errno = -error_code(err.code),
                        "Kernel rejected address request"
                    );
                }
                continue;
            }
            _ => continue,
        };
        let Some((command, body)) = AddressCommand::from_message(inner) else {
            continue;
        };
        if let Some(record) = decode_address(body, resolver) {
            events.push(KernelAddressEvent {
                command,
                ifname: record.ifname,
                family: record.family,
                address: record.address,
                secondary: record.secondary,
            });
        }
    }
    events
}

/// Raw `NETLINK_ROUTE` socket transport
pub struct NetlinkTransport<R: InterfaceResolver = SystemResolver> {
    socket: Option<Socket>,
    resolver: R,
    seq: u32,
    recv_buffer: Vec<u8>,
    recv_buffer_size: usize,
}

impl NetlinkTransport<SystemResolver> {
    /// Create the socket and subscribe to address notifications
    pub fn open(recv_buffer_size: usize) -> Result<Self> {
        Self::open_with_resolver(recv_buffer_size, SystemResolver)
    }
}

impl<R: InterfaceResolver> NetlinkTransport<R> {
    #[instrument(skip(resolver))]
    pub fn open_with_resolver(recv_buffer_size: usize, resolver: R) -> Result<Self> {
        let mut socket =
            Socket::new(NETLINK_ROUTE).map_err(|e| PortdError::transport("socket", e))?;

        let groups = RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR;
        socket
            .bind(&SocketAddr::new(0, groups))
            .map_err(|e| PortdError::transport("bind", e))?;

        debug!("Netlink socket bound to IPv4/IPv6 address groups");

        Ok(Self {
            socket: Some(socket),
            resolver,
            seq: 0,
            recv_buffer: Vec::with_capacity(recv_buffer_size),
            recv_buffer_size,
        })
    }

    /// Close the socket. Later calls fail with a transport error.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Netlink socket closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| PortdError::transport("send", "socket closed"))?;
        socket
            .send(buf, 0)
            .map_err(|e| PortdError::transport("send", e))?;
        Ok(())
    }

    /// Receive one datagram into the reusable buffer. `Ok(None)` when a
    /// non-blocking receive finds nothing queued.
    fn recv(&mut self, flags: libc::c_int) -> Result<Option<usize>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| PortdError::transport("recv", "socket closed"))?;
        self.recv_buffer.clear();
        self.recv_buffer.reserve(self.recv_buffer_size);
        match socket.recv(&mut self.recv_buffer, flags) {
            Ok(len) => Ok(Some(len)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(PortdError::transport("recv", e)),
        }
    }

    /// Drain queued address notifications without blocking
    pub fn drain_notifications(&mut self) -> Result<Vec<KernelAddressEvent>> {
        let mut events = Vec::new();
        while let Some(len) = self.recv(libc::MSG_DONTWAIT)? {
            let datagram = &self.recv_buffer[..len.min(self.recv_buffer.len())];
            for event in parse_notifications(datagram, &self.resolver) {
                debug!(
                    command = %event.command,
                    port = %event.ifname,
                    address = %event.address,
                    secondary = event.secondary,
                    "Kernel address event"
                );
                events.push(event);
            }
        }
        Ok(events)
    }
}

impl<R: InterfaceResolver> AddressTransport for NetlinkTransport<R> {
    fn set_address(
        &mut self,
        cmd: AddressCommand,
        ifname: &str,
        address: &NetAddress,
        family: AddressFamily,
        secondary: bool,
    ) -> Result<()> {
        let index = self
            .resolver
            .name_to_index(ifname)
            .ok_or_else(|| PortdError::interface_not_found(ifname))?;

        let prefix = parse_prefix(family, address.as_str()).map_err(|e| match e {
            PortdError::InvalidPrefix { prefix, reason } => {
                PortdError::invalid_address(prefix, reason)
            }
            other => other,
        })?;

        let body = wire::address_message(
            family,
            index,
            prefix.addr(),
            prefix.prefix_len(),
            secondary,
        );
        let seq = self.next_seq();
        let request = wire::encode_address_request(cmd.into_message(body), seq)?;

        if let Err(e) = self.send(&request) {
            warn!(port = %ifname, address = %address, "Netlink failed to {} address: {}", cmd, e);
            return Ok(());
        }

        debug!(
            port = %ifname,
            address = %address,
            mask_len = prefix.prefix_len(),
            secondary,
            "Netlink {} address",
            cmd
        );
        Ok(())
    }

    #[instrument(skip(self))]
    fn dump_addresses(&mut self, family: AddressFamily) -> Result<KernelPortMap> {
        let seq = self.next_seq();
        let request = wire::encode_dump_request(seq, family)?;
        self.send(&request)?;
        debug!("Netlink {} address dump request sent", family);

        let mut ports = KernelPortMap::new();
        loop {
            let len = match self.recv(0) {
                Ok(Some(len)) => len,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Address dump ended early: {}", e);
                    break;
                }
            };
            let datagram = &self.recv_buffer[..len.min(self.recv_buffer.len())];
            if parse_dump_datagram(datagram, seq, family, &self.resolver, &mut ports)
                == DumpProgress::Done
            {
                break;
            }
        }
        Ok(ports)
    }
}

impl<R: InterfaceResolver> Drop for NetlinkTransport<R> {
    fn drop(&mut self) {
        self.close();
    }
}
