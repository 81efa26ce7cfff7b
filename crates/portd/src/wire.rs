//! rtnetlink address message framing
//!
//! Requests and replies are `NetlinkMessage<RouteNetlinkMessage>` values.
//! This module builds the address and dump requests the transport sends and
//! splits received datagrams back into messages.

use std::net::IpAddr;

use netlink_packet_core::{
    NetlinkBuffer, NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_route::address::{AddressAttribute, AddressHeaderFlags, AddressMessage};
use netlink_packet_route::RouteNetlinkMessage;

use crate::error::{PortdError, Result};
use crate::types::AddressFamily;

// Multicast groups for address notifications
pub const RTMGRP_IPV4_IFADDR: u32 = 0x10;
pub const RTMGRP_IPV6_IFADDR: u32 = 0x100;

/// Largest request we send: netlink header, ifaddrmsg and 128 bytes of
/// attributes
pub const REQUEST_BUFFER_LEN: usize = 16 + 8 + 128;

fn nl_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Address body for an add/delete request, carrying the address as IFA_LOCAL
pub fn address_message(
    family: AddressFamily,
    index: u32,
    addr: IpAddr,
    prefix_len: u8,
    secondary: bool,
) -> AddressMessage {
    let mut msg = AddressMessage::default();
    msg.header.family = family.rtnl();
    msg.header.prefix_len = prefix_len;
    msg.header.index = index;
    if secondary {
        msg.header.flags.insert(AddressHeaderFlags::Secondary);
    }
    msg.attributes.push(AddressAttribute::Local(addr));
    msg
}

fn encode(payload: RouteNetlinkMessage, flags: u16, seq: u32) -> Result<Vec<u8>> {
    let mut header = NetlinkHeader::default();
    header.flags = flags;
    header.sequence_number = seq;

    let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
    packet.finalize();

    let needed = packet.buffer_len();
    if needed > REQUEST_BUFFER_LEN {
        return Err(PortdError::BufferOverflow {
            needed,
            capacity: REQUEST_BUFFER_LEN,
        });
    }

    let mut buf = vec![0u8; needed];
    packet.serialize(&mut buf);
    Ok(buf)
}

/// Serialize a RTM_NEWADDR/RTM_DELADDR request.
///
/// Fails with `BufferOverflow` when the message would not fit in
/// [`REQUEST_BUFFER_LEN`]; nothing is produced in that case.
pub fn encode_address_request(payload: RouteNetlinkMessage, seq: u32) -> Result<Vec<u8>> {
    encode(payload, NLM_F_REQUEST, seq)
}

/// Serialize a RTM_GETADDR dump request for one family
pub fn encode_dump_request(seq: u32, family: AddressFamily) -> Result<Vec<u8>> {
    let mut msg = AddressMessage::default();
    msg.header.family = family.rtnl();
    encode(
        RouteNetlinkMessage::GetAddress(msg),
        NLM_F_REQUEST | NLM_F_DUMP,
        seq,
    )
}

/// Messages packed in one received datagram
pub struct Messages<'a> {
    buf: &'a [u8],
    offset: usize,
}

/// Walk the messages of a datagram.
///
/// A frame whose length field does not fit the datagram yields one error and
/// ends the walk. A well-framed message whose body fails to decode yields an
/// error and the walk moves on to the next frame.
pub fn messages(buf: &[u8]) -> Messages<'_> {
    Messages { buf, offset: 0 }
}

impl Iterator for Messages<'_> {
    type Item = Result<NetlinkMessage<RouteNetlinkMessage>>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buf.get(self.offset..)?;
        if rest.is_empty() {
            return None;
        }

        let len = match NetlinkBuffer::new_checked(rest) {
            Ok(frame) => frame.length() as usize,
            Err(e) => {
                let at = self.offset;
                self.offset = self.buf.len();
                return Some(Err(PortdError::MalformedMessage(format!(
                    "bad netlink frame at offset {}: {}",
                    at, e
                ))));
            }
        };
        let frame = &rest[..len];
        self.offset += nl_align(len);

        Some(
            NetlinkMessage::<RouteNetlinkMessage>::deserialize(frame)
                .map_err(|e| PortdError::MalformedMessage(e.to_string())),
        )
    }
}
