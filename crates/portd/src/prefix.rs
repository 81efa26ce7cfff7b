//! Prefix parsing and network masking

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::{IpNetwork, Ipv6Network};

use crate::error::{PortdError, Result};
use crate::types::AddressFamily;

/// An address together with its mask length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix(IpNetwork);

impl Prefix {
    /// Address as written, host bits included
    pub fn addr(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix()
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.0.ip())
    }

    /// Network address: every bit past the mask length cleared
    pub fn masked(&self) -> Prefix {
        // the length was range checked when self was built
        IpNetwork::new(self.0.network(), self.0.prefix())
            .map(Prefix)
            .unwrap_or(*self)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.ip(), self.0.prefix())
    }
}

/// Parse `addr[/len]` for the given family.
///
/// Without a `/` the length defaults to the family width. The length must be
/// a plain decimal no larger than the width; the address must parse strictly
/// as the requested family.
pub fn parse_prefix(family: AddressFamily, s: &str) -> Result<Prefix> {
    let (addr_part, len) = match s.split_once('/') {
        Some((addr, len_str)) => {
            let len = len_str
                .parse::<u8>()
                .map_err(|_| PortdError::invalid_prefix(s, "mask length is not a number"))?;
            (addr, len)
        }
        None => (s, family.max_prefix_len()),
    };

    let addr = match family {
        AddressFamily::Ipv4 => Ipv4Addr::from_str(addr_part).map(IpAddr::V4),
        AddressFamily::Ipv6 => Ipv6Addr::from_str(addr_part).map(IpAddr::V6),
    }
    .map_err(|_| PortdError::invalid_prefix(s, format!("not a valid {} address", family)))?;

    IpNetwork::new(addr, len)
        .map(Prefix)
        .map_err(|e| PortdError::invalid_prefix(s, e.to_string()))
}

/// True for IPv6 addresses inside fe80::/10
pub fn is_link_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => Ipv6Network::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10)
            .is_ok_and(|net| net.contains(v6)),
        IpAddr::V4(_) => false,
    }
}

/// Canonical `network/len` string of a masked address
pub fn network_string(family: AddressFamily, address: &str) -> Result<String> {
    Ok(parse_prefix(family, address)?.masked().to_string())
}
