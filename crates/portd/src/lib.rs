//! Port L3 Daemon - kernel interface address reconciliation
//!
//! portd keeps the IPv4/IPv6 addresses on kernel network interfaces in
//! line with the desired-state store:
//! - Startup reconciliation against a full rtnetlink address dump
//! - Incremental primary and secondary address updates per port
//! - Connected-route and next-hop synthesis for primary addresses
//! - Kernel IP forwarding toggles

pub mod config_file;
pub mod connected_route;
pub mod error;
pub mod forwarding;
pub mod l3_sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod netlink;
pub mod prefix;
pub mod store;
pub mod tables;
pub mod types;
pub mod wire;

pub use config_file::PortdConfig;
pub use error::{PortdError, Result};
pub use l3_sync::{L3Sync, ReconcileStats};
pub use netlink::{AddressCommand, AddressTransport, NetlinkTransport};
pub use store::{diff_ports, ColumnChanges, DesiredStateStore, MemoryStore, PortChange, PortRow, VrfRow};
pub use types::{AddressFamily, AddressSet, NetAddress, Port};
