//! Table, column and constant names

// Desired-state tables
pub const VRF_TABLE: &str = "VRF";
pub const PORT_TABLE: &str = "Port";
pub const ROUTE_TABLE: &str = "Route";
pub const NEXTHOP_TABLE: &str = "Nexthop";

// Port column names
pub mod port_fields {
    pub const NAME: &str = "name";
    pub const IP4_ADDRESS: &str = "ip4_address";
    pub const IP6_ADDRESS: &str = "ip6_address";
    pub const IP4_ADDRESS_SECONDARY: &str = "ip4_address_secondary";
    pub const IP6_ADDRESS_SECONDARY: &str = "ip6_address_secondary";
    pub const HW_CONFIG: &str = "hw_config";
}

// Port hw_config keys
pub mod hw_config_keys {
    pub const INTERNAL_VLAN_ID: &str = "internal_vlan_id";
}

// Route column values
pub mod route_values {
    pub const FAMILY_IPV4: &str = "ipv4";
    pub const FAMILY_IPV6: &str = "ipv6";
    pub const SUB_FAMILY_UNICAST: &str = "unicast";
    pub const FROM_CONNECTED: &str = "connected";
}

/// Administrative distance of a connected route
pub const CONNECTED_ROUTE_DISTANCE: u32 = 0;

/// Internal VLAN id when the port has none
pub const NO_INTERNAL_VLAN: i32 = -1;

/// Loopback interface, never reconciled
pub const LOOPBACK_INTERFACE: &str = "lo";

// Forwarding knobs
pub const IPV4_FORWARDING_PATH: &str = "/proc/sys/net/ipv4/ip_forward";
pub const IPV6_FORWARDING_PATH: &str = "/proc/sys/net/ipv6/conf/all/forwarding";

// Daemon defaults
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/portd.conf";
pub const DEFAULT_SNAPSHOT_PATH: &str = "/etc/sonic/portd_db.json";
