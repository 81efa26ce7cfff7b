//! Kernel IP forwarding knobs
//!
//! Each path gets an ASCII "0" or "1". A failure on one path is logged and
//! does not stop the other.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::tables::{IPV4_FORWARDING_PATH, IPV6_FORWARDING_PATH};
use crate::types::AddressFamily;

/// Forwarding sysctl locations
#[derive(Debug, Clone)]
pub struct ForwardingPaths {
    pub ipv4: PathBuf,
    pub ipv6: PathBuf,
}

impl Default for ForwardingPaths {
    fn default() -> Self {
        Self {
            ipv4: PathBuf::from(IPV4_FORWARDING_PATH),
            ipv6: PathBuf::from(IPV6_FORWARDING_PATH),
        }
    }
}

impl ForwardingPaths {
    fn path(&self, family: AddressFamily) -> &Path {
        match family {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }
}

/// Enable or disable forwarding for both families. Returns how many paths
/// were written.
pub fn config_iprouting(paths: &ForwardingPaths, enable: bool) -> usize {
    let value = if enable { "1" } else { "0" };
    let mut written = 0;
    for family in AddressFamily::ALL {
        let path = paths.path(family);
        match fs::write(path, value) {
            Ok(()) => {
                written += 1;
                debug!(
                    "{} {} forwarding",
                    if enable { "Enabled" } else { "Disabled" },
                    family
                );
            }
            Err(e) => error!(path = %path.display(), "Unable to write forwarding setting: {}", e),
        }
    }
    written
}
