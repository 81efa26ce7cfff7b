//! Error types for portd
//!
//! Every failure in the L3 core degrades to "this pass did less than
//! intended". Nothing here terminates the process; callers log and move on.

use thiserror::Error;

/// Errors that can occur in portd
#[derive(Debug, Error)]
pub enum PortdError {
    /// Malformed address string handed to a kernel operation.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The offending input.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Prefix string failed strict parsing or its mask length is out of range.
    #[error("Invalid prefix '{prefix}': {reason}")]
    InvalidPrefix {
        /// The offending input.
        prefix: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Kernel has no interface with this name right now.
    #[error("Interface not found: {name}")]
    InterfaceNotFound {
        /// Interface name.
        name: String,
    },

    /// Socket creation, bind, send or receive failed.
    #[error("Netlink operation failed: {operation}: {message}")]
    Transport {
        /// The operation that failed (e.g., "open", "send", "recv").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A request did not fit its fixed buffer.
    #[error("Netlink request needs {needed} bytes, buffer holds {capacity}")]
    BufferOverflow {
        /// Bytes required after alignment.
        needed: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// Kernel response could not be decoded.
    #[error("Malformed netlink message: {0}")]
    MalformedMessage(String),

    /// Expected desired-state row is absent.
    #[error("Entry not found: {table}:{key}")]
    NotFound {
        /// The table name.
        table: String,
        /// The key.
        key: String,
    },

    /// Address listed twice in one configuration batch.
    #[error("Duplicate address in {port} secondary list: {address}")]
    DuplicateEntry {
        /// Owning port.
        port: String,
        /// The repeated address.
        address: String,
    },

    /// No VRF exists in the desired state yet.
    #[error("No VRF information available")]
    NoVrf,

    /// More than one VRF is configured; only a single VRF is supported.
    #[error("Only one VRF is supported, found {count}")]
    UnsupportedMultiVrf {
        /// Number of VRFs found.
        count: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortdError {
    /// Creates an invalid address error.
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid prefix error.
    pub fn invalid_prefix(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }

    /// Creates an interface not found error.
    pub fn interface_not_found(name: impl Into<String>) -> Self {
        Self::InterfaceNotFound { name: name.into() }
    }

    /// Creates a transport error.
    pub fn transport(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Returns true if a later pass may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InterfaceNotFound { .. } | Self::Transport { .. } | Self::NoVrf
        )
    }
}

/// Result type alias for portd operations
pub type Result<T> = std::result::Result<T, PortdError>;
