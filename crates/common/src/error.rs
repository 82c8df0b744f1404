//! Common error types for vrrpd components.

use std::fmt;

/// A specialized Result type for vrrpd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for vrrpd operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Nftables error: {0}")]
    Nftables(String),

    #[error("VRRP error: {0}")]
    Vrrp(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new nftables error.
    pub fn nftables(msg: impl fmt::Display) -> Self {
        Error::Nftables(msg.to_string())
    }

    /// Create a new VRRP error.
    pub fn vrrp(msg: impl fmt::Display) -> Self {
        Error::Vrrp(msg.to_string())
    }

    /// Create a new tracker error.
    pub fn tracker(msg: impl fmt::Display) -> Self {
        Error::Tracker(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
