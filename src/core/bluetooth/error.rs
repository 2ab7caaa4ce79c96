//! Error types for the Bluetooth module.

use std::fmt;

use thiserror::Error;

/// Optional radio features a platform may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Bluetooth Low Energy as a whole
    LowEnergy,
    /// LE scanner handle
    Scanner,
    /// LE advertiser (peripheral role)
    Advertiser,
    /// Local GATT server (peripheral role)
    GattServer,
    /// Dropping the cached GATT table of a remote device
    CacheRefresh,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LowEnergy => "bluetooth low energy",
            Self::Scanner => "LE scanner",
            Self::Advertiser => "LE advertiser",
            Self::GattServer => "GATT server",
            Self::CacheRefresh => "GATT cache refresh",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the session manager and radio backends.
///
/// Precondition failures (wrong peer, unresolved characteristic) are not
/// errors; those operations return `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(Capability),
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,
    #[error("Bluetooth central role not initialized")]
    NotInitialized,
    #[error("Radio stack error: {0}")]
    Radio(String),
    #[error("Event sink closed")]
    SinkClosed,
}

impl From<bluest::Error> for BleError {
    fn from(e: bluest::Error) -> Self {
        BleError::Radio(e.to_string())
    }
}
