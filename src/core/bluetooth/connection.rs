//! Central-role connection session
//! Tracks the single outstanding GATT client connection and its state.

use log::{debug, warn};

use crate::core::bluetooth::types::{ConnectionState, DeviceAddress, GattHandle};

/// The one open GATT client connection.
///
/// The session owns the radio handle; dropping the session from the manager
/// without closing the handle leaks it in the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralSession {
    address: DeviceAddress,
    handle: GattHandle,
    state: ConnectionState,
}

impl CentralSession {
    /// A session whose connect request was just accepted by the radio.
    pub fn connecting(address: DeviceAddress, handle: GattHandle) -> Self {
        Self {
            address,
            handle,
            state: ConnectionState::Connecting,
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn handle(&self) -> GattHandle {
        self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_peer(&self, address: &DeviceAddress) -> bool {
        &self.address == address
    }

    /// Attribute I/O is only issued on an established link.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Radio confirmed the link.
    pub fn on_connected(&mut self) {
        match self.state {
            ConnectionState::Connecting => {
                debug!("Session {} connected", self.address);
                self.state = ConnectionState::Connected;
            }
            ConnectionState::Disconnecting => {
                // a disconnect was requested before the link came up; keep tearing down
                warn!("Session {} reported connected while disconnecting", self.address);
            }
            _ => {
                debug!("Session {} already {:?}", self.address, self.state);
            }
        }
    }

    /// Caller asked the radio to drop the link.
    pub fn begin_disconnect(&mut self) {
        self.state = ConnectionState::Disconnecting;
    }
}
