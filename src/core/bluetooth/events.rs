//! Outward event vocabulary delivered to the native callback sink.

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::types::{CharacteristicId, DescriptorId, DeviceAddress};

/// Normalized events produced by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BleEvent {
    PeripheralDiscovered {
        address: DeviceAddress,
        name: Option<String>,
        rssi: i16,
        /// Little-endian company id followed by the payload
        manufacturer_data: Option<Vec<u8>>,
    },
    ConnectionStateChanged {
        address: DeviceAddress,
        connected: bool,
    },
    ServicesDiscovered {
        address: DeviceAddress,
        success: bool,
    },
    CharacteristicRead {
        characteristic: CharacteristicId,
        data: Option<Vec<u8>>,
        is_notification: bool,
    },
    CharacteristicWriteResult {
        characteristic: CharacteristicId,
        success: bool,
    },
    DescriptorWriteResult {
        descriptor: DescriptorId,
    },
    RssiRead {
        address: DeviceAddress,
        rssi: i16,
    },
    ScanFailed {
        error_code: i32,
    },
    PeripheralConnectionStateChanged {
        /// `None` on disconnect
        address: Option<DeviceAddress>,
        connected: bool,
    },
    PeripheralCharacteristicWritten {
        characteristic: String,
        data: Vec<u8>,
        response_needed: bool,
    },
    PeripheralNotificationSent {
        characteristic: String,
        status: i32,
    },
    AdvertiseFailed {
        error_code: i32,
    },
}

impl BleEvent {
    /// Event name as used on the native side and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeripheralDiscovered { .. } => "peripheral-discovered",
            Self::ConnectionStateChanged { .. } => "connection-state-changed",
            Self::ServicesDiscovered { .. } => "services-discovered",
            Self::CharacteristicRead { .. } => "characteristic-read",
            Self::CharacteristicWriteResult { .. } => "characteristic-write-result",
            Self::DescriptorWriteResult { .. } => "descriptor-write-result",
            Self::RssiRead { .. } => "rssi-read",
            Self::ScanFailed { .. } => "scan-failed",
            Self::PeripheralConnectionStateChanged { .. } => "peripheral-connection-state-changed",
            Self::PeripheralCharacteristicWritten { .. } => "peripheral-characteristic-written",
            Self::PeripheralNotificationSent { .. } => "peripheral-notification-sent",
            Self::AdvertiseFailed { .. } => "advertise-failed",
        }
    }
}

/// Receiver of [`BleEvent`]s, implemented by the native bridge.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BleEvent) -> Result<(), BleError>;
}

impl EventSink for mpsc::UnboundedSender<BleEvent> {
    fn emit(&self, event: BleEvent) -> Result<(), BleError> {
        debug!("Emitting {} event", event.name());
        self.send(event).map_err(|_| BleError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn events_serialize_with_kebab_case_tag() {
        let event = BleEvent::ConnectionStateChanged {
            address: DeviceAddress::new("AA:BB:CC:DD:EE:FF"),
            connected: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connection-state-changed");
        assert_eq!(json["address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["connected"], true);
        assert_eq!(event.name(), "connection-state-changed");
    }

    #[test]
    fn closed_channel_reports_sink_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = tx.emit(BleEvent::CharacteristicWriteResult {
            characteristic: CharacteristicId::new(Uuid::nil(), Uuid::nil()),
            success: true,
        });
        assert_eq!(result, Err(BleError::SinkClosed));
    }
}
