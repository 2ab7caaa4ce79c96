//! Radio stack abstraction consumed by the session manager.
//!
//! Every request method only reports whether the stack accepted the request.
//! The outcome arrives later as a [`RadioEvent`] on the channel the backend
//! was built with. Implementations must never call back into the session
//! manager from inside a request method; the manager holds its state lock
//! while issuing requests.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::{BleError, Capability};
use crate::core::bluetooth::types::{
    AdvertiseParams, CharacteristicId, DescriptorId, DeviceAddress, GattHandle, GattService,
    ScanSettings,
};

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Asynchronous completions delivered by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    // central role
    ScanResult {
        address: DeviceAddress,
        name: Option<String>,
        rssi: i16,
        /// (company id, payload) in the order the advertisement carried them
        manufacturer_data: Vec<(u16, Vec<u8>)>,
    },
    ScanFailed {
        error_code: i32,
    },
    ConnectionStateChanged {
        address: DeviceAddress,
        /// Handle the link was opened under; completions for a closed handle are stale.
        handle: GattHandle,
        status: i32,
        connected: bool,
    },
    ServicesDiscovered {
        address: DeviceAddress,
        status: i32,
    },
    CharacteristicRead {
        address: DeviceAddress,
        characteristic: CharacteristicId,
        status: i32,
        value: Vec<u8>,
    },
    CharacteristicWrite {
        address: DeviceAddress,
        characteristic: CharacteristicId,
        status: i32,
    },
    CharacteristicChanged {
        address: DeviceAddress,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    DescriptorRead {
        address: DeviceAddress,
        descriptor: DescriptorId,
        status: i32,
        value: Vec<u8>,
    },
    DescriptorWrite {
        address: DeviceAddress,
        descriptor: DescriptorId,
        status: i32,
    },
    RemoteRssi {
        address: DeviceAddress,
        rssi: i16,
        status: i32,
    },

    // peripheral role
    AdvertiseStarted,
    AdvertiseFailed {
        error_code: i32,
    },
    ServerConnectionStateChanged {
        device: DeviceAddress,
        status: i32,
        connected: bool,
    },
    ServiceAdded {
        service: Uuid,
        status: i32,
    },
    CharacteristicReadRequest {
        device: DeviceAddress,
        request_id: i32,
        offset: usize,
        characteristic: Uuid,
    },
    CharacteristicWriteRequest {
        device: DeviceAddress,
        request_id: i32,
        characteristic: Uuid,
        prepared_write: bool,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    },
    DescriptorReadRequest {
        device: DeviceAddress,
        request_id: i32,
        offset: usize,
        descriptor: Uuid,
    },
    DescriptorWriteRequest {
        device: DeviceAddress,
        request_id: i32,
        descriptor: Uuid,
        prepared_write: bool,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    },
    NotificationSent {
        device: DeviceAddress,
        status: i32,
    },
    MtuChanged {
        device: DeviceAddress,
        mtu: u16,
    },
    ExecuteWrite {
        device: DeviceAddress,
        request_id: i32,
        execute: bool,
    },
}

/// Platform Bluetooth adapter, GATT client and GATT server.
pub trait RadioStack: Send + Sync {
    fn is_le_supported(&self) -> bool;

    /// Acquires (and enables) the adapter.
    fn open_adapter(&self) -> Result<(), BleError>;

    fn open_scanner(&self) -> Result<(), BleError>;

    fn start_scan(&self, settings: &ScanSettings) -> Result<(), BleError>;

    fn stop_scan(&self);

    /// Starts a direct (non auto-connect) connection.
    fn connect_gatt(&self, address: &DeviceAddress) -> Option<GattHandle>;

    fn disconnect(&self, handle: GattHandle);

    /// Releases the handle. The handle must not be used afterwards.
    fn close(&self, handle: GattHandle);

    fn discover_services(&self, handle: GattHandle) -> bool;

    /// Looks up a service in the connection's current service table.
    fn service(&self, handle: GattHandle, uuid: Uuid) -> Option<GattService>;

    fn read_characteristic(&self, handle: GattHandle, characteristic: &CharacteristicId) -> bool;

    fn write_characteristic(&self, handle: GattHandle, characteristic: &CharacteristicId, value: &[u8]) -> bool;

    fn read_descriptor(&self, handle: GattHandle, descriptor: &DescriptorId) -> bool;

    fn write_descriptor(&self, handle: GattHandle, descriptor: &DescriptorId, value: &[u8]) -> bool;

    /// Registers or unregisters local delivery of value-change pushes.
    fn set_characteristic_notification(&self, handle: GattHandle, characteristic: &CharacteristicId, enabled: bool) -> bool;

    fn read_remote_rssi(&self, handle: GattHandle) -> bool;

    fn supports_cache_refresh(&self) -> bool {
        false
    }

    /// Drops the cached GATT table of the connected device.
    fn refresh_cache(&self, _handle: GattHandle) -> Result<bool, BleError> {
        Err(BleError::UnsupportedCapability(Capability::CacheRefresh))
    }

    fn supports_advertising(&self) -> bool;

    fn set_adapter_name(&self, name: &str) -> bool;

    fn start_advertising(&self, params: &AdvertiseParams) -> Result<(), BleError>;

    fn stop_advertising(&self);

    fn open_gatt_server(&self) -> Result<(), BleError>;

    fn add_service(&self, service: &GattService) -> bool;

    fn clear_services(&self);

    fn close_gatt_server(&self);

    fn send_response(
        &self,
        device: &DeviceAddress,
        request_id: i32,
        status: i32,
        offset: usize,
        value: Option<&[u8]>,
    ) -> bool;

    fn notify_characteristic_changed(
        &self,
        device: &DeviceAddress,
        characteristic: &CharacteristicId,
        value: &[u8],
        confirm: bool,
    ) -> bool;
}
