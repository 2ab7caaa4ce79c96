#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ble_session_bridge_lib::config::ble_config::BleConfig;
use ble_session_bridge_lib::core::bluetooth::constants::UUID_CLIENT_CONFIG_DESCRIPTOR;
use ble_session_bridge_lib::core::bluetooth::{
    AdvertiseParams, AttributePermissions, BleError, BleEvent, Capability, CharacteristicId,
    CharacteristicProperties, DescriptorId, DeviceAddress, GattCharacteristic, GattDescriptor,
    GattHandle, GattService, RadioStack, ScanSettings, SessionManager,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Every request the manager made of the radio, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    OpenAdapter,
    OpenScanner,
    StartScan(ScanSettings),
    StopScan,
    ConnectGatt(DeviceAddress),
    Disconnect(GattHandle),
    Close(GattHandle),
    DiscoverServices(GattHandle),
    ReadCharacteristic(CharacteristicId),
    WriteCharacteristic(CharacteristicId, Vec<u8>),
    ReadDescriptor(DescriptorId),
    WriteDescriptor(DescriptorId, Vec<u8>),
    SetNotification(CharacteristicId, bool),
    ReadRssi(GattHandle),
    RefreshCache(GattHandle),
    SetAdapterName(String),
    StartAdvertising(AdvertiseParams),
    StopAdvertising,
    OpenGattServer,
    AddService(Uuid),
    ClearServices,
    CloseGattServer,
    SendResponse {
        device: DeviceAddress,
        request_id: i32,
        status: i32,
        offset: usize,
        value: Option<Vec<u8>>,
    },
    Notify {
        device: DeviceAddress,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
}

/// Radio stack that accepts everything and records what it was asked.
pub struct FakeRadio {
    calls: Mutex<Vec<Call>>,
    services: Mutex<Vec<GattService>>,
    next_handle: AtomicU64,
    pub le_supported: AtomicBool,
    pub advertising_supported: AtomicBool,
    pub cache_refresh_supported: AtomicBool,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            le_supported: AtomicBool::new(true),
            advertising_supported: AtomicBool::new(true),
            cache_refresh_supported: AtomicBool::new(false),
        }
    }

    pub fn add_remote_service(&self, service: GattService) {
        self.services.lock().unwrap().push(service);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RadioStack for FakeRadio {
    fn is_le_supported(&self) -> bool {
        self.le_supported.load(Ordering::SeqCst)
    }

    fn open_adapter(&self) -> Result<(), BleError> {
        self.record(Call::OpenAdapter);
        Ok(())
    }

    fn open_scanner(&self) -> Result<(), BleError> {
        self.record(Call::OpenScanner);
        Ok(())
    }

    fn start_scan(&self, settings: &ScanSettings) -> Result<(), BleError> {
        self.record(Call::StartScan(settings.clone()));
        Ok(())
    }

    fn stop_scan(&self) {
        self.record(Call::StopScan);
    }

    fn connect_gatt(&self, address: &DeviceAddress) -> Option<GattHandle> {
        self.record(Call::ConnectGatt(address.clone()));
        Some(GattHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    fn disconnect(&self, handle: GattHandle) {
        self.record(Call::Disconnect(handle));
    }

    fn close(&self, handle: GattHandle) {
        self.record(Call::Close(handle));
    }

    fn discover_services(&self, handle: GattHandle) -> bool {
        self.record(Call::DiscoverServices(handle));
        true
    }

    fn service(&self, _handle: GattHandle, uuid: Uuid) -> Option<GattService> {
        self.services.lock().unwrap().iter().find(|s| s.uuid == uuid).cloned()
    }

    fn read_characteristic(&self, _handle: GattHandle, characteristic: &CharacteristicId) -> bool {
        self.record(Call::ReadCharacteristic(*characteristic));
        true
    }

    fn write_characteristic(&self, _handle: GattHandle, characteristic: &CharacteristicId, value: &[u8]) -> bool {
        self.record(Call::WriteCharacteristic(*characteristic, value.to_vec()));
        true
    }

    fn read_descriptor(&self, _handle: GattHandle, descriptor: &DescriptorId) -> bool {
        self.record(Call::ReadDescriptor(*descriptor));
        true
    }

    fn write_descriptor(&self, _handle: GattHandle, descriptor: &DescriptorId, value: &[u8]) -> bool {
        self.record(Call::WriteDescriptor(*descriptor, value.to_vec()));
        true
    }

    fn set_characteristic_notification(&self, _handle: GattHandle, characteristic: &CharacteristicId, enabled: bool) -> bool {
        self.record(Call::SetNotification(*characteristic, enabled));
        true
    }

    fn read_remote_rssi(&self, handle: GattHandle) -> bool {
        self.record(Call::ReadRssi(handle));
        true
    }

    fn supports_cache_refresh(&self) -> bool {
        self.cache_refresh_supported.load(Ordering::SeqCst)
    }

    fn refresh_cache(&self, handle: GattHandle) -> Result<bool, BleError> {
        self.record(Call::RefreshCache(handle));
        if self.supports_cache_refresh() {
            Ok(true)
        } else {
            Err(BleError::UnsupportedCapability(Capability::CacheRefresh))
        }
    }

    fn supports_advertising(&self) -> bool {
        self.advertising_supported.load(Ordering::SeqCst)
    }

    fn set_adapter_name(&self, name: &str) -> bool {
        self.record(Call::SetAdapterName(name.to_string()));
        true
    }

    fn start_advertising(&self, params: &AdvertiseParams) -> Result<(), BleError> {
        self.record(Call::StartAdvertising(params.clone()));
        Ok(())
    }

    fn stop_advertising(&self) {
        self.record(Call::StopAdvertising);
    }

    fn open_gatt_server(&self) -> Result<(), BleError> {
        self.record(Call::OpenGattServer);
        Ok(())
    }

    fn add_service(&self, service: &GattService) -> bool {
        self.record(Call::AddService(service.uuid));
        true
    }

    fn clear_services(&self) {
        self.record(Call::ClearServices);
    }

    fn close_gatt_server(&self) {
        self.record(Call::CloseGattServer);
    }

    fn send_response(
        &self,
        device: &DeviceAddress,
        request_id: i32,
        status: i32,
        offset: usize,
        value: Option<&[u8]>,
    ) -> bool {
        self.record(Call::SendResponse {
            device: device.clone(),
            request_id,
            status,
            offset,
            value: value.map(<[u8]>::to_vec),
        });
        true
    }

    fn notify_characteristic_changed(
        &self,
        device: &DeviceAddress,
        characteristic: &CharacteristicId,
        value: &[u8],
        _confirm: bool,
    ) -> bool {
        self.record(Call::Notify {
            device: device.clone(),
            characteristic: *characteristic,
            value: value.to_vec(),
        });
        true
    }
}

pub const SERVICE: Uuid = Uuid::from_u128(0x0000_fe00_0000_1000_8000_00805f9b34fb);
pub const DATA_CHAR: Uuid = Uuid::from_u128(0x0000_fe01_0000_1000_8000_00805f9b34fb);
pub const NOTIFY_CHAR: Uuid = Uuid::from_u128(0x0000_fe02_0000_1000_8000_00805f9b34fb);
pub const INDICATE_CHAR: Uuid = Uuid::from_u128(0x0000_fe03_0000_1000_8000_00805f9b34fb);
pub const BOTH_CHAR: Uuid = Uuid::from_u128(0x0000_fe04_0000_1000_8000_00805f9b34fb);
pub const USER_DESC: Uuid = Uuid::from_u128(0x0000_2901_0000_1000_8000_00805f9b34fb);

fn cccd() -> GattDescriptor {
    GattDescriptor {
        uuid: UUID_CLIENT_CONFIG_DESCRIPTOR,
        permissions: AttributePermissions::READ | AttributePermissions::WRITE,
    }
}

/// Remote service with one plain, one notify, one indicate and one notify+indicate characteristic.
pub fn remote_service() -> GattService {
    let none = AttributePermissions::default();
    GattService::new(SERVICE)
        .with_characteristic(
            GattCharacteristic::new(
                DATA_CHAR,
                CharacteristicProperties::READ | CharacteristicProperties::WRITE,
                none,
            )
            .with_descriptor(GattDescriptor {
                uuid: USER_DESC,
                permissions: AttributePermissions::READ,
            }),
        )
        .with_characteristic(
            GattCharacteristic::new(NOTIFY_CHAR, CharacteristicProperties::NOTIFY, none).with_descriptor(cccd()),
        )
        .with_characteristic(
            GattCharacteristic::new(INDICATE_CHAR, CharacteristicProperties::INDICATE, none)
                .with_descriptor(cccd()),
        )
        .with_characteristic(
            GattCharacteristic::new(
                BOTH_CHAR,
                CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE,
                none,
            )
            .with_descriptor(cccd()),
        )
}

pub fn addr(address: &str) -> DeviceAddress {
    DeviceAddress::new(address)
}

pub struct Harness {
    pub radio: Arc<FakeRadio>,
    pub manager: SessionManager,
    pub events: mpsc::UnboundedReceiver<BleEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let radio = Arc::new(FakeRadio::new());
        radio.add_remote_service(remote_service());
        let (tx, events) = mpsc::unbounded_channel();
        let manager = SessionManager::new(radio.clone(), Arc::new(tx), BleConfig::default());
        Self { radio, manager, events }
    }

    /// Pending events, oldest first.
    pub fn drain(&mut self) -> Vec<BleEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
