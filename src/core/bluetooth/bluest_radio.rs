//! [`RadioStack`] backed by the cross-platform `bluest` crate.
//!
//! bluest only provides the central role. The peripheral methods report the
//! missing capability so the manager rejects `start_advertiser` cleanly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bluest::{Adapter, Characteristic, Descriptor, Device};
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{GATT_FAILURE, GATT_SUCCESS, UUID_CLIENT_CONFIG_DESCRIPTOR};
use crate::core::bluetooth::error::{BleError, Capability};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::radio::{RadioEvent, RadioEventSender, RadioStack};
use crate::core::bluetooth::scanner::BluestScanner;
use crate::core::bluetooth::types::{
    AdvertiseParams, AttributePermissions, CharacteristicId, CharacteristicProperties, DescriptorId,
    DeviceAddress, GattCharacteristic, GattDescriptor, GattHandle, GattService, ScanSettings,
};

const LINK_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Snapshot of a device's GATT table taken at service discovery.
#[derive(Default)]
struct ServiceTable {
    services: Vec<GattService>,
    characteristics: HashMap<CharacteristicId, Characteristic>,
    descriptors: HashMap<DescriptorId, Descriptor>,
}

struct Connection {
    address: DeviceAddress,
    device: Device,
    table: ServiceTable,
    /// Stops the link watcher
    cancel_token: CancellationToken,
}

type Connections = Arc<Mutex<HashMap<GattHandle, Connection>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn status_of<T>(result: &Result<T, bluest::Error>) -> i32 {
    if result.is_ok() { GATT_SUCCESS } else { GATT_FAILURE }
}

fn convert_properties(props: bluest::CharacteristicProperties) -> CharacteristicProperties {
    let mut out = CharacteristicProperties::empty();
    for (set, bit) in [
        (props.broadcast, CharacteristicProperties::BROADCAST),
        (props.read, CharacteristicProperties::READ),
        (props.write_without_response, CharacteristicProperties::WRITE_NO_RESPONSE),
        (props.write, CharacteristicProperties::WRITE),
        (props.notify, CharacteristicProperties::NOTIFY),
        (props.indicate, CharacteristicProperties::INDICATE),
    ] {
        if set {
            out = out | bit;
        }
    }
    out
}

pub struct BluestRadio {
    adapter: Option<Adapter>,
    runtime: Handle,
    events: RadioEventSender,
    devices: Arc<Mutex<HashMap<DeviceAddress, Device>>>,
    scanner: Mutex<Option<BluestScanner>>,
    connections: Connections,
    notifications: NotificationHandler,
    next_handle: AtomicU64,
}

impl BluestRadio {
    /// Opens the default adapter and waits until it is powered.
    ///
    /// A missing adapter is not an error here; `open_adapter` reports it.
    pub async fn new(events: RadioEventSender) -> Self {
        let adapter = match Adapter::default().await {
            Some(adapter) => match adapter.wait_available().await {
                Ok(()) => {
                    info!("Bluetooth adapter is available.");
                    Some(adapter)
                }
                Err(e) => {
                    error!("Bluetooth adapter is not available: {}", e);
                    None
                }
            },
            None => {
                error!("Bluetooth adapter not found");
                None
            }
        };

        Self {
            adapter,
            runtime: Handle::current(),
            events,
            devices: Arc::new(Mutex::new(HashMap::new())),
            scanner: Mutex::new(None),
            connections: Arc::new(Mutex::new(HashMap::new())),
            notifications: NotificationHandler::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    fn send(events: &RadioEventSender, event: RadioEvent) {
        if events.send(event).is_err() {
            debug!("Radio event channel closed.");
        }
    }

    fn device_of(&self, handle: GattHandle) -> Option<(DeviceAddress, Device)> {
        lock(&self.connections)
            .get(&handle)
            .map(|c| (c.address.clone(), c.device.clone()))
    }

    async fn connect_task(
        adapter: Adapter,
        device: Device,
        handle: GattHandle,
        address: DeviceAddress,
        events: RadioEventSender,
        cancel_token: CancellationToken,
    ) {
        info!("Initiating connection to {}...", address);
        let result = tokio::select! {
            result = adapter.connect_device(&device) => result,
            _ = cancel_token.cancelled() => return,
        };
        if let Err(e) = result {
            error!("Connection to {} failed: {}", address, e);
            Self::send(
                &events,
                RadioEvent::ConnectionStateChanged {
                    address,
                    handle,
                    status: GATT_FAILURE,
                    connected: false,
                },
            );
            return;
        }
        Self::send(
            &events,
            RadioEvent::ConnectionStateChanged {
                address: address.clone(),
                handle,
                status: GATT_SUCCESS,
                connected: true,
            },
        );

        // bluest has no per-device disconnect callback on every platform; poll the link
        let mut interval = tokio::time::interval(LINK_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !device.is_connected().await {
                        warn!("Link to {} lost.", address);
                        Self::send(
                            &events,
                            RadioEvent::ConnectionStateChanged {
                                address,
                                handle,
                                status: GATT_FAILURE,
                                connected: false,
                            },
                        );
                        break;
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn snapshot_services(device: &Device) -> Result<ServiceTable, bluest::Error> {
        let mut table = ServiceTable::default();
        for service in device.discover_services().await? {
            let service_uuid = service.uuid();
            let mut gatt_service = GattService::new(service_uuid);

            for characteristic in service.discover_characteristics().await? {
                let char_uuid = characteristic.uuid();
                let properties = convert_properties(characteristic.properties().await?);
                let mut gatt_char = GattCharacteristic::new(char_uuid, properties, AttributePermissions::default());
                let char_id = CharacteristicId::new(service_uuid, char_uuid);

                match characteristic.discover_descriptors().await {
                    Ok(descriptors) => {
                        for descriptor in descriptors {
                            let desc_uuid = descriptor.uuid();
                            gatt_char = gatt_char.with_descriptor(GattDescriptor {
                                uuid: desc_uuid,
                                permissions: AttributePermissions::default(),
                            });
                            table
                                .descriptors
                                .insert(DescriptorId::new(service_uuid, char_uuid, desc_uuid), descriptor);
                        }
                    }
                    Err(e) => warn!("Failed to discover descriptors of {}: {}", char_uuid, e),
                }

                debug!("Characteristic {} in {}: {:?}", char_uuid, service_uuid, properties);
                table.characteristics.insert(char_id, characteristic);
                gatt_service = gatt_service.with_characteristic(gatt_char);
            }
            table.services.push(gatt_service);
        }
        Ok(table)
    }

    async fn discover_task(
        connections: Connections,
        handle: GattHandle,
        device: Device,
        address: DeviceAddress,
        events: RadioEventSender,
    ) {
        let status = match Self::snapshot_services(&device).await {
            Ok(table) => {
                info!("Discovered {} services on {}", table.services.len(), address);
                match lock(&connections).get_mut(&handle) {
                    Some(connection) => connection.table = table,
                    None => return,
                }
                GATT_SUCCESS
            }
            Err(e) => {
                error!("Service discovery on {} failed: {}", address, e);
                GATT_FAILURE
            }
        };
        Self::send(&events, RadioEvent::ServicesDiscovered { address, status });
    }

    fn peripheral_unsupported(&self, what: &str) {
        warn!("{} is not available on this platform.", what);
    }
}

impl RadioStack for BluestRadio {
    fn is_le_supported(&self) -> bool {
        true
    }

    fn open_adapter(&self) -> Result<(), BleError> {
        self.adapter.as_ref().map(|_| ()).ok_or(BleError::AdapterUnavailable)
    }

    fn open_scanner(&self) -> Result<(), BleError> {
        let adapter = self.adapter.clone().ok_or(BleError::AdapterUnavailable)?;
        let mut scanner = lock(&self.scanner);
        if scanner.is_none() {
            *scanner = Some(BluestScanner::new(
                adapter,
                self.runtime.clone(),
                self.devices.clone(),
                self.events.clone(),
            ));
        }
        Ok(())
    }

    fn start_scan(&self, settings: &ScanSettings) -> Result<(), BleError> {
        let mut scanner = lock(&self.scanner);
        let scanner = scanner.as_mut().ok_or(BleError::NotInitialized)?;
        scanner.start_scan(settings);
        Ok(())
    }

    fn stop_scan(&self) {
        if let Some(scanner) = lock(&self.scanner).as_mut() {
            scanner.stop_scan();
        }
    }

    fn connect_gatt(&self, address: &DeviceAddress) -> Option<GattHandle> {
        let adapter = self.adapter.clone()?;
        let Some(device) = lock(&self.devices).get(address).cloned() else {
            warn!("Device {} has not been seen in a scan.", address);
            return None;
        };

        let handle = GattHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let cancel_token = CancellationToken::new();
        lock(&self.connections).insert(
            handle,
            Connection {
                address: address.clone(),
                device: device.clone(),
                table: ServiceTable::default(),
                cancel_token: cancel_token.clone(),
            },
        );
        self.runtime.spawn(Self::connect_task(
            adapter,
            device,
            handle,
            address.clone(),
            self.events.clone(),
            cancel_token,
        ));
        Some(handle)
    }

    fn disconnect(&self, handle: GattHandle) {
        let Some(adapter) = self.adapter.clone() else {
            return;
        };
        let connection = lock(&self.connections)
            .get(&handle)
            .map(|c| (c.address.clone(), c.device.clone(), c.cancel_token.clone()));
        let Some((address, device, cancel_token)) = connection else {
            return;
        };

        let connections = self.connections.clone();
        let notifications = self.notifications.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.disconnect_device(&device).await {
                error!("Failed to disconnect from {}: {}", address, e);
                if device.is_connected().await {
                    // link watcher keeps running and reports a later loss
                    return;
                }
            }
            cancel_token.cancel();
            notifications.stop_all(handle);
            if !lock(&connections).contains_key(&handle) {
                debug!("Handle {:?} for {} was closed before the disconnect finished.", handle, address);
                return;
            }
            info!("Successfully disconnected from {}", address);
            Self::send(
                &events,
                RadioEvent::ConnectionStateChanged {
                    address,
                    handle,
                    status: GATT_SUCCESS,
                    connected: false,
                },
            );
        });
    }

    fn close(&self, handle: GattHandle) {
        if let Some(connection) = lock(&self.connections).remove(&handle) {
            connection.cancel_token.cancel();
            debug!("Released handle {:?} for {}", handle, connection.address);
        }
        self.notifications.stop_all(handle);
    }

    fn discover_services(&self, handle: GattHandle) -> bool {
        let Some((address, device)) = self.device_of(handle) else {
            return false;
        };
        self.runtime.spawn(Self::discover_task(
            self.connections.clone(),
            handle,
            device,
            address,
            self.events.clone(),
        ));
        true
    }

    fn service(&self, handle: GattHandle, uuid: Uuid) -> Option<GattService> {
        lock(&self.connections)
            .get(&handle)?
            .table
            .services
            .iter()
            .find(|s| s.uuid == uuid)
            .cloned()
    }

    fn read_characteristic(&self, handle: GattHandle, id: &CharacteristicId) -> bool {
        let target = lock(&self.connections)
            .get(&handle)
            .and_then(|c| Some((c.address.clone(), c.table.characteristics.get(id)?.clone())));
        let Some((address, characteristic)) = target else {
            return false;
        };
        let events = self.events.clone();
        let id = *id;
        self.runtime.spawn(async move {
            let result = characteristic.read().await;
            let status = status_of(&result);
            let value = result.unwrap_or_else(|e| {
                error!("Read of {} failed: {}", id.characteristic, e);
                Vec::new()
            });
            Self::send(
                &events,
                RadioEvent::CharacteristicRead {
                    address,
                    characteristic: id,
                    status,
                    value,
                },
            );
        });
        true
    }

    fn write_characteristic(&self, handle: GattHandle, id: &CharacteristicId, value: &[u8]) -> bool {
        let target = lock(&self.connections)
            .get(&handle)
            .and_then(|c| Some((c.address.clone(), c.table.characteristics.get(id)?.clone())));
        let Some((address, characteristic)) = target else {
            return false;
        };
        let events = self.events.clone();
        let id = *id;
        let value = value.to_vec();
        self.runtime.spawn(async move {
            let result = characteristic.write(&value).await;
            if let Err(e) = &result {
                error!("Write to {} failed: {}", id.characteristic, e);
            }
            Self::send(
                &events,
                RadioEvent::CharacteristicWrite {
                    address,
                    characteristic: id,
                    status: status_of(&result),
                },
            );
        });
        true
    }

    fn read_descriptor(&self, handle: GattHandle, id: &DescriptorId) -> bool {
        let target = lock(&self.connections)
            .get(&handle)
            .and_then(|c| Some((c.address.clone(), c.table.descriptors.get(id)?.clone())));
        let Some((address, descriptor)) = target else {
            return false;
        };
        let events = self.events.clone();
        let id = *id;
        self.runtime.spawn(async move {
            let result = descriptor.read().await;
            let status = status_of(&result);
            Self::send(
                &events,
                RadioEvent::DescriptorRead {
                    address,
                    descriptor: id,
                    status,
                    value: result.unwrap_or_default(),
                },
            );
        });
        true
    }

    fn write_descriptor(&self, handle: GattHandle, id: &DescriptorId, value: &[u8]) -> bool {
        let target = lock(&self.connections).get(&handle).map(|c| {
            (c.address.clone(), c.table.descriptors.get(id).cloned())
        });
        let Some((address, descriptor)) = target else {
            return false;
        };

        if id.descriptor == UUID_CLIENT_CONFIG_DESCRIPTOR {
            // the notify stream owns the client configuration; acknowledge without I/O
            Self::send(
                &self.events,
                RadioEvent::DescriptorWrite {
                    address,
                    descriptor: *id,
                    status: GATT_SUCCESS,
                },
            );
            return true;
        }

        let Some(descriptor) = descriptor else {
            return false;
        };
        let events = self.events.clone();
        let id = *id;
        let value = value.to_vec();
        self.runtime.spawn(async move {
            let result = descriptor.write(&value).await;
            if let Err(e) = &result {
                error!("Write to descriptor {} failed: {}", id.descriptor, e);
            }
            Self::send(
                &events,
                RadioEvent::DescriptorWrite {
                    address,
                    descriptor: id,
                    status: status_of(&result),
                },
            );
        });
        true
    }

    fn set_characteristic_notification(&self, handle: GattHandle, id: &CharacteristicId, enabled: bool) -> bool {
        if !enabled {
            self.notifications.stop_notifications(handle, id);
            return true;
        }
        let target = lock(&self.connections)
            .get(&handle)
            .and_then(|c| Some((c.address.clone(), c.table.characteristics.get(id)?.clone())));
        let Some((address, characteristic)) = target else {
            return false;
        };
        self.notifications.setup_notifications(
            &self.runtime,
            handle,
            address,
            *id,
            characteristic,
            self.events.clone(),
        );
        true
    }

    fn read_remote_rssi(&self, handle: GattHandle) -> bool {
        let Some((address, device)) = self.device_of(handle) else {
            return false;
        };
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = device.rssi().await;
            let status = status_of(&result);
            Self::send(
                &events,
                RadioEvent::RemoteRssi {
                    address,
                    rssi: result.unwrap_or(0),
                    status,
                },
            );
        });
        true
    }

    fn supports_advertising(&self) -> bool {
        false
    }

    fn set_adapter_name(&self, _name: &str) -> bool {
        self.peripheral_unsupported("Renaming the adapter");
        false
    }

    fn start_advertising(&self, _params: &AdvertiseParams) -> Result<(), BleError> {
        Err(BleError::UnsupportedCapability(Capability::Advertiser))
    }

    fn stop_advertising(&self) {}

    fn open_gatt_server(&self) -> Result<(), BleError> {
        Err(BleError::UnsupportedCapability(Capability::GattServer))
    }

    fn add_service(&self, _service: &GattService) -> bool {
        false
    }

    fn clear_services(&self) {}

    fn close_gatt_server(&self) {}

    fn send_response(
        &self,
        _device: &DeviceAddress,
        _request_id: i32,
        _status: i32,
        _offset: usize,
        _value: Option<&[u8]>,
    ) -> bool {
        self.peripheral_unsupported("Answering GATT requests");
        false
    }

    fn notify_characteristic_changed(
        &self,
        _device: &DeviceAddress,
        _characteristic: &CharacteristicId,
        _value: &[u8],
        _confirm: bool,
    ) -> bool {
        self.peripheral_unsupported("Serving notifications");
        false
    }
}
