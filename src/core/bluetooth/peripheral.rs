//! Peripheral role: advertising, the hosted GATT service and its single peer.

use std::collections::HashMap;
use std::sync::MutexGuard;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ble_config::GattServerConfig;
use crate::core::bluetooth::constants::{GATT_SUCCESS, UUID_CLIENT_CONFIG_DESCRIPTOR};
use crate::core::bluetooth::error::{BleError, Capability};
use crate::core::bluetooth::events::BleEvent;
use crate::core::bluetooth::manager::SessionManager;
use crate::core::bluetooth::radio::RadioEvent;
use crate::core::bluetooth::types::{
    AdvertiseParams, AttributePermissions, CharacteristicId, CharacteristicProperties, DeviceAddress,
    GattCharacteristic, GattDescriptor, GattService,
};
use crate::utils::to_hex_string;

#[derive(Debug, Default)]
pub(crate) struct PeripheralState {
    initialized: bool,
    advertising: bool,
    server_open: bool,
    peer: Option<DeviceAddress>,
    service: Option<GattService>,
    /// Values served for read requests, keyed by characteristic
    values: HashMap<Uuid, Vec<u8>>,
}

/// Builds the service hosted while advertising: a read characteristic, a
/// notify characteristic with a client configuration descriptor, and a
/// write characteristic.
pub fn build_server_service(config: &GattServerConfig) -> GattService {
    let read_char = GattCharacteristic::new(
        config.read_char_uuid,
        CharacteristicProperties::READ,
        AttributePermissions::READ,
    );
    let notify_char = GattCharacteristic::new(
        config.notify_char_uuid,
        CharacteristicProperties::NOTIFY,
        AttributePermissions::WRITE,
    )
    .with_descriptor(GattDescriptor {
        uuid: UUID_CLIENT_CONFIG_DESCRIPTOR,
        permissions: AttributePermissions::READ | AttributePermissions::WRITE,
    });
    let write_char = GattCharacteristic::new(
        config.write_char_uuid,
        CharacteristicProperties::WRITE | CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        AttributePermissions::WRITE,
    );

    GattService::new(config.service_uuid)
        .with_characteristic(read_char)
        .with_characteristic(notify_char)
        .with_characteristic(write_char)
}

impl SessionManager {
    fn lock_peripheral(&self) -> MutexGuard<'_, PeripheralState> {
        self.peripheral.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_peripheral(&self, state: &mut PeripheralState) -> Result<(), BleError> {
        self.ensure_adapter()?;
        if !self.radio().supports_advertising() {
            error!("Device does not support bluetooth LE advertising.");
            return Err(BleError::UnsupportedCapability(Capability::Advertiser));
        }
        state.initialized = true;
        info!("Bluetooth peripheral role initialized.");
        Ok(())
    }

    /// Starts advertising under `name` with optional manufacturer data.
    ///
    /// The GATT server is (re)installed once the radio confirms advertising.
    pub fn start_advertiser(
        &self,
        name: Option<&str>,
        manufacturer_id: u16,
        manufacturer_data: Option<&[u8]>,
    ) -> Result<(), BleError> {
        let mut state = self.lock_peripheral();
        if !state.initialized {
            self.init_peripheral(&mut state)?;
        }
        if state.service.is_none() {
            state.service = Some(build_server_service(&self.config.gatt_server));
        }

        let name = name.unwrap_or_default();
        if !self.radio().set_adapter_name(name) {
            warn!("Failed to set adapter name to {:?}.", name);
        }

        let advertise = &self.config.advertise;
        let params = AdvertiseParams {
            mode: advertise.mode,
            tx_power: advertise.tx_power,
            connectable: advertise.connectable,
            timeout_ms: advertise.timeout_ms,
            include_device_name: advertise.include_device_name,
            include_tx_power: advertise.include_tx_power,
            manufacturer_id,
            manufacturer_data: manufacturer_data.map(<[u8]>::to_vec),
            scan_response_service: self.config.gatt_server.service_uuid,
        };
        if let Err(e) = self.radio().start_advertising(&params) {
            error!("Failed to start advertising: {}", e);
            return Err(e);
        }
        state.advertising = true;
        info!("Advertising requested as {:?}, manufacturer id {:#06x}.", name, manufacturer_id);
        Ok(())
    }

    /// Stops advertising and tears down the GATT server.
    pub fn stop_advertiser(&self) {
        let mut state = self.lock_peripheral();
        if !state.initialized {
            debug!("Advertiser was never started.");
            return;
        }
        if state.server_open {
            self.radio().clear_services();
        }
        self.radio().stop_advertising();
        state.advertising = false;

        if state.server_open {
            self.radio().close_gatt_server();
            state.server_open = false;
        }
        if state.peer.take().is_some() {
            self.emit(BleEvent::PeripheralConnectionStateChanged {
                address: None,
                connected: false,
            });
        }
        info!("Advertising stopped.");
    }

    pub fn is_advertising(&self) -> bool {
        self.lock_peripheral().advertising
    }

    /// Central currently connected to the hosted service.
    pub fn peripheral_peer(&self) -> Option<DeviceAddress> {
        self.lock_peripheral().peer.clone()
    }

    /// Publishes `data` on the notify characteristic to the connected peer.
    pub fn pble_write_characteristic(&self, data: &[u8]) -> bool {
        let mut state = self.lock_peripheral();
        debug!("Peripheral notify write: {}", to_hex_string(Some(data)));
        let Some(peer) = state.peer.clone() else {
            warn!("No central connected to notify.");
            return false;
        };
        if !state.server_open {
            warn!("GATT server is not open.");
            return false;
        }

        let server = &self.config.gatt_server;
        state.values.insert(server.notify_char_uuid, data.to_vec());
        let id = CharacteristicId::new(server.service_uuid, server.notify_char_uuid);
        let sent = self.radio().notify_characteristic_changed(&peer, &id, data, false);
        debug!("Notification to {} queued: {}", peer, sent);
        sent
    }

    fn install_gatt_server(&self, state: &mut PeripheralState) {
        let radio = self.radio();
        if state.server_open {
            radio.clear_services();
            radio.close_gatt_server();
            state.server_open = false;
        }
        if let Err(e) = radio.open_gatt_server() {
            error!("Failed to open GATT server: {}", e);
            return;
        }
        state.server_open = true;

        let service = state
            .service
            .get_or_insert_with(|| build_server_service(&self.config.gatt_server));
        if !radio.add_service(service) {
            error!("Failed to add service {}.", service.uuid);
        }
        info!("GATT server installed with service {}.", service.uuid);
    }

    pub(crate) fn handle_peripheral_event(&self, event: RadioEvent) {
        let mut state = self.lock_peripheral();
        match event {
            RadioEvent::AdvertiseStarted => {
                if !state.advertising {
                    debug!("Ignoring advertise confirmation after the advertiser was stopped.");
                    return;
                }
                info!("Advertising started.");
                self.install_gatt_server(&mut state);
            }
            RadioEvent::AdvertiseFailed { error_code } => {
                error!("Advertising failed, error code: {}", error_code);
                state.advertising = false;
                self.emit(BleEvent::AdvertiseFailed { error_code });
            }
            RadioEvent::ServerConnectionStateChanged {
                device,
                status,
                connected,
            } => {
                debug!("Server connection {} status {} connected {}", device, status, connected);
                if connected {
                    if let Some(stale) = state.peer.take() {
                        warn!(
                            "Last connection {} was not disconnected normally before {} arrived.",
                            stale, device
                        );
                        self.emit(BleEvent::PeripheralConnectionStateChanged {
                            address: None,
                            connected: false,
                        });
                    }
                    info!("Central {} connected.", device);
                    state.peer = Some(device.clone());
                    self.emit(BleEvent::PeripheralConnectionStateChanged {
                        address: Some(device),
                        connected: true,
                    });
                } else if state.peer.as_ref() == Some(&device) {
                    info!("Central {} disconnected.", device);
                    state.peer = None;
                    self.emit(BleEvent::PeripheralConnectionStateChanged {
                        address: None,
                        connected: false,
                    });
                } else {
                    debug!("Ignoring disconnect of {}, which is not the connected central.", device);
                }
            }
            RadioEvent::ServiceAdded { service, status } => {
                info!("Service {} added, status {}", service, status);
            }
            RadioEvent::CharacteristicReadRequest {
                device,
                request_id,
                offset,
                characteristic,
            } => {
                let value = state.values.get(&characteristic).cloned().unwrap_or_default();
                debug!(
                    "Read request {} from {} on {}: {}",
                    request_id,
                    device,
                    characteristic,
                    to_hex_string(Some(&value))
                );
                self.radio()
                    .send_response(&device, request_id, GATT_SUCCESS, offset, Some(&value));
            }
            RadioEvent::CharacteristicWriteRequest {
                device,
                request_id,
                characteristic,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                debug!(
                    "Write request {} from {} on {} (prepared {}, response {}): {}",
                    request_id,
                    device,
                    characteristic,
                    prepared_write,
                    response_needed,
                    to_hex_string(Some(&value))
                );
                self.radio()
                    .send_response(&device, request_id, GATT_SUCCESS, offset, Some(&value));
                self.emit(BleEvent::PeripheralCharacteristicWritten {
                    characteristic: characteristic.to_string(),
                    data: value,
                    response_needed,
                });
            }
            RadioEvent::DescriptorReadRequest {
                device,
                request_id,
                offset,
                descriptor,
            } => {
                debug!("Descriptor read request {} from {} on {}", request_id, device, descriptor);
                self.radio().send_response(&device, request_id, GATT_SUCCESS, offset, None);
            }
            RadioEvent::DescriptorWriteRequest {
                device,
                request_id,
                descriptor,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                debug!(
                    "Descriptor write request {} from {} on {} (prepared {}, response {}): {}",
                    request_id,
                    device,
                    descriptor,
                    prepared_write,
                    response_needed,
                    to_hex_string(Some(&value))
                );
                self.radio()
                    .send_response(&device, request_id, GATT_SUCCESS, offset, Some(&value));
            }
            RadioEvent::NotificationSent { device, status } => {
                debug!("Notification sent to {}, status {}", device, status);
                self.emit(BleEvent::PeripheralNotificationSent {
                    characteristic: self.config.gatt_server.notify_char_uuid.to_string(),
                    status,
                });
            }
            RadioEvent::MtuChanged { device, mtu } => {
                info!("MTU for {} changed to {}", device, mtu);
            }
            RadioEvent::ExecuteWrite {
                device,
                request_id,
                execute,
            } => {
                info!("Execute write {} from {}: {}", request_id, device, execute);
            }
            other => {
                warn!("Unexpected event for the peripheral role: {:?}", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_service_layout() {
        let service = build_server_service(&GattServerConfig::default());
        assert_eq!(service.uuid, GattServerConfig::default().service_uuid);
        assert_eq!(service.characteristics.len(), 3);

        let config = GattServerConfig::default();
        let read = service.characteristic(config.read_char_uuid).unwrap();
        assert_eq!(read.properties, CharacteristicProperties::READ);
        assert!(read.descriptors.is_empty());

        let notify = service.characteristic(config.notify_char_uuid).unwrap();
        assert!(notify.properties.contains(CharacteristicProperties::NOTIFY));
        assert!(notify.descriptor(UUID_CLIENT_CONFIG_DESCRIPTOR).is_some());

        let write = service.characteristic(config.write_char_uuid).unwrap();
        assert!(write.properties.contains(CharacteristicProperties::WRITE));
        assert!(write.properties.contains(CharacteristicProperties::READ));
        assert!(write.permissions.contains(AttributePermissions::WRITE));
    }
}
