//! Bluetooth session manager
//! This module provides the main interface for bluetooth operations: one
//! central-role connection and one peripheral-role peer at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ble_config::BleConfig;
use crate::core::bluetooth::connection::CentralSession;
use crate::core::bluetooth::constants::{
    DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE, GATT_SUCCESS,
    UUID_CLIENT_CONFIG_DESCRIPTOR,
};
use crate::core::bluetooth::error::{BleError, Capability};
use crate::core::bluetooth::events::{BleEvent, EventSink};
use crate::core::bluetooth::peripheral::PeripheralState;
use crate::core::bluetooth::radio::{RadioEvent, RadioEventReceiver, RadioStack};
use crate::core::bluetooth::scanner::{
    build_scan_settings, encode_manufacturer_data, AppVisibility, VisibilityFlag,
};
use crate::core::bluetooth::types::{
    CharacteristicId, CharacteristicProperties, ConnectionState, DescriptorId, DeviceAddress,
    GattCharacteristic, GattHandle,
};
use crate::utils::to_hex_string;

#[derive(Debug, Default)]
struct CentralState {
    initialized: bool,
    session: Option<CentralSession>,
}

/// Owns the central and peripheral BLE sessions.
///
/// Commands are issued from the caller's context; radio completions are fed
/// through [`SessionManager::handle_radio_event`], usually by the task from
/// [`SessionManager::spawn_event_loop`]. Each role's state lives behind its
/// own lock, and events are emitted while that lock is held so they leave in
/// the order the radio produced them.
pub struct SessionManager {
    radio: Arc<dyn RadioStack>,
    sink: Arc<dyn EventSink>,
    visibility: Arc<dyn AppVisibility>,
    pub(crate) config: BleConfig,
    adapter_ready: Mutex<bool>,
    central: Mutex<CentralState>,
    pub(crate) peripheral: Mutex<PeripheralState>,
}

impl SessionManager {
    /// Creates a manager in the foreground with no sessions.
    pub fn new(radio: Arc<dyn RadioStack>, sink: Arc<dyn EventSink>, config: BleConfig) -> Self {
        Self {
            radio,
            sink,
            visibility: Arc::new(VisibilityFlag::new()),
            config,
            adapter_ready: Mutex::new(false),
            central: Mutex::new(CentralState::default()),
            peripheral: Mutex::new(PeripheralState::default()),
        }
    }

    /// Replaces the foreground/background source used to pick scan settings.
    pub fn with_visibility(mut self, visibility: Arc<dyn AppVisibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub(crate) fn radio(&self) -> &dyn RadioStack {
        self.radio.as_ref()
    }

    pub(crate) fn emit(&self, event: BleEvent) {
        let name = event.name();
        if let Err(e) = self.sink.emit(event) {
            error!("Failed to emit {} event: {}", name, e);
        }
    }

    fn lock_central(&self) -> MutexGuard<'_, CentralState> {
        self.central.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquires the adapter once for both roles.
    ///
    /// Taken inside either role's lock and held across the open, so the two
    /// roles never acquire the adapter concurrently.
    pub(crate) fn ensure_adapter(&self) -> Result<(), BleError> {
        let mut ready = self.adapter_ready.lock().unwrap_or_else(|e| e.into_inner());
        if *ready {
            return Ok(());
        }
        if !self.radio.is_le_supported() {
            error!("Device does not support bluetooth low energy.");
            return Err(BleError::UnsupportedCapability(Capability::LowEnergy));
        }
        if let Err(e) = self.radio.open_adapter() {
            error!("Unable to obtain a Bluetooth adapter: {}", e);
            return Err(e);
        }
        *ready = true;
        info!("Bluetooth adapter initialized.");
        Ok(())
    }

    /// Initializes the central role. Idempotent once it has succeeded.
    pub fn init_center(&self) -> Result<(), BleError> {
        let mut central = self.lock_central();
        if central.initialized {
            return Ok(());
        }
        self.ensure_adapter()?;
        if let Err(e) = self.radio.open_scanner() {
            error!("Unable to obtain the LE scanner: {}", e);
            return Err(e);
        }
        central.initialized = true;
        info!("Bluetooth central role initialized.");
        Ok(())
    }

    pub fn is_center_initialized(&self) -> bool {
        self.lock_central().initialized
    }

    /// State of the central-role connection.
    pub fn central_state(&self) -> ConnectionState {
        self.lock_central()
            .session
            .as_ref()
            .map(CentralSession::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Peer of the open central-role session, if any.
    pub fn connected_address(&self) -> Option<DeviceAddress> {
        self.lock_central().session.as_ref().map(|s| s.address().clone())
    }

    pub fn start_scan(&self) -> bool {
        if !self.lock_central().initialized {
            warn!("Scan requested before the central role was initialized.");
            return false;
        }
        let background = self.visibility.is_background();
        debug!("Currently in the background: {}", background);
        let settings = build_scan_settings(background, &self.config.scan);
        match self.radio.start_scan(&settings) {
            Ok(()) => {
                info!("Scan started in {:?} mode.", settings.mode);
                true
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                false
            }
        }
    }

    pub fn stop_scan(&self) -> bool {
        if !self.lock_central().initialized {
            return false;
        }
        self.radio.stop_scan();
        true
    }

    /// Starts a direct connection to `address`.
    ///
    /// Rejected while any session is held, including one to the same peer;
    /// that session has to be closed first.
    pub fn connect(&self, address: &DeviceAddress) -> bool {
        let mut central = self.lock_central();
        if !central.initialized {
            warn!("Connect to {} requested before the central role was initialized.", address);
            return false;
        }
        if let Some(session) = &central.session {
            if session.is_peer(address) {
                debug!("Must not connect to {} again while its handle is open.", address);
            } else {
                warn!(
                    "Rejecting connect to {}: session with {} is still open.",
                    address,
                    session.address()
                );
            }
            return false;
        }

        match self.radio.connect_gatt(address) {
            Some(handle) => {
                central.session = Some(CentralSession::connecting(address.clone(), handle));
                info!("Trying to create a new connection to {}.", address);
                true
            }
            None => {
                warn!("Trying to create a new connection to {} failed.", address);
                false
            }
        }
    }

    pub fn disconnect(&self, address: &DeviceAddress) -> bool {
        let mut central = self.lock_central();
        match central.session.as_mut() {
            Some(session) if session.is_peer(address) => {
                self.radio.disconnect(session.handle());
                session.begin_disconnect();
                info!("Disconnecting from {}.", address);
                true
            }
            _ => {
                debug!("No session with {} to disconnect.", address);
                false
            }
        }
    }

    /// Releases the session handle so a new `connect` becomes possible.
    pub fn close(&self, address: &DeviceAddress) -> bool {
        let mut central = self.lock_central();
        Self::close_locked(self.radio.as_ref(), &mut central, address)
    }

    fn close_locked(radio: &dyn RadioStack, central: &mut CentralState, address: &DeviceAddress) -> bool {
        match central.session.take_if(|s| s.is_peer(address)) {
            Some(session) => {
                radio.close(session.handle());
                info!("Closed session with {}.", address);
                true
            }
            None => {
                debug!("No session with {} to close.", address);
                false
            }
        }
    }

    /// Runs `op` with the handle of the established session to `address`.
    fn with_ready_session(&self, address: &DeviceAddress, op: &str, f: impl FnOnce(GattHandle) -> bool) -> bool {
        let central = self.lock_central();
        match central.session.as_ref() {
            Some(session) if session.is_peer(address) && session.is_ready() => f(session.handle()),
            Some(session) if session.is_peer(address) => {
                warn!("{} on {} rejected in state {:?}.", op, address, session.state());
                false
            }
            _ => {
                debug!("{} on {} rejected: no matching session.", op, address);
                false
            }
        }
    }

    fn resolve_characteristic(&self, handle: GattHandle, id: &CharacteristicId) -> Option<GattCharacteristic> {
        let Some(service) = self.radio.service(handle, id.service) else {
            error!("Service {} not found.", id.service);
            return None;
        };
        let characteristic = service.characteristic(id.characteristic).cloned();
        if characteristic.is_none() {
            error!("Characteristic {} not found in service {}.", id.characteristic, id.service);
        }
        characteristic
    }

    pub fn discover_services(&self, address: &DeviceAddress) -> bool {
        self.with_ready_session(address, "Service discovery", |handle| {
            self.radio.discover_services(handle)
        })
    }

    pub fn read_characteristic(&self, address: &DeviceAddress, service: Uuid, characteristic: Uuid) -> bool {
        let id = CharacteristicId::new(service, characteristic);
        self.with_ready_session(address, "Characteristic read", |handle| {
            if self.resolve_characteristic(handle, &id).is_none() {
                return false;
            }
            let result = self.radio.read_characteristic(handle, &id);
            debug!("{} -- read result: {}", address, result);
            result
        })
    }

    pub fn write_characteristic(&self, address: &DeviceAddress, value: &[u8], service: Uuid, characteristic: Uuid) -> bool {
        let id = CharacteristicId::new(service, characteristic);
        self.with_ready_session(address, "Characteristic write", |handle| {
            if self.resolve_characteristic(handle, &id).is_none() {
                return false;
            }
            let result = self.radio.write_characteristic(handle, &id, value);
            debug!("{} -- write {} result: {}", address, to_hex_string(Some(value)), result);
            result
        })
    }

    pub fn read_descriptor(&self, address: &DeviceAddress, service: Uuid, characteristic: Uuid, descriptor: Uuid) -> bool {
        let id = DescriptorId::new(service, characteristic, descriptor);
        self.with_ready_session(address, "Descriptor read", |handle| {
            match self.resolve_characteristic(handle, &id.characteristic) {
                Some(c) if c.descriptor(descriptor).is_some() => self.radio.read_descriptor(handle, &id),
                Some(_) => {
                    error!("Descriptor {} not found on {}.", descriptor, characteristic);
                    false
                }
                None => false,
            }
        })
    }

    pub fn write_descriptor(
        &self,
        address: &DeviceAddress,
        data: &[u8],
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> bool {
        let id = DescriptorId::new(service, characteristic, descriptor);
        self.with_ready_session(address, "Descriptor write", |handle| {
            match self.resolve_characteristic(handle, &id.characteristic) {
                Some(c) if c.descriptor(descriptor).is_some() => self.radio.write_descriptor(handle, &id, data),
                Some(_) => {
                    error!("Descriptor {} not found on {}.", descriptor, characteristic);
                    false
                }
                None => false,
            }
        })
    }

    /// Enables or disables value pushes for a characteristic.
    ///
    /// Registers locally, then writes the client configuration descriptor:
    /// notify wins over indicate when both are declared. Indications need a
    /// peer acknowledgment before the next push; the radio stack enforces that.
    pub fn set_characteristic_notification(
        &self,
        address: &DeviceAddress,
        enabled: bool,
        service: Uuid,
        characteristic: Uuid,
    ) -> bool {
        let id = CharacteristicId::new(service, characteristic);
        self.with_ready_session(address, "Notification setup", |handle| {
            let Some(resolved) = self.resolve_characteristic(handle, &id) else {
                return false;
            };
            let value = if resolved.properties.contains(CharacteristicProperties::NOTIFY) {
                if enabled { ENABLE_NOTIFICATION_VALUE } else { DISABLE_NOTIFICATION_VALUE }
            } else if resolved.properties.contains(CharacteristicProperties::INDICATE) {
                if enabled { ENABLE_INDICATION_VALUE } else { DISABLE_NOTIFICATION_VALUE }
            } else {
                warn!("Characteristic {} supports neither notify nor indicate.", characteristic);
                return false;
            };

            if !self.radio.set_characteristic_notification(handle, &id, enabled) {
                warn!("Radio refused notification registration for {}.", characteristic);
                return false;
            }

            if resolved.descriptor(UUID_CLIENT_CONFIG_DESCRIPTOR).is_none() {
                warn!("Characteristic {} has no client configuration descriptor.", characteristic);
                return true;
            }
            let cccd = DescriptorId::new(service, characteristic, UUID_CLIENT_CONFIG_DESCRIPTOR);
            let written = self.radio.write_descriptor(handle, &cccd, &value);
            debug!("Notification on {} set to {}: {}", characteristic, enabled, written);
            written
        })
    }

    pub fn read_rssi(&self, address: &DeviceAddress) -> bool {
        self.with_ready_session(address, "RSSI read", |handle| {
            let result = self.radio.read_remote_rssi(handle);
            debug!("{} -- rssi read result: {}", address, result);
            result
        })
    }

    /// Drops the radio's cached GATT table for the held session.
    ///
    /// Returns `Ok(false)` when `address` is not the held peer.
    pub fn refresh_device_cache(&self, address: &DeviceAddress) -> Result<bool, BleError> {
        let central = self.lock_central();
        let Some(session) = central.session.as_ref().filter(|s| s.is_peer(address)) else {
            return Ok(false);
        };
        if !self.radio.supports_cache_refresh() {
            return Err(BleError::UnsupportedCapability(Capability::CacheRefresh));
        }
        self.radio.refresh_cache(session.handle())
    }

    /// Feeds radio completions to [`SessionManager::handle_radio_event`] until the channel closes.
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: RadioEventReceiver) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            info!("Radio event loop started.");
            while let Some(event) = events.recv().await {
                manager.handle_radio_event(event);
            }
            info!("Radio event channel closed.");
        })
    }

    /// Applies one radio completion and forwards the normalized event.
    pub fn handle_radio_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::ScanResult {
                address,
                name,
                rssi,
                manufacturer_data,
            } => {
                debug!("Scan result: {} {:?} rssi {}", address, name, rssi);
                self.emit(BleEvent::PeripheralDiscovered {
                    address,
                    name,
                    rssi,
                    manufacturer_data: encode_manufacturer_data(&manufacturer_data),
                });
            }
            RadioEvent::ScanFailed { error_code } => {
                error!("Scan failed, error code: {}", error_code);
                self.emit(BleEvent::ScanFailed { error_code });
            }
            RadioEvent::ConnectionStateChanged {
                address,
                handle,
                status,
                connected,
            } => self.on_connection_state_changed(address, handle, status, connected),
            RadioEvent::ServicesDiscovered { address, status } => {
                let event = BleEvent::ServicesDiscovered {
                    address: address.clone(),
                    success: status == GATT_SUCCESS,
                };
                self.emit_for_peer(&address, event);
            }
            RadioEvent::CharacteristicRead {
                address,
                characteristic,
                status,
                value,
            } => {
                let event = BleEvent::CharacteristicRead {
                    characteristic,
                    data: (status == GATT_SUCCESS).then_some(value),
                    is_notification: false,
                };
                self.emit_for_peer(&address, event);
            }
            RadioEvent::CharacteristicWrite {
                address,
                characteristic,
                status,
            } => {
                let event = BleEvent::CharacteristicWriteResult {
                    characteristic,
                    success: status == GATT_SUCCESS,
                };
                self.emit_for_peer(&address, event);
            }
            RadioEvent::CharacteristicChanged {
                address,
                characteristic,
                value,
            } => {
                let event = BleEvent::CharacteristicRead {
                    characteristic,
                    data: Some(value),
                    is_notification: true,
                };
                self.emit_for_peer(&address, event);
            }
            RadioEvent::DescriptorRead {
                address,
                descriptor,
                status,
                value,
            } => {
                info!(
                    "Descriptor read on {}: uuid {}, status {}, value {}",
                    address,
                    descriptor.descriptor,
                    status,
                    to_hex_string(Some(&value))
                );
            }
            RadioEvent::DescriptorWrite {
                address,
                descriptor,
                status,
            } => {
                debug!("Descriptor write on {}: uuid {}, status {}", address, descriptor.descriptor, status);
                self.emit_for_peer(&address, BleEvent::DescriptorWriteResult { descriptor });
            }
            RadioEvent::RemoteRssi { address, rssi, status } => {
                if status == GATT_SUCCESS {
                    let event = BleEvent::RssiRead {
                        address: address.clone(),
                        rssi,
                    };
                    self.emit_for_peer(&address, event);
                } else {
                    warn!("RSSI read on {} failed with status {}", address, status);
                }
            }
            peripheral_event => self.handle_peripheral_event(peripheral_event),
        }
    }

    /// Forwards `event` only while `address` is the held session's peer.
    fn emit_for_peer(&self, address: &DeviceAddress, event: BleEvent) {
        let central = self.lock_central();
        if central.session.as_ref().is_some_and(|s| s.is_peer(address)) {
            self.emit(event);
        } else {
            debug!("Dropping {} event from stale peer {}.", event.name(), address);
        }
    }

    fn on_connection_state_changed(&self, address: DeviceAddress, handle: GattHandle, status: i32, connected: bool) {
        let mut central = self.lock_central();
        let Some(session) = central.session.as_mut().filter(|s| s.is_peer(&address)) else {
            warn!(
                "Ignoring connection state change for {} (connected: {}) without a matching session.",
                address, connected
            );
            return;
        };
        if session.handle() != handle {
            debug!(
                "Ignoring connection state change for {} on closed handle {:?} (open: {:?}).",
                address,
                handle,
                session.handle()
            );
            return;
        }

        if connected {
            session.on_connected();
            info!("Connected to GATT server {}.", address);
            self.emit(BleEvent::ConnectionStateChanged {
                address,
                connected: true,
            });
        } else {
            info!("Disconnected from GATT server {} (status {}).", address, status);
            self.emit(BleEvent::ConnectionStateChanged {
                address: address.clone(),
                connected: false,
            });
            // the link is gone; release the handle exactly once
            Self::close_locked(self.radio.as_ref(), &mut central, &address);
        }
    }
}
