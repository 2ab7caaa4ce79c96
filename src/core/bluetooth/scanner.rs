//! Scanning: scan-mode selection, advertisement decoding and the bluest scan task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use regex::Regex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ble_config::ScanConfig;
use crate::core::bluetooth::constants::SCAN_FAILED_INTERNAL_ERROR;
use crate::core::bluetooth::radio::{RadioEvent, RadioEventSender};
use crate::core::bluetooth::types::{DeviceAddress, ScanFilter, ScanMode, ScanSettings};

/// Tells the scanner whether the host application is in the background.
pub trait AppVisibility: Send + Sync {
    fn is_background(&self) -> bool;
}

/// Visibility driven by the host through [`VisibilityFlag::set_background`].
#[derive(Debug, Default)]
pub struct VisibilityFlag {
    background: AtomicBool,
}

impl VisibilityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }
}

impl AppVisibility for VisibilityFlag {
    fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }
}

/// Derives scan settings for the current foreground/background status.
///
/// Background scans run in low-power mode and, when no explicit filter is
/// configured, filter on the background service UUID because some platforms
/// deliver nothing to unfiltered background scans.
pub fn build_scan_settings(background: bool, config: &ScanConfig) -> ScanSettings {
    let mut filters = Vec::new();
    if let Some(service_uuid) = config.filter_service_uuid {
        filters.push(ScanFilter { service_uuid });
    }

    if background {
        if filters.is_empty() {
            if let Some(service_uuid) = config.background_service_uuid {
                filters.push(ScanFilter { service_uuid });
            }
        }
        ScanSettings {
            mode: ScanMode::LowPower,
            filters,
        }
    } else {
        ScanSettings {
            mode: ScanMode::LowLatency,
            filters,
        }
    }
}

/// Flattens manufacturer entries into `[id_lo, id_hi, payload...]`.
///
/// Only the last entry is kept when an advertisement carries several.
pub fn encode_manufacturer_data(entries: &[(u16, Vec<u8>)]) -> Option<Vec<u8>> {
    entries.last().map(|(company_id, payload)| {
        let mut data = Vec::with_capacity(2 + payload.len());
        data.extend_from_slice(&company_id.to_le_bytes());
        data.extend_from_slice(payload);
        data
    })
}

/// Pulls a MAC address out of a platform device identifier.
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    static MAC_RE: OnceLock<Regex> = OnceLock::new();
    let re = MAC_RE.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC regex")
    });
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

/// Address used for a bluest device: its MAC when the id carries one,
/// otherwise the raw platform id.
pub fn device_address(device: &Device) -> DeviceAddress {
    let id = device.id().to_string();
    DeviceAddress::new(extract_mac_address(&id).unwrap_or(id))
}

/// Runs bluest scans in a background task and records every device seen.
pub struct BluestScanner {
    adapter: Adapter,
    runtime: Handle,
    devices: Arc<Mutex<HashMap<DeviceAddress, Device>>>,
    events: RadioEventSender,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl BluestScanner {
    pub fn new(
        adapter: Adapter,
        runtime: Handle,
        devices: Arc<Mutex<HashMap<DeviceAddress, Device>>>,
        events: RadioEventSender,
    ) -> Self {
        Self {
            adapter,
            runtime,
            devices,
            events,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn start_scan(&mut self, settings: &ScanSettings) {
        if self.scan_task_handle.is_some() {
            self.stop_scan();
        }

        // bluest has no scan-mode knob; only the filters carry over
        debug!("Scan mode {:?} requested", settings.mode);
        let services: Vec<Uuid> = settings.filters.iter().map(|f| f.service_uuid).collect();

        self.cancel_token = CancellationToken::new();
        let handle = self.runtime.spawn(Self::internal_scan_task(
            self.adapter.clone(),
            self.devices.clone(),
            self.events.clone(),
            self.cancel_token.clone(),
            services,
        ));
        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
    }

    async fn internal_scan_task(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<DeviceAddress, Device>>>,
        events: RadioEventSender,
        cancel_token: CancellationToken,
        services: Vec<Uuid>,
    ) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&services).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                let _ = events.send(RadioEvent::ScanFailed {
                    error_code: SCAN_FAILED_INTERNAL_ERROR,
                });
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let device = discovered_device.device;
                            let address = device_address(&device);
                            let adv_data = discovered_device.adv_data;
                            debug!("Found device - Address: {}, RSSI: {:?}", address, discovered_device.rssi);

                            let name = adv_data.local_name.or_else(|| device.name().ok());
                            let manufacturer_data = adv_data
                                .manufacturer_data
                                .map(|m| vec![(m.company_id, m.data.to_vec())])
                                .unwrap_or_default();

                            {
                                let mut devices = devices.lock().unwrap_or_else(|e| e.into_inner());
                                devices.insert(address.clone(), device);
                            }

                            let event = RadioEvent::ScanResult {
                                address,
                                name,
                                rssi: discovered_device.rssi.unwrap_or(0),
                                manufacturer_data,
                            };
                            if events.send(event).is_err() {
                                info!("Radio event channel closed, ending scan.");
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        info!("Scan task finished.");
    }

    pub fn stop_scan(&mut self) {
        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();
        if self.scan_task_handle.take().is_none() {
            info!("No active scan task handle found.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn manufacturer_key_is_little_endian() {
        let data = encode_manufacturer_data(&[(0x1213, vec![0x01, 0x02, 0x03])]);
        assert_eq!(data, Some(vec![0x13, 0x12, 0x01, 0x02, 0x03]));
    }

    #[test]
    fn last_manufacturer_entry_wins() {
        let data = encode_manufacturer_data(&[(0x0001, vec![0xaa]), (0xfff0, vec![])]);
        assert_eq!(data, Some(vec![0xf0, 0xff]));
        assert_eq!(encode_manufacturer_data(&[]), None);
    }

    #[test]
    fn foreground_scans_use_low_latency_without_background_filter() {
        let config = ScanConfig {
            filter_service_uuid: None,
            background_service_uuid: Some(uuid(7)),
        };
        let settings = build_scan_settings(false, &config);
        assert_eq!(settings.mode, ScanMode::LowLatency);
        assert!(settings.filters.is_empty());
    }

    #[test]
    fn background_scans_add_service_filter() {
        let config = ScanConfig {
            filter_service_uuid: None,
            background_service_uuid: Some(uuid(7)),
        };
        let settings = build_scan_settings(true, &config);
        assert_eq!(settings.mode, ScanMode::LowPower);
        assert_eq!(settings.filters, vec![ScanFilter { service_uuid: uuid(7) }]);
    }

    #[test]
    fn explicit_filter_replaces_background_filter() {
        let config = ScanConfig {
            filter_service_uuid: Some(uuid(1)),
            background_service_uuid: Some(uuid(7)),
        };
        let settings = build_scan_settings(true, &config);
        assert_eq!(settings.filters, vec![ScanFilter { service_uuid: uuid(1) }]);
    }

    #[test]
    fn visibility_flag_toggles() {
        let flag = VisibilityFlag::new();
        assert!(!flag.is_background());
        flag.set_background(true);
        assert!(flag.is_background());
    }

    #[test]
    fn mac_address_is_extracted_and_normalized() {
        assert_eq!(
            extract_mac_address("BluetoothLE#BluetoothLE00:11:22:33:44:55-aa-bb-cc-dd-ee-ff"),
            Some("AA:BB:CC:DD:EE:FF".to_string())
        );
        assert_eq!(extract_mac_address("hci0/dev_a1"), None);
    }
}
