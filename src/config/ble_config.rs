use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_SERVER_NOTIFY_CHAR, UUID_SERVER_READ_CHAR, UUID_SERVER_SERVICE, UUID_SERVER_WRITE_CHAR,
};
use crate::core::bluetooth::types::{AdvertiseMode, TxPowerLevel};

/// Scan filter settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Service filter applied to every scan
    pub filter_service_uuid: Option<Uuid>,
    /// Service filter applied to background scans when no explicit filter is set.
    /// Some platforms deliver no results to unfiltered background scans.
    pub background_service_uuid: Option<Uuid>,
}

/// Advertising settings for the peripheral role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseConfig {
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    /// 0 advertises until stopped
    pub timeout_ms: u32,
    pub include_device_name: bool,
    pub include_tx_power: bool,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        AdvertiseConfig {
            mode: AdvertiseMode::LowPower,
            tx_power: TxPowerLevel::High,
            connectable: true,
            timeout_ms: 0,
            include_device_name: true,
            include_tx_power: true,
        }
    }
}

/// Layout of the GATT service hosted while advertising
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattServerConfig {
    pub service_uuid: Uuid,
    pub write_char_uuid: Uuid,
    pub read_char_uuid: Uuid,
    pub notify_char_uuid: Uuid,
}

impl Default for GattServerConfig {
    fn default() -> Self {
        GattServerConfig {
            service_uuid: UUID_SERVER_SERVICE,
            write_char_uuid: UUID_SERVER_WRITE_CHAR,
            read_char_uuid: UUID_SERVER_READ_CHAR,
            notify_char_uuid: UUID_SERVER_NOTIFY_CHAR,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    pub scan: ScanConfig,
    pub advertise: AdvertiseConfig,
    pub gatt_server: GattServerConfig,
}
