//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a remote radio peer (MAC-like on most platforms).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Handle of a GATT client connection, issued by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattHandle(pub u64);

/// Identity of a characteristic inside a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicId {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicId {
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self { service, characteristic }
    }
}

/// Identity of a descriptor inside a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptorId {
    pub characteristic: CharacteristicId,
    pub descriptor: Uuid,
}

impl DescriptorId {
    pub fn new(service: Uuid, characteristic: Uuid, descriptor: Uuid) -> Self {
        Self {
            characteristic: CharacteristicId::new(service, characteristic),
            descriptor,
        }
    }
}

/// Characteristic property bits as carried in the characteristic declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_NO_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Attribute permission bits for locally hosted attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributePermissions(u16);

impl AttributePermissions {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x10);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AttributePermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDescriptor {
    pub uuid: Uuid,
    pub permissions: AttributePermissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties, permissions: AttributePermissions) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: GattDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn descriptor(&self, uuid: Uuid) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

/// A primary service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// State of the central-role connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Foreground scanning
    LowLatency,
    /// Background scanning
    LowPower,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    pub filters: Vec<ScanFilter>,
}

/// Advertising interval class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseMode {
    /// ~100ms
    LowLatency,
    /// ~250ms
    Balanced,
    /// ~1s
    LowPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

/// Everything the radio needs to start advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseParams {
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    /// 0 disables the timeout
    pub timeout_ms: u32,
    pub include_device_name: bool,
    pub include_tx_power: bool,
    pub manufacturer_id: u16,
    pub manufacturer_data: Option<Vec<u8>>,
    /// Service advertised in the scan response
    pub scan_response_service: Uuid,
}
