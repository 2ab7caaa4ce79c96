//! Constants used throughout the application
//! This module contains all the constant values used by the session manager,
//! such as UUIDs, descriptor values and default timings.

use uuid::Uuid;

/// Bluetooth SIG base UUID (0000xxxx-0000-1000-8000-00805f9b34fb)
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expands a 16-bit assigned number onto the Bluetooth base UUID.
pub const fn uuid16_to_128(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Client Characteristic Configuration Descriptor
pub const UUID_CLIENT_CONFIG_DESCRIPTOR: Uuid = uuid16_to_128(0x2902);

/// Default GATT server service exposed in the peripheral role
pub const UUID_SERVER_SERVICE: Uuid = uuid16_to_128(0xfd00);
/// Default write characteristic (write | read | notify)
pub const UUID_SERVER_WRITE_CHAR: Uuid = uuid16_to_128(0xfd01);
/// Default read-only characteristic
pub const UUID_SERVER_READ_CHAR: Uuid = uuid16_to_128(0xfd02);
/// Default notify characteristic, carries the CCCD
pub const UUID_SERVER_NOTIFY_CHAR: Uuid = uuid16_to_128(0xfd03);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
/// CCCD value enabling indications
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
/// CCCD value disabling both notifications and indications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// ATT success status
pub const GATT_SUCCESS: i32 = 0;
/// ATT generic failure status reported by backends
pub const GATT_FAILURE: i32 = 0x101;

/// Scan failure code reported when the platform scan could not start
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// Scan duration used by the command line driver, in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;
