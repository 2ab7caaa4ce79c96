//! Bluetooth functionality for the session bridge
//! This module handles all bluetooth operations: scanning, the central-role
//! GATT client session and the peripheral-role advertiser with its GATT server.

mod bluest_radio;
mod connection;
pub mod constants;
mod error;
mod events;
mod manager;
mod notification;
mod peripheral;
mod radio;
mod scanner;
pub mod types;

// Re-export types that should be publicly accessible
pub use bluest_radio::BluestRadio;
pub use connection::CentralSession;
pub use error::{BleError, Capability};
pub use events::{BleEvent, EventSink};
pub use manager::SessionManager;
pub use notification::NotificationHandler;
pub use peripheral::build_server_service;
pub use radio::{RadioEvent, RadioEventReceiver, RadioEventSender, RadioStack};
pub use scanner::{
    build_scan_settings, encode_manufacturer_data, extract_mac_address, AppVisibility,
    VisibilityFlag,
};
pub use types::*;
