//! BLE session bridge library
//! Single-session BLE central/peripheral manager that turns radio callbacks
//! into events for a native host.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::core::bluetooth::{BleError, BleEvent, EventSink, RadioStack, SessionManager};
