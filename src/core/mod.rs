//! Core functionality for the session bridge
//! This module contains the BLE session manager and its radio backends.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BleEvent, BluestRadio, SessionManager};
