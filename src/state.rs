//! Application state management
//! This module wires the configuration, radio backend, session manager and
//! event pump together.

use std::sync::Arc;

use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::bluetooth::{
    BluestRadio, EventSink, RadioEventReceiver, RadioStack, SessionManager, VisibilityFlag,
};

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    /// The session manager instance
    pub session_manager: Arc<SessionManager>,
    visibility: Arc<VisibilityFlag>,
    event_pump: JoinHandle<()>,
}

impl AppState {
    /// Creates the state on top of the host adapter.
    pub async fn new(config: AppConfig, sink: Arc<dyn EventSink>) -> Self {
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        info!("Initializing Bluetooth radio...");
        let radio = BluestRadio::new(radio_tx).await;
        Self::with_radio(config, Arc::new(radio), radio_rx, sink)
    }

    /// Creates the state on top of any radio stack. Must run inside a tokio runtime.
    pub fn with_radio(
        config: AppConfig,
        radio: Arc<dyn RadioStack>,
        radio_events: RadioEventReceiver,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let visibility = Arc::new(VisibilityFlag::new());
        let manager = SessionManager::new(radio, sink, config.ble.clone()).with_visibility(visibility.clone());
        let session_manager = Arc::new(manager);
        let event_pump = session_manager.spawn_event_loop(radio_events);
        info!("Session manager ready.");

        Self {
            config,
            session_manager,
            visibility,
            event_pump,
        }
    }

    /// Gets a reference to the session manager
    pub fn get_session_manager_arc(&self) -> Arc<SessionManager> {
        self.session_manager.clone()
    }

    /// Reports whether the host application moved to the background.
    pub fn set_background(&self, background: bool) {
        self.visibility.set_background(background);
    }

    /// Stops the event pump. Radio completions arriving later are dropped.
    pub fn shutdown(self) {
        self.event_pump.abort();
        info!("Session manager stopped.");
    }
}
