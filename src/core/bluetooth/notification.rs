//! Notification handling for subscribed characteristics
//! This module runs the bluest notify streams and turns every pushed value
//! into a `CharacteristicChanged` radio event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::radio::{RadioEvent, RadioEventSender};
use crate::core::bluetooth::types::{CharacteristicId, DeviceAddress, GattHandle};

type SubscriptionKey = (GattHandle, CharacteristicId);

/// Tracks one notify stream task per subscribed characteristic.
#[derive(Clone, Default)]
pub struct NotificationHandler {
    subscriptions: Arc<Mutex<HashMap<SubscriptionKey, CancellationToken>>>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `notify_char` and forwards its values until stopped.
    pub fn setup_notifications(
        &self,
        runtime: &Handle,
        handle: GattHandle,
        address: DeviceAddress,
        id: CharacteristicId,
        notify_char: Characteristic,
        events: RadioEventSender,
    ) {
        info!("Subscribing to notifications on {}...", id.characteristic);
        let token = CancellationToken::new();
        let previous = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((handle, id), token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        runtime.spawn(Self::process_notifications(address, id, notify_char, events, token));
    }

    /// Ends the stream for one characteristic. Returns whether one was running.
    pub fn stop_notifications(&self, handle: GattHandle, id: &CharacteristicId) -> bool {
        let token = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(handle, *id));
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ends every stream opened on `handle`.
    pub fn stop_all(&self, handle: GattHandle) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions.retain(|(h, _), token| {
            if *h == handle {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    async fn process_notifications(
        address: DeviceAddress,
        id: CharacteristicId,
        notify_char: Characteristic,
        events: RadioEventSender,
        token: CancellationToken,
    ) {
        let mut notification_stream = match notify_char.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                return;
            }
        };
        info!("Listening for notifications on {}...", id.characteristic);

        loop {
            tokio::select! {
                result = notification_stream.next() => {
                    match result {
                        Some(Ok(value)) => {
                            debug!("Received data on {}: {:?}", id.characteristic, value);
                            let event = RadioEvent::CharacteristicChanged {
                                address: address.clone(),
                                characteristic: id,
                                value,
                            };
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = token.cancelled() => break,
            }
        }

        info!("Notification stream on {} ended", id.characteristic);
    }
}
