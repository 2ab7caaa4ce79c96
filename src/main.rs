use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ble_session_bridge_lib::commands::{self, Command};
use ble_session_bridge_lib::config::{AppConfig, CONFIG_FILE_NAME};
use ble_session_bridge_lib::core::BleEvent;
use ble_session_bridge_lib::logging::{EventLogger, LogMessage};
use ble_session_bridge_lib::state::AppState;
use log::{error, info};
use tokio::sync::mpsc;

/// Splits `--config <path>` off the argument list.
fn take_config_path(args: &mut Vec<String>) -> Result<PathBuf> {
    match args.iter().position(|a| a == "--config") {
        Some(index) => {
            let path = args
                .get(index + 1)
                .cloned()
                .context("--config needs a path")?;
            args.drain(index..=index + 1);
            Ok(PathBuf::from(path))
        }
        None => Ok(PathBuf::from(CONFIG_FILE_NAME)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_config_path(&mut args)?;
    let config = AppConfig::load_config(&config_path).await?;

    // Records go to stderr and, as JSON lines, to stdout next to the events.
    // Fall back to env_logger only when the event logger cannot be installed
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogMessage>();
    if EventLogger::init(config.log_level_filter(), Some(log_tx)).is_err() {
        env_logger::builder()
            .filter_level(config.log_level_filter())
            .init();
    }
    let log_printer = tokio::spawn(async move {
        while let Some(message) = log_rx.recv().await {
            // no logging here: it would feed back into this channel
            if let Ok(line) = serde_json::to_string(&message) {
                println!("{}", line);
            }
        }
    });

    let command = Command::parse(&args)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BleEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize {} event: {}", event.name(), e),
            }
        }
    });

    info!("Starting AppState initialization.");
    let app_state = AppState::new(config, Arc::new(event_tx)).await;
    let result = commands::run(&app_state, command).await;
    app_state.shutdown();
    printer.abort();
    log_printer.abort();

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}
