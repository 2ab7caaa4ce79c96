//! Command-line commands
//! This module parses and runs the commands accepted by the binary.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};

use crate::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;
use crate::core::bluetooth::{ConnectionState, DeviceAddress};
use crate::state::AppState;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Manufacturer id used when advertising from the command line (reserved for testing).
pub const TEST_MANUFACTURER_ID: u16 = 0xffff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `scan [secs]`
    Scan { duration: Duration },
    /// `connect <address> [secs]`
    Connect { address: DeviceAddress, duration: Duration },
    /// `advertise <name> [secs]`
    Advertise { name: String, duration: Duration },
}

fn parse_duration(arg: Option<&String>) -> Result<Duration> {
    let secs = match arg {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("Invalid duration: {}", value))?,
        None => DEFAULT_SCAN_DURATION_SECS,
    };
    Ok(Duration::from_secs(secs))
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            bail!("Missing command; expected scan, connect or advertise");
        };
        match name.as_str() {
            "scan" => Ok(Command::Scan {
                duration: parse_duration(args.get(1))?,
            }),
            "connect" => {
                let address = args.get(1).ok_or_else(|| anyhow!("connect needs a device address"))?;
                Ok(Command::Connect {
                    address: DeviceAddress::new(address.as_str()),
                    duration: parse_duration(args.get(2))?,
                })
            }
            "advertise" => {
                let name = args.get(1).ok_or_else(|| anyhow!("advertise needs a device name"))?;
                Ok(Command::Advertise {
                    name: name.clone(),
                    duration: parse_duration(args.get(2))?,
                })
            }
            other => bail!("Unknown command: {}", other),
        }
    }
}

/// Runs one command to completion. Events go to the sink the state was built with.
pub async fn run(state: &AppState, command: Command) -> Result<()> {
    let manager = state.get_session_manager_arc();
    match command {
        Command::Scan { duration } => {
            manager.init_center()?;
            if !manager.start_scan() {
                bail!("Scan could not be started");
            }
            tokio::time::sleep(duration).await;
            manager.stop_scan();
        }
        Command::Connect { address, duration } => {
            manager.init_center()?;
            if !manager.start_scan() {
                bail!("Scan could not be started");
            }
            tokio::time::sleep(duration).await;
            manager.stop_scan();

            if !manager.connect(&address) {
                bail!("Connect to {} was rejected", address);
            }
            let connected = tokio::time::timeout(duration, async {
                while manager.central_state() == ConnectionState::Connecting {
                    tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
                }
                manager.central_state() == ConnectionState::Connected
            })
            .await
            .unwrap_or(false);
            if !connected {
                manager.close(&address);
                bail!("Could not connect to {}", address);
            }

            info!("Connected to {}, discovering services.", address);
            manager.discover_services(&address);
            manager.read_rssi(&address);
            tokio::time::sleep(duration).await;
            if !manager.disconnect(&address) {
                warn!("{} was already gone.", address);
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
            manager.close(&address);
        }
        Command::Advertise { name, duration } => {
            manager.start_advertiser(Some(&name), TEST_MANUFACTURER_ID, None)?;
            tokio::time::sleep(duration).await;
            manager.stop_advertiser();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scan_defaults_duration() {
        let command = Command::parse(&args(&["scan"])).unwrap();
        assert_eq!(
            command,
            Command::Scan {
                duration: Duration::from_secs(DEFAULT_SCAN_DURATION_SECS)
            }
        );
    }

    #[test]
    fn connect_takes_address_and_duration() {
        let command = Command::parse(&args(&["connect", "AA:BB:CC:DD:EE:FF", "12"])).unwrap();
        assert_eq!(
            command,
            Command::Connect {
                address: DeviceAddress::new("AA:BB:CC:DD:EE:FF"),
                duration: Duration::from_secs(12),
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse(&[]).is_err());
        assert!(Command::parse(&args(&["connect"])).is_err());
        assert!(Command::parse(&args(&["scan", "soon"])).is_err());
        assert!(Command::parse(&args(&["pair"])).is_err());
    }

    #[test]
    fn advertise_keeps_name() {
        let command = Command::parse(&args(&["advertise", "bridge"])).unwrap();
        assert!(matches!(command, Command::Advertise { name, .. } if name == "bridge"));
    }
}
