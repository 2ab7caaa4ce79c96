use chrono::Local;
use log::{LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc;

/// One forwarded record. Serializes alongside [`crate::core::BleEvent`] lines
/// as `{"event": "log-message", ...}`.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename = "log-message")]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Writes records to stderr and forwards them to a log channel.
pub struct EventLogger {
    level: LevelFilter,
    sender: Option<mpsc::UnboundedSender<LogMessage>>,
}

impl EventLogger {
    pub fn new(level: LevelFilter, sender: Option<mpsc::UnboundedSender<LogMessage>>) -> Self {
        Self { level, sender }
    }

    /// Installs the logger globally. Fails if another logger is already set.
    pub fn init(
        level: LevelFilter,
        sender: Option<mpsc::UnboundedSender<LogMessage>>,
    ) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(EventLogger::new(level, sender)))
            .map(|()| log::set_max_level(level))
    }

    fn emit_log(&self, record: &Record) {
        let Some(sender) = &self.sender else {
            return;
        };
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };
        // a closed receiver just means nobody is listening anymore
        let _ = sender.send(log_message);
    }
}

impl log::Log for EventLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}
