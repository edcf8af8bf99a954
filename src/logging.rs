//! Log sink for the session core.
//!
//! Lines go to stderr with a local timestamp. Front ends that want to show the
//! log (a UI pane, a socket) can also receive each record as a [`LogMessage`].

use std::sync::OnceLock;

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    /// The line written to stderr
    pub fn line(&self) -> String {
        format!("{} [{}] {}: {}", self.timestamp, self.level, self.target, self.message)
    }
}

pub struct SessionLogger {
    level: Level,
    forward: Option<UnboundedSender<LogMessage>>,
}

impl SessionLogger {
    pub fn new(level: Level, forward: Option<UnboundedSender<LogMessage>>) -> Self {
        Self { level, forward }
    }

    /// Installs the logger process-wide. Fails if a logger is already set.
    pub fn init(level: Level, forward: Option<UnboundedSender<LogMessage>>) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| SessionLogger::new(level, forward));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))
    }
}

impl log::Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = LogMessage::from_record(record);
        eprintln!("{}", message.line());
        if let Some(tx) = &self.forward {
            // Receiver gone means nobody is watching; stderr still has the line
            let _ = tx.send(message);
        }
    }

    fn flush(&self) {}
}

/// Sets up logging for a binary: the session logger, or `env_logger` when a
/// logger has already been installed by the embedding process.
pub fn init_logging(verbose: bool, forward: Option<UnboundedSender<LogMessage>>) {
    let level = if verbose { Level::Debug } else { Level::Info };
    if let Err(e) = SessionLogger::init(level, forward) {
        let filter = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
        let fallback = env_logger::Builder::from_default_env()
            .filter_level(filter)
            .try_init();
        if fallback.is_err() {
            eprintln!("Logger already installed, keeping it: {}", e);
        }
    }
}
