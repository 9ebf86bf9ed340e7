//! Structured logging for the sidebar runtime.
//!
//! Components log through a shared [`SidebarLogger`] with a category per
//! concern (`tracker`, `extract`, `render`, `watch`, `copy`). Records go to an
//! external callback when one is configured, otherwise to the console.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&SidebarLogRecord) + Send + Sync + 'static>;

#[derive(Clone)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Medium,
            external_logger: None,
        }
    }
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SidebarLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl SidebarLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Default console printer used when no external logger is configured.
pub fn default_log_handler(record: &SidebarLogRecord) {
    let timestamp = record
        .timestamp
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    match &record.category {
        Some(category) => eprintln!(
            "[{}] {:<5} [{}] {}",
            timestamp,
            record.level.label(),
            category,
            record.message
        ),
        None => eprintln!(
            "[{}] {:<5} {}",
            timestamp,
            record.level.label(),
            record.message
        ),
    }
    if let Some(aux) = &record.auxiliary {
        if !aux.is_null() {
            eprintln!("    {}", aux);
        }
    }
}

/// Callback that forwards records into the `log` facade, for binaries that
/// already initialise `env_logger`.
pub fn log_facade_callback() -> LogCallback {
    Arc::new(|record: &SidebarLogRecord| {
        let level = match record.level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        };
        let category = record.category.as_deref().unwrap_or("sidebar");
        match &record.auxiliary {
            Some(aux) if !aux.is_null() => {
                log::log!(level, "[{}] {} {}", category, record.message, aux)
            }
            _ => log::log!(level, "[{}] {}", category, record.message),
        }
    })
}

pub struct SidebarLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for SidebarLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidebarLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for SidebarLogger {
    fn default() -> Self {
        Self::with_config(LogConfig::default())
    }
}

impl SidebarLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    /// Logger that drops everything below errors and sends errors nowhere.
    pub fn silent() -> Self {
        let mut config = LogConfig::new(Verbosity::Minimal);
        config.external_logger = Some(Arc::new(|_| {}));
        Self::with_config(config)
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_verbose(&mut self, verbose: Verbosity) {
        self.config.verbose = verbose;
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            SidebarLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing(verbose: Verbosity) -> (SidebarLogger, Arc<Mutex<Vec<SidebarLogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&records);
        let callback: LogCallback = Arc::new(move |record| {
            capture.lock().unwrap().push(record.clone());
        });
        let mut logger = SidebarLogger::new(verbose);
        logger.set_external_logger(Some(callback));
        (logger, records)
    }

    #[test]
    fn respects_verbosity() {
        let logger = SidebarLogger::new(Verbosity::Minimal);
        assert!(logger.config.should_log(LogLevel::Error));
        assert!(!logger.config.should_log(LogLevel::Info));
        assert!(!logger.config.should_log(LogLevel::Debug));
    }

    #[test]
    fn external_logger_is_invoked() {
        let (logger, records) = capturing(Verbosity::Detailed);

        logger.info("turn finished", Some("tracker"), None);
        logger.debug(
            "pass skipped",
            Some("extract"),
            Some(serde_json::json!({ "unit": 4 })),
        );

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].message, "turn finished");
        assert_eq!(values[0].category.as_deref(), Some("tracker"));
        assert_eq!(values[0].level, LogLevel::Info);
        assert_eq!(
            values[1].auxiliary.as_ref().unwrap(),
            &serde_json::json!({ "unit": 4 })
        );
    }

    #[test]
    fn medium_verbosity_filters_debug_records() {
        let (logger, records) = capturing(Verbosity::Medium);
        logger.debug("noise", Some("watch"), None);
        logger.error("render target missing", Some("render"), None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].level, LogLevel::Error);
    }

    #[test]
    fn records_serialize_without_empty_fields() {
        let record = SidebarLogRecord::new("hello", LogLevel::Info, None, None);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["level"], "info");
        assert!(value.get("category").is_none());
        assert!(value.get("auxiliary").is_none());
    }
}
