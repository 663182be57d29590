//! Leveled test-step logger.
//!
//! Every accepted record is rendered as a styled console line and, when file
//! logging is enabled, appended as one JSON object per line to
//! `<dir>/app-log-<YYYY-MM-DD>.log`. File failures are reported on stderr and
//! swallowed: logging never fails a test.

use crate::config::{keys, ConfigManager};
use chrono::{SecondsFormat, Utc};
use console::{style, Term};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Structured metadata attached to a log record
pub type Metadata = Map<String, Value>;

/// Log severity, ordered from least to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Failures
    Error = 0,
    /// Suspicious but non-fatal conditions
    Warn = 1,
    /// Test-step progress
    Info = 2,
    /// Detailed driver interaction
    Debug = 3,
}

impl LogLevel {
    /// Upper-case label used in records
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    /// Whether a record at `self` passes a logger configured with `threshold`
    #[must_use]
    pub fn enabled_at(self, threshold: Self) -> bool {
        self <= threshold
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One log record as written to the log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO-8601 timestamp
    pub timestamp: String,
    /// Upper-case level label
    pub level: String,
    /// Message text
    pub message: String,
    /// Attached metadata (empty object when none)
    pub metadata: Metadata,
}

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerOptions {
    /// Most verbose level that is emitted
    pub level: LogLevel,
    /// Append JSON records to a daily file
    pub to_file: bool,
    /// Directory holding the daily files
    pub file_path: PathBuf,
    /// Render records on stdout/stderr
    pub console: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            to_file: false,
            file_path: PathBuf::from("logs"),
            console: true,
        }
    }
}

impl LoggerOptions {
    /// Read `logging.level`, `logging.toFile` and `logging.path`
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        let defaults = Self::default();
        let level = config
            .get(keys::LOGGING_LEVEL, defaults.level.label().to_string())
            .parse()
            .unwrap_or(defaults.level);
        Self {
            level,
            to_file: config.get(keys::LOGGING_TO_FILE, defaults.to_file),
            file_path: config.get(keys::LOGGING_PATH, defaults.file_path),
            console: true,
        }
    }

    /// Set the threshold
    #[must_use]
    pub const fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enable file output into `dir`
    #[must_use]
    pub fn with_file(mut self, dir: impl Into<PathBuf>) -> Self {
        self.to_file = true;
        self.file_path = dir.into();
        self
    }

    /// Toggle console rendering
    #[must_use]
    pub const fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }
}

/// Leveled logger with console and optional daily-file sinks
#[derive(Debug, Clone)]
pub struct Logger {
    options: LoggerOptions,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LoggerOptions::default())
    }
}

impl Logger {
    /// Create a logger; the log directory is created up front when file output is on
    #[must_use]
    pub fn new(options: LoggerOptions) -> Self {
        if options.to_file {
            if let Err(err) = std::fs::create_dir_all(&options.file_path) {
                report_sink_failure(&options.file_path, &err);
            }
        }
        Self { options }
    }

    /// Logger configured from the `logging.*` keys
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        Self::new(LoggerOptions::from_config(config))
    }

    /// Configuration in use
    #[must_use]
    pub const fn options(&self) -> &LoggerOptions {
        &self.options
    }

    /// Path of today's log file
    #[must_use]
    pub fn current_file(&self) -> PathBuf {
        daily_file(&self.options.file_path, &Utc::now().format("%Y-%m-%d").to_string())
    }

    /// Log at info level
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref(), Metadata::new());
    }

    /// Log at info level with metadata
    pub fn info_with(&self, message: impl AsRef<str>, metadata: Metadata) {
        self.log(LogLevel::Info, message.as_ref(), metadata);
    }

    /// Log at warn level
    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref(), Metadata::new());
    }

    /// Log at warn level with metadata
    pub fn warn_with(&self, message: impl AsRef<str>, metadata: Metadata) {
        self.log(LogLevel::Warn, message.as_ref(), metadata);
    }

    /// Log at debug level
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref(), Metadata::new());
    }

    /// Log at debug level with metadata
    pub fn debug_with(&self, message: impl AsRef<str>, metadata: Metadata) {
        self.log(LogLevel::Debug, message.as_ref(), metadata);
    }

    /// Log at error level, folding the error's source chain into `metadata.stack`
    pub fn error(&self, message: impl AsRef<str>, error: Option<&dyn std::error::Error>) {
        self.error_with(message, error, Metadata::new());
    }

    /// Log at error level with metadata
    pub fn error_with(
        &self,
        message: impl AsRef<str>,
        error: Option<&dyn std::error::Error>,
        mut metadata: Metadata,
    ) {
        if let Some(error) = error {
            metadata.insert("stack".to_string(), Value::String(error_chain(error)));
        }
        self.log(LogLevel::Error, message.as_ref(), metadata);
    }

    /// Emit a record if `level` passes the threshold; returns whether it did
    pub fn log(&self, level: LogLevel, message: &str, metadata: Metadata) -> bool {
        if !level.enabled_at(self.options.level) {
            return false;
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level.label().to_string(),
            message: message.to_string(),
            metadata,
        };

        mirror_to_tracing(level, &entry);

        if self.options.console {
            self.write_console(level, &entry);
        }
        if self.options.to_file {
            self.write_file(&entry);
        }
        true
    }

    fn write_console(&self, level: LogLevel, entry: &LogEntry) {
        let label = format!("[{}]", entry.level);
        let label = match level {
            LogLevel::Error => style(label).red().bold(),
            LogLevel::Warn => style(label).yellow(),
            LogLevel::Info => style(label).cyan(),
            LogLevel::Debug => style(label).dim(),
        };
        let mut line = format!(
            "{} {} {}",
            style(&entry.timestamp).yellow().bright(),
            label,
            style(&entry.message).magenta().bright()
        );
        if !entry.metadata.is_empty() {
            let rendered = serde_json::to_string(&entry.metadata).unwrap_or_default();
            line.push(' ');
            line.push_str(&style(rendered).dim().to_string());
        }

        let term = if level == LogLevel::Error {
            Term::stderr()
        } else {
            Term::stdout()
        };
        let _ = term.write_line(&line);
    }

    fn write_file(&self, entry: &LogEntry) {
        let date = entry.timestamp.get(..10).unwrap_or_default();
        let path = daily_file(&self.options.file_path, date);
        let result = serde_json::to_string(entry)
            .map_err(std::io::Error::from)
            .and_then(|mut json| {
                json.push('\n');
                std::fs::create_dir_all(&self.options.file_path)?;
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?
                    .write_all(json.as_bytes())
            });
        if let Err(err) = result {
            report_sink_failure(&path, &err);
        }
    }
}

fn daily_file(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("app-log-{date}.log"))
}

fn report_sink_failure(path: &Path, err: &std::io::Error) {
    let _ = Term::stderr().write_line(&format!(
        "Logger error: failed to write to log file {}: {err}",
        path.display()
    ));
}

fn mirror_to_tracing(level: LogLevel, entry: &LogEntry) {
    match level {
        LogLevel::Error => tracing::error!(target: "waymark::log", "{}", entry.message),
        LogLevel::Warn => tracing::warn!(target: "waymark::log", "{}", entry.message),
        LogLevel::Info => tracing::info!(target: "waymark::log", "{}", entry.message),
        LogLevel::Debug => tracing::debug!(target: "waymark::log", "{}", entry.message),
    }
}

/// Render an error and its sources, outermost first
#[must_use]
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\n  caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Build a [`Metadata`] map from `key => value` pairs
#[macro_export]
macro_rules! metadata {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::logger::Metadata::new();
        $(map.insert(($key).to_string(), ::serde_json::json!($value));)*
        map
    }};
}
