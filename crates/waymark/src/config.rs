//! Hierarchical harness configuration.
//!
//! A JSON tree addressed by dotted paths (`retry.maxAttempts`,
//! `reporting.outputPath`, ...). Built-in defaults are merged with caller
//! overrides at construction; lookups never fail and fall back to the
//! caller-supplied default when any path segment is missing or the stored
//! value has the wrong shape.

use crate::result::WaymarkResult;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Dotted configuration keys understood by the harness
pub mod keys {
    /// Maximum attempts for retried actions
    pub const RETRY_MAX_ATTEMPTS: &str = "retry.maxAttempts";
    /// Flat delay between attempts, in milliseconds
    pub const RETRY_BASE_DELAY: &str = "retry.baseDelay";
    /// Declared for compatibility; the retry loop always uses a flat delay
    pub const RETRY_EXPONENTIAL_BACKOFF: &str = "retry.exponentialBackoff";
    /// Logger threshold (`error`, `warn`, `info`, `debug`)
    pub const LOGGING_LEVEL: &str = "logging.level";
    /// Whether a standalone logger writes to a file
    pub const LOGGING_TO_FILE: &str = "logging.toFile";
    /// Directory of the standalone logger's files
    pub const LOGGING_PATH: &str = "logging.path";
    /// Root of all per-test artifact directories
    pub const REPORTING_OUTPUT_PATH: &str = "reporting.outputPath";
    /// Settling delay before an evidence screenshot, in milliseconds
    pub const EVIDENCE_SETTLE_DELAY_MS: &str = "evidence.settleDelayMs";
    /// Launch browsers without a window
    pub const BROWSER_HEADLESS: &str = "browser.headless";
    /// Recorded video width
    pub const VIDEO_WIDTH: &str = "video.width";
    /// Recorded video height
    pub const VIDEO_HEIGHT: &str = "video.height";
    /// Recorded video frames per second
    pub const VIDEO_FPS: &str = "video.fps";
}

/// Built-in configuration tree
#[must_use]
pub fn default_config() -> Value {
    json!({
        "retry": {
            "maxAttempts": 3,
            "baseDelay": 1000,
            "exponentialBackoff": true
        },
        "logging": {
            "level": "info",
            "toFile": false,
            "path": "./logs"
        },
        "reporting": {
            "outputPath": "./test-results"
        },
        "evidence": {
            "settleDelayMs": 500
        },
        "browser": {
            "headless": true
        },
        "video": {
            "width": 1280,
            "height": 720,
            "fps": 5
        }
    })
}

/// Configuration store with dotted-path access
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigManager {
    config: Value,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    /// Create a manager holding only the built-in defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: default_config(),
        }
    }

    /// Create a manager with `overrides` merged over the defaults
    #[must_use]
    pub fn with_overrides(overrides: Value) -> Self {
        Self {
            config: merge_configs(default_config(), overrides),
        }
    }

    /// Load overrides from a YAML or JSON file and merge them over the defaults
    pub fn from_file(path: impl AsRef<Path>) -> WaymarkResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse overrides from YAML (JSON is accepted as well)
    pub fn from_yaml_str(raw: &str) -> WaymarkResult<Self> {
        let overrides: Value = serde_yaml_ng::from_str(raw)?;
        Ok(Self::with_overrides(overrides))
    }

    /// Look up `key`, returning `default` if the path is absent or the value
    /// cannot be read as `T`
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_value(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    /// Raw value at `key`, if every segment of the path exists
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.config, |current, segment| current.get(segment))
    }

    /// Set `key` to `value`, creating intermediate objects as needed
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = key.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.config;
        for segment in segments {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = match current {
                Value::Object(map) => map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                _ => return,
            };
        }

        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        if let Value::Object(map) = current {
            map.insert(last.to_string(), value.into());
        }
    }

    /// Snapshot of the whole tree
    #[must_use]
    pub fn get_all(&self) -> Value {
        self.config.clone()
    }

    /// Discard runtime changes and overrides, restoring the built-in defaults
    pub fn reset(&mut self) {
        self.config = default_config();
    }
}

/// Merge `source` over `target`.
///
/// Nested objects present on both sides merge recursively; anything else
/// (arrays, scalars, null) in `source` replaces the value in `target`.
#[must_use]
pub fn merge_configs(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                let merged = match target.remove(&key) {
                    Some(existing @ Value::Object(_)) if value.is_object() => {
                        merge_configs(existing, value)
                    }
                    _ => value,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, source) => source,
    }
}
