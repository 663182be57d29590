//! Per-test artifact layout.
//!
//! ```text
//! <output>/<suite>/<test>/
//!   console-logs/app-log-<date>.log
//!   screenshots/<action>-<success|error>-<timestamp>.png
//!   videos/<title>-<timestamp>/<video file>
//!   network-calls/network-logs-<timestamp>.json
//! ```

use crate::result::WaymarkResult;
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};

/// Console log subdirectory
pub const CONSOLE_LOGS_DIR: &str = "console-logs";
/// Screenshot subdirectory
pub const SCREENSHOTS_DIR: &str = "screenshots";
/// Video subdirectory
pub const VIDEOS_DIR: &str = "videos";
/// Network log subdirectory
pub const NETWORK_CALLS_DIR: &str = "network-calls";

/// ISO-8601 UTC timestamp with milliseconds
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ISO-8601 timestamp with `:` and `.` replaced by `-`, safe in file names
#[must_use]
pub fn file_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Make `name` usable as a single path component: whitespace runs become
/// `_` and path separators become `-`
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace(['/', '\\'], "-")
}

/// Directory tree for one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    /// Layout rooted at `<output>/<suite>/<test>`; nothing is created
    #[must_use]
    pub fn new(output: impl AsRef<Path>, suite: &str, test: &str) -> Self {
        Self {
            root: output.as_ref().join(sanitize(suite)).join(sanitize(test)),
        }
    }

    /// Create every subdirectory
    pub fn create(&self) -> WaymarkResult<()> {
        for dir in self.subdirectories() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Layout, created eagerly
    pub fn create_new(output: impl AsRef<Path>, suite: &str, test: &str) -> WaymarkResult<Self> {
        let paths = Self::new(output, suite, test);
        paths.create()?;
        Ok(paths)
    }

    /// `<output>/<suite>/<test>`
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Logger directory
    #[must_use]
    pub fn console_logs(&self) -> PathBuf {
        self.root.join(CONSOLE_LOGS_DIR)
    }

    /// Screenshot directory
    #[must_use]
    pub fn screenshots(&self) -> PathBuf {
        self.root.join(SCREENSHOTS_DIR)
    }

    /// Video directory
    #[must_use]
    pub fn videos(&self) -> PathBuf {
        self.root.join(VIDEOS_DIR)
    }

    /// Network log directory
    #[must_use]
    pub fn network_calls(&self) -> PathBuf {
        self.root.join(NETWORK_CALLS_DIR)
    }

    /// All four subdirectories
    #[must_use]
    pub fn subdirectories(&self) -> [PathBuf; 4] {
        [
            self.console_logs(),
            self.screenshots(),
            self.videos(),
            self.network_calls(),
        ]
    }

    /// `screenshots/<action>-<outcome>-<timestamp>.png`
    #[must_use]
    pub fn screenshot_file(&self, action: &str, outcome: &str) -> PathBuf {
        self.screenshots()
            .join(format!("{}-{outcome}-{}.png", sanitize(action), file_timestamp()))
    }

    /// `videos/<title>-<timestamp>`
    #[must_use]
    pub fn video_dir(&self, title: &str) -> PathBuf {
        let title = sanitize(title);
        let name = if title.is_empty() {
            file_timestamp()
        } else {
            format!("{title}-{}", file_timestamp())
        };
        self.videos().join(name)
    }
}
