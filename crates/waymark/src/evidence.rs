//! Best-effort screenshot evidence.
//!
//! Capturing evidence must never mask the failure it documents: every step
//! here returns a `Result`, and [`best_effort`] is the one place where such a
//! result is logged and discarded.

use crate::config::{keys, ConfigManager};
use crate::driver::PageDriver;
use crate::logger::Logger;
use crate::result::WaymarkResult;
use crate::wait::LoadState;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pause between network idle and the screenshot
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Waits performed before an evidence screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceOptions {
    /// Bound on the `load` wait
    pub load_timeout: Duration,
    /// Bound on the network-idle wait
    pub idle_timeout: Duration,
    /// Fixed pause after the page settles
    pub settle_delay: Duration,
}

impl Default for EvidenceOptions {
    fn default() -> Self {
        Self {
            load_timeout: LoadState::Load.default_timeout(),
            idle_timeout: LoadState::NetworkIdle.default_timeout(),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

impl EvidenceOptions {
    /// Defaults with `evidence.settleDelayMs` applied
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        Self {
            settle_delay: Duration::from_millis(
                config.get(keys::EVIDENCE_SETTLE_DELAY_MS, DEFAULT_SETTLE_DELAY_MS),
            ),
            ..Self::default()
        }
    }

    /// Bound both lifecycle waits by `timeout`
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self.idle_timeout = timeout;
        self
    }

    /// Set the settle delay
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Await `operation`; on error log `"Failed to <what>"` with the error chain
/// and return `None`
pub async fn best_effort<T, Fut>(logger: &Logger, what: &str, operation: Fut) -> Option<T>
where
    Fut: Future<Output = WaymarkResult<T>>,
{
    match operation.await {
        Ok(value) => Some(value),
        Err(err) => {
            logger.error(format!("Failed to {what}: {err}"), Some(&err));
            None
        }
    }
}

/// Wait for `load` and network idle, pause, then write a full-page
/// screenshot to `path`
pub async fn capture_screenshot(
    page: &dyn PageDriver,
    path: &Path,
    options: &EvidenceOptions,
) -> WaymarkResult<PathBuf> {
    page.wait_for_load_state(LoadState::Load, options.load_timeout)
        .await?;
    page.wait_for_load_state(LoadState::NetworkIdle, options.idle_timeout)
        .await?;
    if !options.settle_delay.is_zero() {
        tokio::time::sleep(options.settle_delay).await;
    }

    let png = page.screenshot(true).await?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, png)?;
    Ok(path.to_path_buf())
}

/// [`capture_screenshot`] whose failures are logged and swallowed
pub async fn capture_failure_evidence(
    page: &dyn PageDriver,
    path: &Path,
    logger: &Logger,
    options: &EvidenceOptions,
) -> Option<PathBuf> {
    best_effort(
        logger,
        "capture failure evidence",
        capture_screenshot(page, path, options),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogEntry, LoggerOptions};
    use crate::mock::MockPage;
    use crate::result::WaymarkError;

    fn fast() -> EvidenceOptions {
        EvidenceOptions::default()
            .with_wait_timeout(Duration::from_millis(100))
            .with_settle_delay(Duration::ZERO)
    }

    fn file_logger(dir: &Path) -> Logger {
        Logger::new(LoggerOptions::default().with_console(false).with_file(dir))
    }

    fn logged(logger: &Logger) -> Vec<LogEntry> {
        std::fs::read_to_string(logger.current_file())
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ConfigManager::new();
        assert_eq!(
            EvidenceOptions::from_config(&config).settle_delay,
            Duration::from_millis(500)
        );
        config.set(keys::EVIDENCE_SETTLE_DELAY_MS, 20);
        assert_eq!(
            EvidenceOptions::from_config(&config).settle_delay,
            Duration::from_millis(20)
        );
    }

    #[tokio::test]
    async fn test_writes_full_page_png() {
        let dir = tempfile::tempdir().unwrap();
        let page = MockPage::new();
        let path = dir.path().join("shots").join("a.png");
        let logger = file_logger(&dir.path().join("logs"));

        let written = capture_failure_evidence(&page, &path, &logger, &fast()).await;
        assert_eq!(written.as_deref(), Some(path.as_path()));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert!(logged(&logger).is_empty());
    }

    #[tokio::test]
    async fn test_idle_timeout_is_logged_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let page = MockPage::new();
        page.set_network_busy(true);
        let path = dir.path().join("a.png");
        let logger = file_logger(&dir.path().join("logs"));

        let written = capture_failure_evidence(&page, &path, &logger, &fast()).await;
        assert!(written.is_none());
        assert!(!path.exists());

        let entries = logged(&logger);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, "ERROR");
        assert!(entries[0].message.starts_with("Failed to capture failure evidence"));
    }

    #[tokio::test]
    async fn test_closed_page_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let page = MockPage::new();
        page.close().await.unwrap();
        let logger = file_logger(dir.path());
        let written =
            capture_failure_evidence(&page, &dir.path().join("a.png"), &logger, &fast()).await;
        assert!(written.is_none());
    }

    #[tokio::test]
    async fn test_best_effort_passes_values_through() {
        let logger = Logger::new(LoggerOptions::default().with_console(false));
        let ok = best_effort(&logger, "noop", async { Ok::<_, WaymarkError>(7) }).await;
        assert_eq!(ok, Some(7));
        let err = best_effort(&logger, "fail", async {
            Err::<u8, _>(WaymarkError::page("boom"))
        })
        .await;
        assert_eq!(err, None);
    }
}
