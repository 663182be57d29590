//! Per-test orchestration over one page.
//!
//! A [`TestService`] wraps the page under test and owns everything one test
//! produces: its artifact directory, a file-backed [`Logger`] writing into
//! `console-logs/`, a [`NetworkLogger`] writing into `network-calls/`, and a
//! [`PageMonitor`] collecting console output and failed requests.
//!
//! Every higher-level step should run through
//! [`try_catch_handler`](TestService::try_catch_handler), which retries it
//! and leaves a screenshot behind for each attempt.
//!
//! ## Example
//!
//! ```rust,ignore
//! let service = TestService::builder(page, "Auth", "valid login").build()?;
//! service.handle_input("email", InputAction::fill("a@b.com")).await?;
//! let login = service.expect_api_call("/auth/login", ApiCallOptions::post());
//! service.handle_input("submit", InputAction::Click).await?;
//! let call = login.wait().await?;
//! assert_eq!(call.body["user"]["role"], "user");
//! ```

use crate::artifacts::ArtifactPaths;
use crate::config::{keys, ConfigManager};
use crate::driver::{BrowserLauncher, ConsoleMessage, NetworkEvent, PageDriver, RecordVideo, Response};
use crate::evidence::{best_effort, capture_failure_evidence, EvidenceOptions};
use crate::locator::{Locator, LocatorOptions};
use crate::logger::{LogLevel, Logger, LoggerOptions};
use crate::metadata;
use crate::monitor::{NetworkFailure, PageMonitor};
use crate::network::{ApiCall, ApiCallOptions, UrlMatcher, UrlPattern};
use crate::network_logger::NetworkLogger;
use crate::result::{WaymarkError, WaymarkResult};
use crate::retry::RetryOptions;
use crate::video::{create_video_context_with, VideoContext};
use crate::wait::{WaitState, HIGHLIGHT_VISIBLE_TIMEOUT_MS, INPUT_VISIBLE_TIMEOUT_MS};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// Outline applied by [`TestService::debug_highlight`]
pub const DEBUG_OUTLINE: &str = "3px solid red";

/// Outline applied by [`TestService::highlight_multiple_and_capture`]
pub const BATCH_OUTLINE: &str = "1px solid red";

const DEBUG_HIGHLIGHT_PAUSE: Duration = Duration::from_millis(100);
const BATCH_HIGHLIGHT_PAUSE: Duration = Duration::from_millis(200);

// =============================================================================
// TARGETS AND ACTIONS
// =============================================================================

/// Something that resolves to a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Element carrying this test id
    TestId(String),
    /// A locator built by the caller
    Locator(Locator),
    /// Criteria applied to all elements
    Options(LocatorOptions),
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Self::TestId(id.to_string())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Self::TestId(id)
    }
}

impl From<Locator> for Target {
    fn from(locator: Locator) -> Self {
        Self::Locator(locator)
    }
}

impl From<&Locator> for Target {
    fn from(locator: &Locator) -> Self {
        Self::Locator(locator.clone())
    }
}

impl From<LocatorOptions> for Target {
    fn from(options: LocatorOptions) -> Self {
        Self::Options(options)
    }
}

/// Input performed by [`TestService::handle_input`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    /// Replace the element's value
    Fill(String),
    /// Click the element
    Click,
    /// Type after the current value, key by key
    Type(String),
}

impl InputAction {
    /// `Fill` with `value`
    #[must_use]
    pub fn fill(value: impl Into<String>) -> Self {
        Self::Fill(value.into())
    }

    /// `Type` with `text`
    #[must_use]
    pub fn type_text(text: impl Into<String>) -> Self {
        Self::Type(text.into())
    }

    /// Parse an action kind (`fill`, `click`, `type`); a missing value is empty
    pub fn parse(kind: &str, value: Option<&str>) -> WaymarkResult<Self> {
        let value = value.unwrap_or_default().to_string();
        match kind {
            "fill" => Ok(Self::Fill(value)),
            "click" => Ok(Self::Click),
            "type" => Ok(Self::Type(value)),
            other => Err(WaymarkError::UnsupportedInputAction {
                action: other.to_string(),
            }),
        }
    }
}

/// Settings for [`TestService::try_catch_handler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOptions {
    /// Name used in logs and screenshot file names
    pub action_name: String,
    /// Take a screenshot after every attempt
    pub capture_evidence: bool,
    /// Retry policy (default: a single attempt)
    pub retry: RetryOptions,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            action_name: "Unnamed Action".to_string(),
            capture_evidence: true,
            retry: RetryOptions::none(),
        }
    }
}

impl ActionOptions {
    /// Named action with evidence and no retries
    #[must_use]
    pub fn named(action_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            ..Self::default()
        }
    }

    /// Toggle evidence screenshots
    #[must_use]
    pub const fn with_capture_evidence(mut self, capture: bool) -> Self {
        self.capture_evidence = capture;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for [`TestService`]
pub struct TestServiceBuilder {
    page: Arc<dyn PageDriver>,
    test_suite: String,
    test_name: String,
    browser_name: Option<String>,
    config: ConfigManager,
    output_dir: Option<PathBuf>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    console: bool,
    log_level: LogLevel,
}

impl fmt::Debug for TestServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestServiceBuilder")
            .field("test_suite", &self.test_suite)
            .field("test_name", &self.test_name)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl TestServiceBuilder {
    /// Use this configuration instead of the defaults
    #[must_use]
    pub fn with_config(mut self, config: ConfigManager) -> Self {
        self.config = config;
        self
    }

    /// Root artifacts here instead of `reporting.outputPath`
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Launcher used by [`TestService::create_video_context`]
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Browser name reported in logs (defaults to the launcher's)
    #[must_use]
    pub fn with_browser_name(mut self, name: impl Into<String>) -> Self {
        self.browser_name = Some(name.into());
        self
    }

    /// Echo log records to the terminal (default true)
    #[must_use]
    pub const fn with_console_output(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Threshold of the per-test log (default debug, so input steps are recorded)
    #[must_use]
    pub const fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Create the artifact directories and wire the loggers
    pub fn build(self) -> WaymarkResult<TestService> {
        let output = self.output_dir.unwrap_or_else(|| {
            PathBuf::from(self.config.get(
                keys::REPORTING_OUTPUT_PATH,
                "./test-results".to_string(),
            ))
        });
        let artifacts = ArtifactPaths::create_new(&output, &self.test_suite, &self.test_name)?;

        let logger = Logger::new(
            LoggerOptions::from_config(&self.config)
                .with_level(self.log_level)
                .with_file(artifacts.console_logs())
                .with_console(self.console),
        );
        let network_logger = NetworkLogger::in_dir(artifacts.network_calls())?;
        let monitor = PageMonitor::attach(self.page.as_ref());
        let browser_name = self
            .browser_name
            .or_else(|| self.launcher.as_ref().map(|l| l.name().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        logger.debug_with(
            format!("Test service ready for {}", self.test_name),
            metadata! {
                "suite" => self.test_suite,
                "browser" => browser_name,
                "artifacts" => artifacts.root().display().to_string(),
            },
        );

        Ok(TestService {
            page: self.page,
            browser_name,
            test_suite: self.test_suite,
            test_name: self.test_name,
            evidence: EvidenceOptions::from_config(&self.config),
            config: self.config,
            artifacts,
            logger,
            network_logger,
            monitor,
            launcher: self.launcher,
        })
    }
}

// =============================================================================
// TEST SERVICE
// =============================================================================

/// Orchestrates one test against one page
pub struct TestService {
    page: Arc<dyn PageDriver>,
    browser_name: String,
    test_suite: String,
    test_name: String,
    config: ConfigManager,
    evidence: EvidenceOptions,
    artifacts: ArtifactPaths,
    logger: Logger,
    network_logger: NetworkLogger,
    monitor: PageMonitor,
    launcher: Option<Arc<dyn BrowserLauncher>>,
}

impl fmt::Debug for TestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestService")
            .field("browser_name", &self.browser_name)
            .field("test_suite", &self.test_suite)
            .field("test_name", &self.test_name)
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl TestService {
    /// Start building a service for `test_name` in `test_suite`
    #[must_use]
    pub fn builder(
        page: Arc<dyn PageDriver>,
        test_suite: impl Into<String>,
        test_name: impl Into<String>,
    ) -> TestServiceBuilder {
        TestServiceBuilder {
            page,
            test_suite: test_suite.into(),
            test_name: test_name.into(),
            browser_name: None,
            config: ConfigManager::new(),
            output_dir: None,
            launcher: None,
            console: true,
            log_level: LogLevel::Debug,
        }
    }

    /// The page under test
    #[must_use]
    pub fn page(&self) -> &Arc<dyn PageDriver> {
        &self.page
    }

    /// Browser name
    #[must_use]
    pub fn browser_name(&self) -> &str {
        &self.browser_name
    }

    /// Suite name
    #[must_use]
    pub fn test_suite(&self) -> &str {
        &self.test_suite
    }

    /// Test name
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Configuration
    #[must_use]
    pub const fn config(&self) -> &ConfigManager {
        &self.config
    }

    /// Mutable configuration; changes apply to later calls
    pub fn config_mut(&mut self) -> &mut ConfigManager {
        &mut self.config
    }

    /// Artifact layout
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactPaths {
        &self.artifacts
    }

    /// Logger writing into `console-logs/`
    #[must_use]
    pub const fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Response log writing into `network-calls/`
    #[must_use]
    pub const fn network_logger(&self) -> &NetworkLogger {
        &self.network_logger
    }

    /// Browser console messages seen on the page
    #[must_use]
    pub fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.monitor.console_messages()
    }

    /// Failed responses and requests seen on the page
    #[must_use]
    pub fn network_failures(&self) -> Vec<NetworkFailure> {
        self.monitor.network_failures()
    }

    // -------------------------------------------------------------------------
    // Locators
    // -------------------------------------------------------------------------

    /// Lazy locator: the test id (or every element) narrowed by `options`
    #[must_use]
    pub fn get_locator(&self, test_id: Option<&str>, options: &LocatorOptions) -> Locator {
        let root = match test_id {
            Some(id) => Locator::test_id(id),
            None => Locator::all(),
        };
        options.apply(root)
    }

    /// Locator for `target`
    #[must_use]
    pub fn resolve(&self, target: impl Into<Target>) -> Locator {
        match target.into() {
            Target::TestId(id) => Locator::test_id(id),
            Target::Locator(locator) => locator,
            Target::Options(options) => self.get_locator(None, &options),
        }
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Run `action` under the retry policy in `options`.
    ///
    /// Each successful attempt leaves a `success` screenshot and each failed
    /// one logs the error and leaves an `error` screenshot; the last error is
    /// returned once retries are exhausted.
    pub async fn try_catch_handler<T, F, Fut>(
        &self,
        mut action: F,
        options: ActionOptions,
    ) -> WaymarkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WaymarkResult<T>>,
    {
        let name = options.action_name.as_str();
        let capture = options.capture_evidence;
        self.logger.info(format!("Executing action: {name}"));

        options
            .retry
            .run(|| {
                let attempt = action();
                async move {
                    match attempt.await {
                        Ok(value) => {
                            if capture {
                                self.capture_evidence(name, "success").await;
                            }
                            Ok(value)
                        }
                        Err(err) => {
                            self.logger.error(format!("Error in {name}: {err}"), Some(&err));
                            if capture {
                                self.capture_evidence(name, "error").await;
                            }
                            Err(err)
                        }
                    }
                }
            })
            .await
    }

    /// Full-page screenshot at `screenshots/<action>-<outcome>-<ts>.png`,
    /// best effort
    pub async fn capture_evidence(&self, action: &str, outcome: &str) -> Option<PathBuf> {
        let path = self.artifacts.screenshot_file(action, outcome);
        capture_failure_evidence(self.page.as_ref(), &path, &self.logger, &self.evidence).await
    }

    /// Wait up to five seconds for `target` to be visible, then perform `action`
    pub async fn handle_input(
        &self,
        target: impl Into<Target>,
        action: InputAction,
    ) -> WaymarkResult<()> {
        let locator = self.resolve(target);
        self.page
            .wait_for(
                &locator,
                WaitState::Visible,
                Duration::from_millis(INPUT_VISIBLE_TIMEOUT_MS),
            )
            .await?;

        match &action {
            InputAction::Fill(value) => {
                self.page.fill(&locator, value).await?;
                self.logger.debug(format!("Filled {locator} with {value}"));
            }
            InputAction::Click => {
                self.page.click(&locator).await?;
                self.logger.debug(format!("Clicked {locator}"));
            }
            InputAction::Type(text) => {
                self.page.type_text(&locator, text).await?;
                self.logger.debug(format!("Typed {text} into {locator}"));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Highlighting
    // -------------------------------------------------------------------------

    /// Outline the element with `test_id`, optionally screenshot it, then
    /// restore its previous outline.
    ///
    /// Returns the screenshot path when one was written. A test id that
    /// matches nothing only logs a warning.
    pub async fn debug_highlight(
        &self,
        test_id: &str,
        capture: bool,
    ) -> WaymarkResult<Option<PathBuf>> {
        let locator = Locator::test_id(test_id);
        if self.page.element_handle(&locator).await?.is_none() {
            self.logger
                .warn(format!("Element not found for testId: {test_id}"));
            return Ok(None);
        }

        self.page.scroll_into_view(&locator).await?;
        let previous = self.page.style_property(&locator, "outline").await?;
        self.page
            .set_style_property(&locator, "outline", DEBUG_OUTLINE)
            .await?;
        tokio::time::sleep(DEBUG_HIGHLIGHT_PAUSE).await;
        self.logger.info(format!("Highlighted element: {test_id}"));

        let shot = if capture {
            let path = self.artifacts.screenshot_file(test_id, "highlight");
            let shot = best_effort(
                &self.logger,
                "capture element screenshot",
                write_element_screenshot(self.page.as_ref(), &locator, &path),
            )
            .await;
            if let Some(path) = &shot {
                self.logger.debug(format!(
                    "Screenshot captured for: {test_id} -> {}",
                    path.display()
                ));
            }
            shot
        } else {
            None
        };

        self.page
            .set_style_property(&locator, "outline", &previous)
            .await?;
        Ok(shot)
    }

    /// Outline every target once visible (ten seconds each), then take one
    /// full-page screenshot of them together.
    ///
    /// The outlines are left in place. A visibility timeout propagates; a
    /// failed screenshot is logged and yields `None`.
    pub async fn highlight_multiple_and_capture<I, T>(
        &self,
        targets: I,
    ) -> WaymarkResult<Option<PathBuf>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        let locators: Vec<Locator> = targets.into_iter().map(|t| self.resolve(t)).collect();
        for locator in &locators {
            self.page
                .wait_for(
                    locator,
                    WaitState::Visible,
                    Duration::from_millis(HIGHLIGHT_VISIBLE_TIMEOUT_MS),
                )
                .await?;
            if self.page.element_handle(locator).await?.is_none() {
                continue;
            }
            self.page
                .set_style_property(locator, "outline", BATCH_OUTLINE)
                .await?;
        }
        tokio::time::sleep(BATCH_HIGHLIGHT_PAUSE).await;

        let path = self.artifacts.screenshot_file("highlighted all", "capture");
        let shot = best_effort(
            &self.logger,
            "capture highlighted elements",
            write_page_screenshot(self.page.as_ref(), &path),
        )
        .await;
        if let Some(path) = &shot {
            self.logger.info_with(
                "Highlighted elements captured",
                metadata! { "count" => locators.len(), "path" => path.display().to_string() },
            );
        }
        Ok(shot)
    }

    // -------------------------------------------------------------------------
    // Video
    // -------------------------------------------------------------------------

    /// Recording browser, context and page writing into
    /// `videos/<title>-<timestamp>/`
    pub async fn create_video_context(&self, title: &str) -> WaymarkResult<VideoContext> {
        let launcher = self
            .launcher
            .as_ref()
            .ok_or_else(|| WaymarkError::invalid_state("no browser launcher configured"))?;
        let video = RecordVideo::from_config(self.artifacts.video_dir(title), &self.config);
        create_video_context_with(launcher.as_ref(), &self.test_name, video, &self.logger).await
    }

    // -------------------------------------------------------------------------
    // Network
    // -------------------------------------------------------------------------

    /// Start listening for a response now; await it with
    /// [`PendingApiCall::wait`]
    pub fn expect_api_call(
        &self,
        pattern: impl Into<UrlPattern>,
        options: ApiCallOptions,
    ) -> PendingApiCall<'_> {
        let pattern = pattern.into();
        self.logger
            .info(format!("Waiting for API call: {} {pattern}", options.method));
        PendingApiCall {
            service: self,
            events: self.page.subscribe_network(),
            matcher: pattern.compile(),
            pattern,
            options,
        }
    }

    /// Wait for the next response matching `pattern`, method and status
    pub async fn wait_for_api_call(
        &self,
        pattern: impl Into<UrlPattern>,
        options: ApiCallOptions,
    ) -> WaymarkResult<ApiCall> {
        self.expect_api_call(pattern, options).wait().await
    }

    async fn record_api_call(
        &self,
        response: Arc<dyn Response>,
        log_response: bool,
    ) -> ApiCall {
        let body = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                self.logger.warn_with(
                    "Failed to parse API response JSON",
                    metadata! { "url" => response.url(), "error" => err.to_string() },
                );
                Value::Null
            }
        };

        if log_response {
            self.logger.info_with(
                "API Response",
                metadata! {
                    "url" => response.url(),
                    "status" => response.status(),
                    "method" => response.method(),
                    "body" => body.clone(),
                },
            );
        }

        let request_body = response.request_body().map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        });
        best_effort(
            &self.logger,
            "log network call",
            self.network_logger.log_response(response.as_ref(), request_body),
        )
        .await;

        ApiCall { response, body }
    }
}

/// A subscription waiting for one matching response
pub struct PendingApiCall<'a> {
    service: &'a TestService,
    events: broadcast::Receiver<NetworkEvent>,
    pattern: UrlPattern,
    matcher: UrlMatcher,
    options: ApiCallOptions,
}

impl fmt::Debug for PendingApiCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingApiCall")
            .field("pattern", &self.pattern)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PendingApiCall<'_> {
    /// Resolve with the first matching response, or time out
    pub async fn wait(mut self) -> WaymarkResult<ApiCall> {
        let timeout = self.options.timeout;
        let outcome = tokio::time::timeout(timeout, self.next_match()).await;
        let response = outcome.map_err(|_| WaymarkError::Timeout {
            ms: timeout.as_millis() as u64,
            waiting_for: format!("{} {}", self.options.method, self.pattern),
        })??;
        Ok(self
            .service
            .record_api_call(response, self.options.log_response)
            .await)
    }

    async fn next_match(&mut self) -> WaymarkResult<Arc<dyn Response>> {
        loop {
            match self.events.recv().await {
                Ok(NetworkEvent::Response(response))
                    if self.matcher.matches(response.url())
                        && self.options.accepts(response.as_ref()) =>
                {
                    return Ok(response);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "network events dropped while waiting for API call");
                }
                Err(RecvError::Closed) => return Err(WaymarkError::PageClosed),
            }
        }
    }
}

async fn write_element_screenshot(
    page: &dyn PageDriver,
    locator: &Locator,
    path: &Path,
) -> WaymarkResult<PathBuf> {
    let png = page.element_screenshot(locator).await?;
    write_png(path, &png)
}

async fn write_page_screenshot(page: &dyn PageDriver, path: &Path) -> WaymarkResult<PathBuf> {
    let png = page.screenshot(true).await?;
    write_png(path, &png)
}

fn write_png(path: &Path, png: &[u8]) -> WaymarkResult<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, png)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::ElementState;
    use crate::logger::LogEntry;
    use crate::mock::{MockBrowser, MockElement, MockPage, MockResponse};
    use crate::network::HttpMethod;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quiet_config() -> ConfigManager {
        let mut config = ConfigManager::new();
        config.set(keys::EVIDENCE_SETTLE_DELAY_MS, 0);
        config.set(keys::LOGGING_LEVEL, "debug");
        config
    }

    fn form_page() -> Arc<MockPage> {
        let page = MockPage::new();
        page.set_content([
            MockElement::new("form")
                .attr("class", "login")
                .child(MockElement::with_test_id("input", "email").attr("name", "email"))
                .child(MockElement::with_test_id("input", "password").attr("type", "password"))
                .child(MockElement::with_test_id("button", "submit").text("Login")),
            MockElement::with_test_id("span", "hint").text("Forgot password?"),
        ]);
        Arc::new(page)
    }

    fn service_for(page: &Arc<MockPage>, dir: &Path) -> TestService {
        TestService::builder(page.clone(), "Auth", "login flow")
            .with_config(quiet_config())
            .with_output_dir(dir)
            .with_console_output(false)
            .build()
            .unwrap()
    }

    fn screenshots(service: &TestService) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(service.artifacts().screenshots())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn log_entries(service: &TestService) -> Vec<LogEntry> {
        std::fs::read_to_string(service.logger().current_file())
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn test_build_creates_layout() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            let root = dir.path().join("Auth").join("login_flow");
            assert_eq!(service.artifacts().root(), root);
            for sub in service.artifacts().subdirectories() {
                assert!(sub.is_dir(), "{} missing", sub.display());
            }
            assert!(service.network_logger().file().starts_with(root.join("network-calls")));
            assert!(service.logger().current_file().starts_with(root.join("console-logs")));
            assert_eq!(service.browser_name(), "unknown");
        }

        #[test]
        fn test_output_path_from_config() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = quiet_config();
            config.set(
                keys::REPORTING_OUTPUT_PATH,
                dir.path().join("reports").to_string_lossy().to_string(),
            );
            let service = TestService::builder(form_page(), "S", "T")
                .with_config(config)
                .with_launcher(Arc::new(MockBrowser::new()))
                .with_console_output(false)
                .build()
                .unwrap();
            assert!(service.artifacts().root().starts_with(dir.path().join("reports")));
            assert_eq!(service.browser_name(), "mock");
        }
    }

    mod locator_tests {
        use super::*;

        #[test]
        fn test_test_id_root_narrowed_by_options() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            let locator = service.get_locator(
                Some("submit"),
                &LocatorOptions::new().with_state(ElementState::Visible),
            );
            assert_eq!(locator, Locator::test_id("submit").state(ElementState::Visible));
        }

        #[tokio::test]
        async fn test_options_only_start_from_all_elements() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            let locator = service.get_locator(None, &LocatorOptions::new().with_type("password"));
            assert_eq!(locator, Locator::all().attribute("type", "password"));
            assert_eq!(page.count(&locator).await.unwrap(), 1);
        }

        #[test]
        fn test_resolve_targets() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            assert_eq!(service.resolve("email"), Locator::test_id("email"));
            let css = Locator::css("form.login");
            assert_eq!(service.resolve(&css), css);
            assert_eq!(
                service.resolve(LocatorOptions::new().with_name("email")),
                Locator::all().attribute("name", "email")
            );
        }
    }

    mod action_tests {
        use super::*;

        #[tokio::test]
        async fn test_success_leaves_one_success_screenshot() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            let value = service
                .try_catch_handler(
                    || async { Ok::<_, WaymarkError>(42) },
                    ActionOptions::named("Open login"),
                )
                .await
                .unwrap();
            assert_eq!(value, 42);

            let shots = screenshots(&service);
            assert_eq!(shots.len(), 1);
            assert!(shots[0].starts_with("Open_login-success-"));
            assert!(log_entries(&service)
                .iter()
                .any(|e| e.message == "Executing action: Open login"));
        }

        #[tokio::test]
        async fn test_every_attempt_leaves_evidence() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            let calls = AtomicU32::new(0);

            let result = service
                .try_catch_handler(
                    || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n < 2 {
                                Err(WaymarkError::page(format!("flake {n}")))
                            } else {
                                Ok(())
                            }
                        }
                    },
                    ActionOptions::named("submit").with_retry(RetryOptions::new(
                        3,
                        Duration::from_millis(5),
                    )),
                )
                .await;

            assert!(result.is_ok());
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            let shots = screenshots(&service);
            assert_eq!(shots.iter().filter(|s| s.contains("-error-")).count(), 2);
            assert_eq!(shots.iter().filter(|s| s.contains("-success-")).count(), 1);
        }

        #[tokio::test]
        async fn test_last_error_surfaces_after_retries() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            let calls = AtomicU32::new(0);

            let err = service
                .try_catch_handler(
                    || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move { Err::<(), _>(WaymarkError::assertion(format!("attempt {n}"))) }
                    },
                    ActionOptions::named("assert")
                        .with_capture_evidence(false)
                        .with_retry(RetryOptions::new(1, Duration::ZERO)),
                )
                .await
                .unwrap_err();

            assert_eq!(err.to_string(), "Assertion failed: attempt 1");
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(screenshots(&service).is_empty());
            let errors = log_entries(&service)
                .into_iter()
                .filter(|e| e.level == "ERROR")
                .count();
            assert_eq!(errors, 2);
        }

        #[tokio::test]
        async fn test_evidence_failure_does_not_mask_result() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let mut service = service_for(&page, dir.path());
            page.set_network_busy(true);
            service.evidence = service.evidence.with_wait_timeout(Duration::from_millis(20));

            let value = service
                .try_catch_handler(
                    || async { Ok::<_, WaymarkError>("done") },
                    ActionOptions::named("busy"),
                )
                .await
                .unwrap();
            assert_eq!(value, "done");
            assert!(screenshots(&service).is_empty());
        }
    }

    mod input_tests {
        use super::*;

        #[tokio::test]
        async fn test_fill_type_and_click() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            let clicked = Arc::new(AtomicU32::new(0));
            let counter = clicked.clone();
            page.on_click("submit", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            service.handle_input("email", InputAction::fill("a@b")).await.unwrap();
            service
                .handle_input(Locator::test_id("email"), InputAction::type_text(".com"))
                .await
                .unwrap();
            service.handle_input("submit", InputAction::Click).await.unwrap();

            assert_eq!(page.value_of("email").as_deref(), Some("a@b.com"));
            assert_eq!(clicked.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_input_steps_logged_with_default_config() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = TestService::builder(page.clone(), "Auth", "default level")
                .with_output_dir(dir.path())
                .with_console_output(false)
                .build()
                .unwrap();

            service.handle_input("email", InputAction::fill("a@b.com")).await.unwrap();
            service.handle_input("submit", InputAction::Click).await.unwrap();

            let messages: Vec<String> = log_entries(&service)
                .into_iter()
                .filter(|e| e.level == "DEBUG")
                .map(|e| e.message)
                .collect();
            assert!(messages.iter().any(|m| m.starts_with("Filled")), "{messages:?}");
            assert!(messages.iter().any(|m| m.starts_with("Clicked")), "{messages:?}");
        }

        #[tokio::test]
        async fn test_log_level_override_suppresses_input_steps() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = TestService::builder(page.clone(), "Auth", "warn level")
                .with_config(quiet_config())
                .with_output_dir(dir.path())
                .with_console_output(false)
                .with_log_level(LogLevel::Warn)
                .build()
                .unwrap();

            service.handle_input("email", InputAction::fill("a@b.com")).await.unwrap();
            assert!(log_entries(&service).iter().all(|e| e.level != "DEBUG"));
        }

        #[test]
        fn test_parse_action_kinds() {
            assert_eq!(InputAction::parse("fill", Some("x")).unwrap(), InputAction::fill("x"));
            assert_eq!(InputAction::parse("type", None).unwrap(), InputAction::type_text(""));
            assert_eq!(InputAction::parse("click", Some("ignored")).unwrap(), InputAction::Click);
            let err = InputAction::parse("hover", None).unwrap_err();
            assert_eq!(err.to_string(), "Unsupported input action: hover");
        }

        #[tokio::test(start_paused = true)]
        async fn test_hidden_target_times_out_after_five_seconds() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            page.set_visible("email", false);
            let service = service_for(&page, dir.path());

            let err = service
                .handle_input("email", InputAction::fill("x"))
                .await
                .unwrap_err();
            assert!(matches!(err, WaymarkError::Timeout { ms: 5_000, .. }));
            assert_eq!(page.value_of("email").as_deref(), Some(""));
        }
    }

    mod highlight_tests {
        use super::*;

        #[tokio::test]
        async fn test_debug_highlight_restores_outline() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            page.set_style_property(&Locator::test_id("submit"), "outline", "1px dotted blue")
                .await
                .unwrap();

            let shot = service.debug_highlight("submit", true).await.unwrap();
            let shot = shot.unwrap();
            assert!(shot.exists());
            assert!(shot.starts_with(service.artifacts().screenshots()));
            assert_eq!(page.style_of("submit", "outline").as_deref(), Some("1px dotted blue"));
            assert!(page.was_called("scroll:"));
            assert!(page.was_called("element_screenshot:"));
        }

        #[tokio::test]
        async fn test_debug_highlight_without_capture() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            assert!(service.debug_highlight("email", false).await.unwrap().is_none());
            assert_eq!(page.style_of("email", "outline").as_deref(), Some(""));
            assert!(screenshots(&service).is_empty());
        }

        #[tokio::test]
        async fn test_debug_highlight_missing_only_warns() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            assert!(service.debug_highlight("ghost", true).await.unwrap().is_none());
            let warned = log_entries(&service)
                .into_iter()
                .any(|e| e.level == "WARN" && e.message.contains("ghost"));
            assert!(warned);
        }

        #[tokio::test]
        async fn test_highlight_multiple_takes_one_screenshot() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());

            let shot = service
                .highlight_multiple_and_capture(["email", "password", "submit"])
                .await
                .unwrap();
            assert!(shot.unwrap().exists());
            assert_eq!(screenshots(&service).len(), 1);
            for id in ["email", "password", "submit"] {
                assert_eq!(page.style_of(id, "outline").as_deref(), Some(BATCH_OUTLINE));
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_highlight_multiple_hidden_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            page.set_visible("hint", false);
            let service = service_for(&page, dir.path());
            let err = service
                .highlight_multiple_and_capture(vec![Target::from("email"), Target::from("hint")])
                .await
                .unwrap_err();
            assert!(matches!(err, WaymarkError::Timeout { ms: 10_000, .. }));
        }
    }

    mod network_tests {
        use super::*;

        #[tokio::test]
        async fn test_matching_response_is_returned_and_logged() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            let responder = page.clone();
            page.on_click("submit", move |_| {
                responder.emit_response(MockResponse::json(
                    "http://localhost/api/other",
                    "POST",
                    200,
                    &json!({}),
                ));
                responder.emit_response(
                    MockResponse::json(
                        "http://localhost/api/auth/login",
                        "POST",
                        200,
                        &json!({ "token": "t" }),
                    )
                    .with_request_body(r#"{"email":"a@b.com"}"#),
                );
            });

            let pending = service.expect_api_call("/auth/login", ApiCallOptions::post());
            service.handle_input("submit", InputAction::Click).await.unwrap();
            let call = pending.wait().await.unwrap();

            assert_eq!(call.status(), 200);
            assert_eq!(call.body["token"], "t");
            let logged = service.network_logger().entries().await;
            assert_eq!(logged.len(), 1);
            assert_eq!(logged[0].request_body, Some(json!({ "email": "a@b.com" })));
            assert!(log_entries(&service).iter().any(|e| e.message == "API Response"
                && e.metadata["status"] == 200));
        }

        #[tokio::test]
        async fn test_status_and_method_filter() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());

            let pending = service.expect_api_call(
                "/items",
                ApiCallOptions::new().with_status(201).with_method(HttpMethod::Put),
            );
            page.emit_response(MockResponse::new("/items", "PUT", 200, "{}"));
            page.emit_response(MockResponse::new("/items", "GET", 201, "{}"));
            page.emit_response(MockResponse::new("/items", "PUT", 201, "not json"));
            let call = pending.wait().await.unwrap();

            assert_eq!(call.response.method(), "PUT");
            assert_eq!(call.body, Value::Null);
            let warned = log_entries(&service)
                .into_iter()
                .any(|e| e.level == "WARN" && e.message.contains("parse"));
            assert!(warned);
        }

        #[tokio::test]
        async fn test_regex_pattern_and_concurrent_wait() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            let pattern = regex::Regex::new(r"/users/\d+$").unwrap();

            let emitter = async {
                tokio::task::yield_now().await;
                page.emit_response(MockResponse::json("/users/7", "GET", 200, &json!({ "id": 7 })));
            };
            let (call, ()) = tokio::join!(
                service.wait_for_api_call(pattern, ApiCallOptions::new()),
                emitter
            );
            assert_eq!(call.unwrap().body["id"], 7);
        }

        #[tokio::test(start_paused = true)]
        async fn test_no_match_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            let pending = service.expect_api_call("/never", ApiCallOptions::new());
            page.emit_response(MockResponse::new("/other", "GET", 200, "{}"));
            let err = pending.wait().await.unwrap_err();
            assert!(matches!(err, WaymarkError::Timeout { ms: 20_000, .. }));
        }

        #[test]
        fn test_monitor_is_wired() {
            let dir = tempfile::tempdir().unwrap();
            let page = form_page();
            let service = service_for(&page, dir.path());
            page.emit_console("error", "Uncaught TypeError");
            page.emit_response(MockResponse::new("/api/x", "GET", 500, ""));
            assert_eq!(service.console_messages()[0].text, "Uncaught TypeError");
            assert_eq!(service.network_failures()[0].status, Some(500));
        }
    }

    mod video_tests {
        use super::*;

        #[tokio::test]
        async fn test_without_launcher_is_invalid_state() {
            let dir = tempfile::tempdir().unwrap();
            let service = service_for(&form_page(), dir.path());
            let err = service.create_video_context("step").await.unwrap_err();
            assert!(matches!(err, WaymarkError::InvalidState { .. }));
        }

        #[tokio::test]
        async fn test_video_lands_under_artifacts() {
            let dir = tempfile::tempdir().unwrap();
            let launcher = MockBrowser::new();
            let mut config = quiet_config();
            config.set(keys::VIDEO_WIDTH, 32);
            config.set(keys::VIDEO_HEIGHT, 18);
            let service = TestService::builder(form_page(), "Auth", "video")
                .with_config(config)
                .with_output_dir(dir.path())
                .with_launcher(Arc::new(launcher.clone()))
                .with_console_output(false)
                .build()
                .unwrap();

            let mut video = service.create_video_context("checkout").await.unwrap();
            assert!(video.dir().starts_with(service.artifacts().videos()));
            let path = video.cleanup().await.unwrap().unwrap();
            assert!(path.starts_with(service.artifacts().videos()));
            assert_eq!(launcher.running(), 0);
        }
    }
}
