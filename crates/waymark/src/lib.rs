//! Waymark: browser test orchestration with evidence.
//!
//! Waymark wraps a browser page in a [`TestService`] that every test step goes
//! through. Steps are retried, screenshotted on success and failure, logged
//! as JSON lines, and their API traffic is written to a per-test network log.
//! All artifacts of one test case land under a single directory:
//!
//! ```text
//! <outputPath>/<suite>/<case>/
//!     console-logs/   app-log-<date>.log
//!     screenshots/    <action>-<outcome>-<timestamp>.png
//!     videos/         <title>-<timestamp>/<uuid>.mjpeg
//!     network-calls/  network-logs-<timestamp>.json
//! ```
//!
//! The browser is reached through the traits in [`driver`]. The in-memory
//! [`mock`] driver needs no browser; the Chromium driver lives in `browser`
//! behind the `browser` feature.
//!
//! ## Example
//!
//! ```rust,ignore
//! use waymark::prelude::*;
//!
//! let page = Arc::new(MockPage::new());
//! let service = TestService::builder(page, "Auth", "login").build()?;
//! service.handle_input("email", InputAction::fill("a@b.com")).await?;
//! let call = service
//!     .wait_for_api_call("/api/auth/login", ApiCallOptions::post())
//!     .await?;
//! assert_eq!(call.response.status(), 200);
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_frames))]

pub mod artifacts;
#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod driver;
pub mod evidence;
pub mod locator;
pub mod logger;
pub mod mock;
pub mod monitor;
pub mod network;
pub mod network_logger;
mod result;
pub mod retry;
pub mod service;
pub mod video;
pub mod wait;

pub use artifacts::ArtifactPaths;
#[cfg(feature = "browser")]
pub use browser::{ChromiumLauncher, ChromiumPage};
pub use config::{keys, merge_configs, ConfigManager};
pub use driver::{
    BrowserContextHandle, BrowserHandle, BrowserLauncher, ConsoleMessage, ContextOptions,
    ElementHandle, EventHub, NetworkEvent, Observed, PageDriver, RecordVideo, Response,
};
pub use evidence::{capture_failure_evidence, capture_screenshot, EvidenceOptions};
pub use locator::{BoundingBox, ElementState, Locator, LocatorOptions, Relation, TextMatch};
pub use logger::{LogEntry, LogLevel, Logger, LoggerOptions, Metadata};
pub use monitor::{NetworkFailure, PageMonitor};
pub use network::{ApiCall, ApiCallOptions, HttpMethod, UrlPattern};
pub use network_logger::{NetworkLogEntry, NetworkLogger};
pub use result::{WaymarkError, WaymarkResult};
pub use retry::{retry, RetryOptions};
pub use service::{
    ActionOptions, InputAction, PendingApiCall, Target, TestService, TestServiceBuilder,
};
pub use video::{create_video_context, FrameRecorder, VideoContext};
pub use wait::{LoadState, WaitState};

/// Everything a test file usually needs
pub mod prelude {
    pub use super::driver::{BrowserLauncher, PageDriver, Response};
    pub use super::mock::{MockBrowser, MockElement, MockPage, MockResponse};
    pub use super::{
        ActionOptions, ApiCallOptions, ConfigManager, InputAction, LoadState, Locator,
        LocatorOptions, Logger, RetryOptions, TestService, UrlPattern, WaymarkError,
        WaymarkResult,
    };
    pub use std::sync::Arc;
}
