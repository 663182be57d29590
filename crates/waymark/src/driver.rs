//! Driver seams: the page, response and browser abstractions the harness
//! orchestrates.
//!
//! ```text
//! BrowserLauncher ──launch──▶ BrowserHandle ──new_context──▶ BrowserContextHandle
//!                                                                  │
//!                                                              new_page
//!                                                                  ▼
//!                                                            PageDriver ──▶ NetworkEvent / ConsoleMessage
//! ```
//!
//! Two implementations exist: the in-memory [`crate::mock`] driver and the
//! CDP driver in `crate::browser` (feature `browser`).

use crate::artifacts::iso_timestamp;
use crate::locator::{BoundingBox, Locator};
use crate::result::{WaymarkError, WaymarkResult};
use crate::wait::{LoadState, WaitState, DEFAULT_POLL_INTERVAL_MS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Buffer of each live event subscription
pub const EVENT_CAPACITY: usize = 256;

/// Element handle for DOM interactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Driver-assigned identifier
    pub id: String,
    /// Element tag name
    pub tag_name: String,
    /// Element text content
    pub text_content: Option<String>,
    /// Bounding box if visible
    pub bounding_box: Option<BoundingBox>,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
            text_content: None,
            bounding_box: None,
        }
    }

    /// Check if element is visible
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.bounding_box.is_some()
    }
}

/// Browser console message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    /// Message type (`log`, `error`, `warning`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Message text
    pub text: String,
    /// ISO-8601 time the message was observed
    pub timestamp: String,
}

impl ConsoleMessage {
    /// Message observed now
    #[must_use]
    pub fn now(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
            timestamp: crate::artifacts::iso_timestamp(),
        }
    }
}

/// HTTP response observed on a page
#[async_trait]
pub trait Response: Send + Sync + fmt::Debug {
    /// Response URL
    fn url(&self) -> &str;

    /// Method of the originating request
    fn method(&self) -> &str;

    /// HTTP status code
    fn status(&self) -> u16;

    /// Body of the originating request, if it had one
    fn request_body(&self) -> Option<&str> {
        None
    }

    /// Raw response body; may be called repeatedly
    async fn body(&self) -> WaymarkResult<Vec<u8>>;

    /// Body decoded as UTF-8 (lossy)
    async fn text(&self) -> WaymarkResult<String> {
        let body = self.body().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Body parsed as JSON
    async fn json(&self) -> WaymarkResult<serde_json::Value> {
        let body = self.body().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Network activity surfaced by a page
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A response arrived
    Response(Arc<dyn Response>),
    /// A request failed before any response
    RequestFailed {
        /// Request URL
        url: String,
        /// Request method
        method: String,
        /// Transport error text
        error: String,
    },
}

/// An event together with the time it was emitted
#[derive(Debug, Clone)]
pub struct Observed<E> {
    /// ISO-8601 emission time
    pub at: String,
    /// The event
    pub event: E,
}

/// Fan-out point for one kind of page event.
///
/// Live subscribers get a bounded broadcast receiver and may lag. Recorders
/// get every event from the moment they attach, stamped at emission, in an
/// unbounded queue that needs no runtime to fill or drain.
pub struct EventHub<E> {
    live: broadcast::Sender<E>,
    recorders: Mutex<Vec<mpsc::UnboundedSender<Observed<E>>>>,
}

impl<E> fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.live.receiver_count())
            .finish_non_exhaustive()
    }
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventHub<E> {
    /// Hub with [`EVENT_CAPACITY`] slots per live subscriber
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            live,
            recorders: Mutex::new(Vec::new()),
        }
    }

    /// Deliver `event` to recorders and live subscribers
    pub fn send(&self, event: E) {
        {
            let mut recorders = self.recorders.lock().unwrap_or_else(PoisonError::into_inner);
            if !recorders.is_empty() {
                let at = iso_timestamp();
                recorders.retain(|tx| {
                    tx.send(Observed {
                        at: at.clone(),
                        event: event.clone(),
                    })
                    .is_ok()
                });
            }
        }
        let _ = self.live.send(event);
    }

    /// Bounded receiver of events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.live.subscribe()
    }

    /// Lossless receiver of stamped events from now on
    #[must_use]
    pub fn record(&self) -> mpsc::UnboundedReceiver<Observed<E>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.recorders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

/// One page of the browser under test
///
/// Element actions are strict: the locator must resolve to exactly one
/// element. Zero matches fail with [`WaymarkError::ElementNotFound`] and more
/// than one with [`WaymarkError::StrictModeViolation`].
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to `url`
    async fn goto(&self, url: &str) -> WaymarkResult<()>;

    /// Current URL
    async fn url(&self) -> WaymarkResult<String>;

    /// Document title
    async fn title(&self) -> WaymarkResult<String>;

    /// Wait until the page reaches `state`, bounded by `timeout`
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> WaymarkResult<()>;

    /// PNG screenshot of the viewport, or of the whole page when `full_page`
    async fn screenshot(&self, full_page: bool) -> WaymarkResult<Vec<u8>>;

    /// Resolve `locator` against the live document, in document order
    async fn query_all(&self, locator: &Locator) -> WaymarkResult<Vec<ElementHandle>>;

    /// Replace the element's value
    async fn fill(&self, locator: &Locator, value: &str) -> WaymarkResult<()>;

    /// Click the element
    async fn click(&self, locator: &Locator) -> WaymarkResult<()>;

    /// Type into the element key by key
    async fn type_text(&self, locator: &Locator, text: &str) -> WaymarkResult<()>;

    /// Scroll the element to the centre of the viewport
    async fn scroll_into_view(&self, locator: &Locator) -> WaymarkResult<()>;

    /// Inline style property of the element (empty when unset)
    async fn style_property(&self, locator: &Locator, property: &str) -> WaymarkResult<String>;

    /// Set an inline style property; an empty value removes it
    async fn set_style_property(
        &self,
        locator: &Locator,
        property: &str,
        value: &str,
    ) -> WaymarkResult<()>;

    /// PNG screenshot of just the element
    async fn element_screenshot(&self, locator: &Locator) -> WaymarkResult<Vec<u8>>;

    /// Network events of this page
    fn network_events(&self) -> &EventHub<NetworkEvent>;

    /// Console messages of this page
    fn console_events(&self) -> &EventHub<ConsoleMessage>;

    /// Where this page's video is written, if its context records one
    async fn video_path(&self) -> WaymarkResult<Option<PathBuf>>;

    /// Close the page
    async fn close(&self) -> WaymarkResult<()>;

    /// Receive network events from now on
    fn subscribe_network(&self) -> broadcast::Receiver<NetworkEvent> {
        self.network_events().subscribe()
    }

    /// Receive console messages from now on
    fn subscribe_console(&self) -> broadcast::Receiver<ConsoleMessage> {
        self.console_events().subscribe()
    }

    /// Number of elements `locator` currently resolves to
    async fn count(&self, locator: &Locator) -> WaymarkResult<usize> {
        Ok(self.query_all(locator).await?.len())
    }

    /// The single element `locator` resolves to, `None` when nothing matches
    async fn element_handle(&self, locator: &Locator) -> WaymarkResult<Option<ElementHandle>> {
        let mut handles = self.query_all(locator).await?;
        match handles.len() {
            0 => Ok(None),
            1 => Ok(handles.pop()),
            count => Err(WaymarkError::StrictModeViolation {
                locator: locator.to_string(),
                count,
            }),
        }
    }

    /// Poll until `locator` reaches `state`, failing with a timeout error
    async fn wait_for(
        &self,
        locator: &Locator,
        state: WaitState,
        timeout: Duration,
    ) -> WaymarkResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let handles = self.query_all(locator).await?;
            let reached = match state {
                WaitState::Attached => !handles.is_empty(),
                WaitState::Detached => handles.is_empty(),
                WaitState::Visible => handles.iter().any(ElementHandle::is_visible),
                WaitState::Hidden => !handles.iter().any(ElementHandle::is_visible),
            };
            if reached {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaymarkError::Timeout {
                    ms: timeout.as_millis() as u64,
                    waiting_for: format!("{locator} to be {state}"),
                });
            }
            tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
        }
    }
}

/// Exactly one handle, or the strict-mode error for `locator`
pub fn single_match(
    locator: &Locator,
    mut handles: Vec<ElementHandle>,
) -> WaymarkResult<ElementHandle> {
    match handles.len() {
        0 => Err(WaymarkError::ElementNotFound {
            locator: locator.to_string(),
        }),
        1 => handles.pop().ok_or_else(|| WaymarkError::ElementNotFound {
            locator: locator.to_string(),
        }),
        count => Err(WaymarkError::StrictModeViolation {
            locator: locator.to_string(),
            count,
        }),
    }
}

// =============================================================================
// BROWSER LIFECYCLE
// =============================================================================

/// Video recording settings for a new context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordVideo {
    /// Directory the video file is written to
    pub dir: PathBuf,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frames captured per second
    pub fps: u32,
}

impl RecordVideo {
    /// Record at the default 1280x720, 5 fps into `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            width: 1280,
            height: 720,
            fps: 5,
        }
    }

    /// Size and rate from `video.width`, `video.height` and `video.fps`
    #[must_use]
    pub fn from_config(dir: impl Into<PathBuf>, config: &crate::config::ConfigManager) -> Self {
        use crate::config::keys;
        let defaults = Self::new(dir);
        Self {
            width: config.get(keys::VIDEO_WIDTH, defaults.width),
            height: config.get(keys::VIDEO_HEIGHT, defaults.height),
            fps: config.get(keys::VIDEO_FPS, defaults.fps).max(1),
            ..defaults
        }
    }

    /// Set the frame size
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the capture rate
    #[must_use]
    pub const fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Time between frames; never zero, at most one frame per millisecond
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.fps.max(1)).max(Duration::from_millis(1))
    }
}

/// Options for a new browsing context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOptions {
    /// Record a video of every page in the context
    pub record_video: Option<RecordVideo>,
}

/// Starts browser instances
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a fresh browser
    async fn launch(&self) -> WaymarkResult<Box<dyn BrowserHandle>>;

    /// Engine name (`chromium`, `mock`, ...)
    fn name(&self) -> &str;
}

/// A running browser instance
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open an isolated browsing context
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> WaymarkResult<Box<dyn BrowserContextHandle>>;

    /// Whether the browser process is still running
    fn is_connected(&self) -> bool;

    /// Shut the browser down
    async fn close(&self) -> WaymarkResult<()>;
}

/// An isolated browsing context
#[async_trait]
pub trait BrowserContextHandle: Send + Sync {
    /// Open a page in this context
    async fn new_page(&self) -> WaymarkResult<Arc<dyn PageDriver>>;

    /// Close the context; pending video files are flushed before this returns
    async fn close(&self) -> WaymarkResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_visibility() {
        let mut handle = ElementHandle::new("e1", "button");
        assert!(!handle.is_visible());
        handle.bounding_box = Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert!(handle.is_visible());
    }

    #[test]
    fn test_single_match() {
        let locator = Locator::test_id("submit");
        let one = vec![ElementHandle::new("e1", "button")];
        assert_eq!(single_match(&locator, one).unwrap().id, "e1");

        let none = single_match(&locator, Vec::new()).unwrap_err();
        assert!(matches!(none, WaymarkError::ElementNotFound { .. }));

        let two = vec![
            ElementHandle::new("e1", "button"),
            ElementHandle::new("e2", "button"),
        ];
        let err = single_match(&locator, two).unwrap_err();
        assert!(matches!(err, WaymarkError::StrictModeViolation { count: 2, .. }));
    }

    #[test]
    fn test_console_message_serializes_type() {
        let msg = ConsoleMessage {
            kind: "error".to_string(),
            text: "boom".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
    }

    #[test]
    fn test_record_video_defaults() {
        let video = RecordVideo::new("/tmp/v");
        assert_eq!((video.width, video.height), (1280, 720));
        assert_eq!(video.fps, 5);
        assert_eq!(video.with_size(640, 480).width, 640);
    }

    #[test]
    fn test_record_video_from_config() {
        let mut config = crate::config::ConfigManager::new();
        config.set(crate::config::keys::VIDEO_FPS, 0);
        config.set(crate::config::keys::VIDEO_WIDTH, 800);
        let video = RecordVideo::from_config("/tmp/v", &config);
        assert_eq!((video.width, video.height, video.fps), (800, 720, 1));
    }

    #[test]
    fn test_frame_interval_never_zero() {
        let video = RecordVideo::new("/tmp/v");
        assert_eq!(video.frame_interval(), Duration::from_millis(200));
        assert_eq!(video.clone().with_fps(0).frame_interval(), Duration::from_secs(1));
        assert_eq!(video.clone().with_fps(2000).frame_interval(), Duration::from_millis(1));
        assert_eq!(video.with_fps(u32::MAX).frame_interval(), Duration::from_millis(1));
    }
}
