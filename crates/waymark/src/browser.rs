//! Chromium driver over the DevTools protocol (feature `browser`).
//!
//! Locators are compiled to JavaScript with [`Locator::to_js`] and resolved
//! inside the page. Element actions first tag the single matching element
//! with a `data-waymark-ref` attribute and then address it by that
//! attribute, so strictness is checked in the same evaluation that picks
//! the element.
//!
//! Network events are assembled from `requestWillBeSent`,
//! `responseReceived`, `loadingFinished` and `loadingFailed`; a response is
//! published once its body is available. The same events drive the
//! in-flight counter behind network-idle waits.

use crate::config::{keys, ConfigManager};
use crate::driver::{
    BrowserContextHandle, BrowserHandle, BrowserLauncher, ConsoleMessage, ContextOptions,
    ElementHandle, EventHub, NetworkEvent, PageDriver, Response,
};
use crate::locator::{BoundingBox, Locator};
use crate::result::{WaymarkError, WaymarkResult};
use crate::video::{video_file_path, FrameRecorder};
use crate::wait::{LoadState, DEFAULT_POLL_INTERVAL_MS, NETWORK_IDLE_THRESHOLD_MS};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetRequestPostDataParams, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::{
    BrowserContextId, CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Attribute used to address the element an action resolved to
pub const REF_ATTRIBUTE: &str = "data-waymark-ref";


fn page_error(e: impl std::fmt::Display) -> WaymarkError {
    WaymarkError::page(e.to_string())
}

// =============================================================================
// LAUNCHER
// =============================================================================

/// Launches Chromium through chromiumoxide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromiumLauncher {
    headless: bool,
    window: (u32, u32),
    sandbox: bool,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self {
            headless: true,
            window: (1280, 720),
            sandbox: true,
        }
    }
}

impl ChromiumLauncher {
    /// Headless 1280x720 launcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `browser.headless` and the video size from `config`
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        Self {
            headless: config.get(keys::BROWSER_HEADLESS, true),
            window: (
                config.get(keys::VIDEO_WIDTH, 1280),
                config.get(keys::VIDEO_HEIGHT, 720),
            ),
            sandbox: true,
        }
    }

    /// Show the browser window
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Disable the Chromium sandbox (containers, CI)
    #[must_use]
    pub const fn without_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> WaymarkResult<Box<dyn BrowserHandle>> {
        let mut builder = BrowserConfig::builder().window_size(self.window.0, self.window.1);
        if !self.headless {
            builder = builder.with_head();
        }
        if !self.sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder
            .build()
            .map_err(|message| WaymarkError::BrowserLaunch { message })?;

        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| WaymarkError::BrowserLaunch {
                    message: e.to_string(),
                })?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::debug!("CDP handler loop ended");
                    break;
                }
            }
        });
        tracing::info!(headless = self.headless, "chromium launched");

        Ok(Box::new(ChromiumBrowser {
            browser: Arc::new(Mutex::new(browser)),
            handler: handle,
            connected: AtomicBool::new(true),
        }))
    }

    fn name(&self) -> &str {
        "chromium"
    }
}

// =============================================================================
// BROWSER AND CONTEXT
// =============================================================================

#[derive(Debug)]
struct ChromiumBrowser {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
    connected: AtomicBool,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> WaymarkResult<Box<dyn BrowserContextHandle>> {
        if !self.is_connected() {
            return Err(WaymarkError::invalid_state("browser is closed"));
        }
        let id = self
            .browser
            .lock()
            .await
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(page_error)?
            .result
            .browser_context_id;

        Ok(Box::new(ChromiumContext {
            browser: Arc::clone(&self.browser),
            id,
            options,
            pages: StdMutex::new(Vec::new()),
            recorders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> WaymarkResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.browser.lock().await.close().await;
        self.handler.abort();
        result.map_err(|e| WaymarkError::BrowserLaunch {
            message: format!("close failed: {e}"),
        })?;
        tracing::info!("chromium closed");
        Ok(())
    }
}

#[derive(Debug)]
struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    id: BrowserContextId,
    options: ContextOptions,
    pages: StdMutex<Vec<Arc<ChromiumPage>>>,
    recorders: Mutex<Vec<FrameRecorder>>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContextHandle for ChromiumContext {
    async fn new_page(&self) -> WaymarkResult<Arc<dyn PageDriver>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WaymarkError::invalid_state("context is closed"));
        }
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(WaymarkError::page)?;
        let page = self
            .browser
            .lock()
            .await
            .new_page(params)
            .await
            .map_err(page_error)?;

        let video = self.options.record_video.clone();
        let video_path = video.as_ref().map(|v| video_file_path(&v.dir));
        let page = Arc::new(ChromiumPage::attach(page, video_path.clone()).await?);

        if let (Some(video), Some(path)) = (video, video_path) {
            let recorder = FrameRecorder::start(page.clone(), path, &video).await?;
            self.recorders.lock().await.push(recorder);
        }
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&page));
        Ok(page)
    }

    async fn close(&self) -> WaymarkResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let recorders = std::mem::take(&mut *self.recorders.lock().await);
        for recorder in recorders {
            recorder.stop().await?;
        }
        let pages = std::mem::take(&mut *self.pages.lock().unwrap_or_else(PoisonError::into_inner));
        for page in pages {
            page.close().await?;
        }
        self.browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(self.id.clone()))
            .await
            .map_err(page_error)?;
        Ok(())
    }
}

// =============================================================================
// NETWORK TRACKING
// =============================================================================

#[derive(Debug)]
struct InFlight {
    url: String,
    method: String,
    status: Option<u16>,
}

#[derive(Debug)]
struct NetworkTracker {
    in_flight: AtomicUsize,
    last_change: StdMutex<Instant>,
}

impl NetworkTracker {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            last_change: StdMutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_change.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    fn finished(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.touch();
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
            && self
                .last_change
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed()
                >= Duration::from_millis(NETWORK_IDLE_THRESHOLD_MS)
    }
}

/// Response whose body is fetched from the browser on demand
#[derive(Debug)]
struct ChromiumResponse {
    page: Page,
    request_id: RequestId,
    url: String,
    method: String,
    status: u16,
    request_body: Option<String>,
}

#[async_trait]
impl Response for ChromiumResponse {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn request_body(&self) -> Option<&str> {
        self.request_body.as_deref()
    }

    async fn body(&self) -> WaymarkResult<Vec<u8>> {
        let body = self
            .page
            .execute(GetResponseBodyParams::new(self.request_id.clone()))
            .await
            .map_err(page_error)?
            .result;
        decode_body(&body.body, body.base64_encoded)
    }
}

fn decode_body(body: &str, base64_encoded: bool) -> WaymarkResult<Vec<u8>> {
    if base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(page_error)
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

async fn track_network(
    page: Page,
    tracker: Arc<NetworkTracker>,
    events: Arc<EventHub<NetworkEvent>>,
) -> WaymarkResult<()> {
    let mut sent = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(page_error)?;
    let mut received = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(page_error)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(page_error)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(page_error)?;

    let mut requests: HashMap<RequestId, InFlight> = HashMap::new();
    loop {
        // handler order is request, response, finished; polling in that
        // order keeps a response ahead of its own completion
        tokio::select! {
            biased;
            Some(event) = sent.next() => {
                let known = requests.insert(event.request_id.clone(), InFlight {
                    url: event.request.url.clone(),
                    method: event.request.method.clone(),
                    status: None,
                });
                if known.is_none() {
                    tracker.started();
                }
            }
            Some(event) = received.next() => {
                if let Some(request) = requests.get_mut(&event.request_id) {
                    request.url.clone_from(&event.response.url);
                    request.status = u16::try_from(event.response.status).ok();
                }
            }
            Some(event) = finished.next() => {
                let Some(request) = requests.remove(&event.request_id) else { continue };
                tracker.finished();
                let Some(status) = request.status else { continue };
                let request_body = if request.method.eq_ignore_ascii_case("GET") {
                    None
                } else {
                    page.execute(GetRequestPostDataParams::new(event.request_id.clone()))
                        .await
                        .ok()
                        .map(|r| r.result.post_data)
                };
                let response = ChromiumResponse {
                    page: page.clone(),
                    request_id: event.request_id.clone(),
                    url: request.url,
                    method: request.method,
                    status,
                    request_body,
                };
                events.send(NetworkEvent::Response(Arc::new(response)));
            }
            Some(event) = failed.next() => {
                let Some(request) = requests.remove(&event.request_id) else { continue };
                tracker.finished();
                events.send(NetworkEvent::RequestFailed {
                    url: request.url,
                    method: request.method,
                    error: event.error_text.clone(),
                });
            }
            else => break,
        }
    }
    Ok(())
}

async fn forward_console(page: Page, events: Arc<EventHub<ConsoleMessage>>) -> WaymarkResult<()> {
    let mut calls = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(page_error)?;
    while let Some(event) = calls.next().await {
        let text = event
            .args
            .iter()
            .map(|arg| match (&arg.value, &arg.description) {
                (Some(serde_json::Value::String(s)), _) => s.clone(),
                (Some(value), _) => value.to_string(),
                (None, Some(description)) => description.clone(),
                (None, None) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let kind = format!("{:?}", event.r#type).to_lowercase();
        events.send(ConsoleMessage::now(kind, text));
    }
    Ok(())
}

// =============================================================================
// PAGE
// =============================================================================

#[derive(Debug, Deserialize)]
struct DescribedElement {
    tag: String,
    text: String,
    visible: bool,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

/// A Chromium tab implementing [`PageDriver`]
#[derive(Debug)]
pub struct ChromiumPage {
    page: Page,
    tracker: Arc<NetworkTracker>,
    network: Arc<EventHub<NetworkEvent>>,
    console: Arc<EventHub<ConsoleMessage>>,
    tasks: Vec<JoinHandle<()>>,
    video_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl ChromiumPage {
    /// Enable network events on `page` and start forwarding them
    pub async fn attach(page: Page, video_path: Option<PathBuf>) -> WaymarkResult<Self> {
        page.execute(EnableParams::default())
            .await
            .map_err(page_error)?;

        let tracker = Arc::new(NetworkTracker::new());
        let network = Arc::new(EventHub::new());
        let console = Arc::new(EventHub::new());

        let network_task = tokio::spawn({
            let (page, tracker, network) = (page.clone(), tracker.clone(), network.clone());
            async move {
                if let Err(err) = track_network(page, tracker, network).await {
                    tracing::warn!(error = %err, "network tracking stopped");
                }
            }
        });
        let console_task = tokio::spawn({
            let (page, console) = (page.clone(), console.clone());
            async move {
                if let Err(err) = forward_console(page, console).await {
                    tracing::warn!(error = %err, "console forwarding stopped");
                }
            }
        });

        Ok(Self {
            page,
            tracker,
            network,
            console,
            tasks: vec![network_task, console_task],
            video_path,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> WaymarkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WaymarkError::PageClosed);
        }
        Ok(())
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> WaymarkResult<T> {
        self.ensure_open()?;
        self.page
            .evaluate(script)
            .await
            .map_err(page_error)?
            .into_value()
            .map_err(page_error)
    }

    /// Tag the single element `locator` resolves to and return a CSS
    /// selector addressing it
    async fn tag(&self, locator: &Locator) -> WaymarkResult<String> {
        let reference = uuid::Uuid::new_v4().to_string();
        let count: usize = self.eval(tag_script(locator, &reference)).await?;
        match count {
            0 => Err(WaymarkError::ElementNotFound {
                locator: locator.to_string(),
            }),
            1 => Ok(format!("[{REF_ATTRIBUTE}=\"{reference}\"]")),
            count => Err(WaymarkError::StrictModeViolation {
                locator: locator.to_string(),
                count,
            }),
        }
    }

    /// Run `body` with `el` bound to the element `locator` resolves to
    async fn with_element<T: serde::de::DeserializeOwned>(
        &self,
        locator: &Locator,
        body: &str,
    ) -> WaymarkResult<T> {
        let selector = self.tag(locator).await?;
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); {body} }})()",
            js_str(&selector)
        ))
        .await
    }
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn tag_script(locator: &Locator, reference: &str) -> String {
    format!(
        "(() => {{\n\
         const els = {};\n\
         if (els.length !== 1) return els.length;\n\
         document.querySelectorAll('[{REF_ATTRIBUTE}]').forEach(e => e.removeAttribute('{REF_ATTRIBUTE}'));\n\
         els[0].setAttribute('{REF_ATTRIBUTE}', {});\n\
         return 1;\n\
         }})()",
        locator.to_js(),
        js_str(reference)
    )
}

fn describe_script(locator: &Locator) -> String {
    format!(
        "(() => {}.map(el => {{\n\
         const r = el.getBoundingClientRect();\n\
         const st = getComputedStyle(el);\n\
         return {{ tag: el.tagName.toLowerCase(), text: (el.textContent || '').trim(), \
         visible: r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none', \
         x: r.x, y: r.y, width: r.width, height: r.height }};\n\
         }}))()",
        locator.to_js()
    )
}

const FILL_BODY: &str = "const proto = Object.getPrototypeOf(el); \
    const desc = Object.getOwnPropertyDescriptor(proto, 'value'); \
    el.focus(); \
    if (desc && desc.set) { desc.set.call(el, VALUE); } else { el.value = VALUE; } \
    el.dispatchEvent(new Event('input', { bubbles: true })); \
    el.dispatchEvent(new Event('change', { bubbles: true })); \
    return true;";

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str) -> WaymarkResult<()> {
        self.ensure_open()?;
        self.page
            .goto(url)
            .await
            .map_err(|e| WaymarkError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn url(&self) -> WaymarkResult<String> {
        self.ensure_open()?;
        Ok(self.page.url().await.map_err(page_error)?.unwrap_or_default())
    }

    async fn title(&self) -> WaymarkResult<String> {
        self.ensure_open()?;
        Ok(self
            .page
            .get_title()
            .await
            .map_err(page_error)?
            .unwrap_or_default())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> WaymarkResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reached = match state {
                LoadState::Load => {
                    self.eval::<bool>("document.readyState === 'complete'".to_string())
                        .await?
                }
                LoadState::DomContentLoaded => {
                    self.eval::<bool>("document.readyState !== 'loading'".to_string())
                        .await?
                }
                LoadState::NetworkIdle => {
                    self.ensure_open()?;
                    self.tracker.is_idle()
                }
            };
            if reached {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaymarkError::Timeout {
                    ms: timeout.as_millis() as u64,
                    waiting_for: state.to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
        }
    }

    async fn screenshot(&self, full_page: bool) -> WaymarkResult<Vec<u8>> {
        self.ensure_open()?;
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(full_page)
                    .build(),
            )
            .await
            .map_err(|e| WaymarkError::Screenshot {
                message: e.to_string(),
            })
    }

    async fn query_all(&self, locator: &Locator) -> WaymarkResult<Vec<ElementHandle>> {
        let described: Vec<DescribedElement> = self.eval(describe_script(locator)).await?;
        Ok(described
            .into_iter()
            .enumerate()
            .map(|(i, el)| {
                let mut handle = ElementHandle::new(format!("cdp-{i}"), el.tag);
                handle.text_content = Some(el.text);
                if el.visible {
                    handle.bounding_box = Some(BoundingBox::new(el.x, el.y, el.width, el.height));
                }
                handle
            })
            .collect())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> WaymarkResult<()> {
        let body = FILL_BODY.replace("VALUE", &js_str(value));
        let _: bool = self.with_element(locator, &body).await?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> WaymarkResult<()> {
        let selector = self.tag(locator).await?;
        let element = self.page.find_element(selector).await.map_err(page_error)?;
        element.click().await.map_err(|e| WaymarkError::Input {
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> WaymarkResult<()> {
        let selector = self.tag(locator).await?;
        let element = self.page.find_element(selector).await.map_err(page_error)?;
        element
            .click()
            .await
            .map_err(|e| WaymarkError::Input {
                message: e.to_string(),
            })?
            .type_str(text)
            .await
            .map_err(|e| WaymarkError::Input {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn scroll_into_view(&self, locator: &Locator) -> WaymarkResult<()> {
        let _: bool = self
            .with_element(
                locator,
                "el.scrollIntoView({ behavior: 'auto', block: 'center', inline: 'center' }); return true;",
            )
            .await?;
        Ok(())
    }

    async fn style_property(&self, locator: &Locator, property: &str) -> WaymarkResult<String> {
        self.with_element(
            locator,
            &format!("return el.style.getPropertyValue({});", js_str(property)),
        )
        .await
    }

    async fn set_style_property(
        &self,
        locator: &Locator,
        property: &str,
        value: &str,
    ) -> WaymarkResult<()> {
        let body = if value.is_empty() {
            format!("el.style.removeProperty({}); return true;", js_str(property))
        } else {
            format!(
                "el.style.setProperty({}, {}); return true;",
                js_str(property),
                js_str(value)
            )
        };
        let _: bool = self.with_element(locator, &body).await?;
        Ok(())
    }

    async fn element_screenshot(&self, locator: &Locator) -> WaymarkResult<Vec<u8>> {
        let selector = self.tag(locator).await?;
        let element = self.page.find_element(selector).await.map_err(page_error)?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| WaymarkError::Screenshot {
                message: e.to_string(),
            })
    }

    fn network_events(&self) -> &EventHub<NetworkEvent> {
        &self.network
    }

    fn console_events(&self) -> &EventHub<ConsoleMessage> {
        &self.console
    }

    async fn video_path(&self) -> WaymarkResult<Option<PathBuf>> {
        Ok(self.video_path.clone())
    }

    async fn close(&self) -> WaymarkResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for task in &self.tasks {
            task.abort();
        }
        self.page.clone().close().await.map_err(page_error)
    }
}
