//! In-memory page.

use super::dom::{MockDom, MockElement};
use crate::driver::{
    single_match, ConsoleMessage, ElementHandle, EventHub, NetworkEvent, PageDriver, Response,
};
use crate::locator::{Locator, TEST_ID_ATTRIBUTE};
use crate::result::{WaymarkError, WaymarkResult};
use crate::wait::LoadState;
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Viewport size of mock screenshots
pub const MOCK_VIEWPORT: (u32, u32) = (320, 180);

/// Callback run after an element with a given test id is clicked
pub type ClickHook = Arc<dyn Fn(&MockPage) + Send + Sync>;

/// Canned HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    url: String,
    method: String,
    status: u16,
    body: Vec<u8>,
    request_body: Option<String>,
}

impl MockResponse {
    /// Response with a raw body
    #[must_use]
    pub fn new(url: impl Into<String>, method: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            method: method.into().to_uppercase(),
            status,
            body: body.into(),
            request_body: None,
        }
    }

    /// Response with a JSON body
    #[must_use]
    pub fn json(
        url: impl Into<String>,
        method: impl Into<String>,
        status: u16,
        body: &serde_json::Value,
    ) -> Self {
        Self::new(url, method, status, body.to_string())
    }

    /// Attach the originating request's body
    #[must_use]
    pub fn with_request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = Some(body.into());
        self
    }
}

#[async_trait]
impl Response for MockResponse {
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
        Ok(self.body.clone())
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    title: String,
    dom: MockDom,
    closed: bool,
    network_busy: bool,
    history: Vec<String>,
}

/// Page backed by a [`MockDom`]
pub struct MockPage {
    state: Mutex<PageState>,
    hooks: Mutex<HashMap<String, ClickHook>>,
    network: EventHub<NetworkEvent>,
    console: EventHub<ConsoleMessage>,
    video_path: Option<PathBuf>,
}

impl fmt::Debug for MockPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPage")
            .field("url", &self.lock().url)
            .field("video_path", &self.video_path)
            .finish_non_exhaustive()
    }
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPage {
    /// Blank page at `about:blank`
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                ..PageState::default()
            }),
            hooks: Mutex::new(HashMap::new()),
            network: EventHub::new(),
            console: EventHub::new(),
            video_path: None,
        }
    }

    /// Page whose context records video to `path`
    #[must_use]
    pub fn with_video_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.video_path = Some(path.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn open(&self) -> WaymarkResult<MutexGuard<'_, PageState>> {
        let state = self.lock();
        if state.closed {
            return Err(WaymarkError::PageClosed);
        }
        Ok(state)
    }

    /// Replace the document
    pub fn set_content(&self, elements: impl IntoIterator<Item = MockElement>) {
        let mut state = self.lock();
        state.dom.clear();
        for element in elements {
            state.dom.append(element, None);
        }
    }

    /// Append a top-level element
    pub fn add_element(&self, element: MockElement) {
        self.lock().dom.append(element, None);
    }

    /// Set the document title
    pub fn set_title(&self, title: impl Into<String>) {
        self.lock().title = title.into();
    }

    /// Change the URL without recording a navigation
    pub fn set_url(&self, url: impl Into<String>) {
        self.lock().url = url.into();
    }

    /// Keep network-idle waits pending until their bound elapses
    pub fn set_network_busy(&self, busy: bool) {
        self.lock().network_busy = busy;
    }

    /// Show or hide the element carrying `test_id`
    pub fn set_visible(&self, test_id: &str, visible: bool) {
        let mut state = self.lock();
        if let Some(index) = state.dom.find_test_id(test_id) {
            state.dom.set_visible(index, visible);
        }
    }

    /// Form value of the element carrying `test_id`
    #[must_use]
    pub fn value_of(&self, test_id: &str) -> Option<String> {
        let state = self.lock();
        state
            .dom
            .find_test_id(test_id)
            .map(|index| state.dom.value(index).to_string())
    }

    /// Inline style of the element carrying `test_id`
    #[must_use]
    pub fn style_of(&self, test_id: &str, property: &str) -> Option<String> {
        let state = self.lock();
        state
            .dom
            .find_test_id(test_id)
            .map(|index| state.dom.style(index, property))
    }

    /// Run `hook` after each click on the element carrying `test_id`
    pub fn on_click<F>(&self, test_id: impl Into<String>, hook: F)
    where
        F: Fn(&MockPage) + Send + Sync + 'static,
    {
        self.hooks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(test_id.into(), Arc::new(hook));
    }

    /// Surface a response to network subscribers
    pub fn emit_response(&self, response: MockResponse) {
        self.network.send(NetworkEvent::Response(Arc::new(response)));
    }

    /// Surface a transport failure to network subscribers
    pub fn emit_request_failed(&self, url: impl Into<String>, method: impl Into<String>, error: impl Into<String>) {
        self.network.send(NetworkEvent::RequestFailed {
            url: url.into(),
            method: method.into(),
            error: error.into(),
        });
    }

    /// Surface a console message to console subscribers
    pub fn emit_console(&self, kind: impl Into<String>, text: impl Into<String>) {
        self.console.send(ConsoleMessage::now(kind, text));
    }

    /// Driver calls seen so far, as `action:detail`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Check if an action was performed
    #[must_use]
    pub fn was_called(&self, action: &str) -> bool {
        self.lock().history.iter().any(|c| c.starts_with(action))
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn resolve_one(state: &PageState, locator: &Locator) -> WaymarkResult<usize> {
        let handles = state
            .dom
            .resolve(locator)
            .into_iter()
            .map(|i| state.dom.handle(i))
            .collect();
        let handle = single_match(locator, handles)?;
        MockDom::index_of(&handle).ok_or_else(|| WaymarkError::ElementNotFound {
            locator: locator.to_string(),
        })
    }

    fn edit_value(&self, locator: &Locator, action: &str, edit: impl FnOnce(&str) -> String) -> WaymarkResult<()> {
        let mut state = self.open()?;
        let index = Self::resolve_one(&state, locator)?;
        let value = edit(state.dom.value(index));
        state.dom.set_value(index, &value);
        state.history.push(format!("{action}:{locator}"));
        Ok(())
    }
}

fn blank_png(width: u32, height: u32) -> WaymarkResult<Vec<u8>> {
    let image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| WaymarkError::Screenshot {
            message: format!("PNG encoding failed: {e}"),
        })?;
    Ok(out.into_inner())
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str) -> WaymarkResult<()> {
        let mut state = self.open()?;
        state.url = url.to_string();
        state.history.push(format!("goto:{url}"));
        Ok(())
    }

    async fn url(&self) -> WaymarkResult<String> {
        Ok(self.open()?.url.clone())
    }

    async fn title(&self) -> WaymarkResult<String> {
        Ok(self.open()?.title.clone())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> WaymarkResult<()> {
        let busy = self.open()?.network_busy;
        if state == LoadState::NetworkIdle && busy {
            tokio::time::sleep(timeout).await;
            return Err(WaymarkError::Timeout {
                ms: timeout.as_millis() as u64,
                waiting_for: state.to_string(),
            });
        }
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> WaymarkResult<Vec<u8>> {
        let (width, viewport_height) = MOCK_VIEWPORT;
        let height = {
            let mut state = self.open()?;
            state.history.push(format!("screenshot:{full_page}"));
            if full_page {
                viewport_height.max(state.dom.len() as u32 * 24)
            } else {
                viewport_height
            }
        };
        blank_png(width, height)
    }

    async fn query_all(&self, locator: &Locator) -> WaymarkResult<Vec<ElementHandle>> {
        let state = self.open()?;
        Ok(state
            .dom
            .resolve(locator)
            .into_iter()
            .map(|i| state.dom.handle(i))
            .collect())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> WaymarkResult<()> {
        self.edit_value(locator, "fill", |_| value.to_string())
    }

    async fn click(&self, locator: &Locator) -> WaymarkResult<()> {
        let test_id = {
            let mut state = self.open()?;
            let index = Self::resolve_one(&state, locator)?;
            state.history.push(format!("click:{locator}"));
            state.dom.attribute(index, TEST_ID_ATTRIBUTE).map(str::to_string)
        };
        let hook = test_id.and_then(|test_id| {
            self.hooks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&test_id)
                .cloned()
        });

        // hooks run unlocked so they can drive the page
        if let Some(hook) = hook {
            hook(self);
        }
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> WaymarkResult<()> {
        self.edit_value(locator, "type", |current| format!("{current}{text}"))
    }

    async fn scroll_into_view(&self, locator: &Locator) -> WaymarkResult<()> {
        let mut state = self.open()?;
        Self::resolve_one(&state, locator)?;
        state.history.push(format!("scroll:{locator}"));
        Ok(())
    }

    async fn style_property(&self, locator: &Locator, property: &str) -> WaymarkResult<String> {
        let state = self.open()?;
        let index = Self::resolve_one(&state, locator)?;
        Ok(state.dom.style(index, property))
    }

    async fn set_style_property(
        &self,
        locator: &Locator,
        property: &str,
        value: &str,
    ) -> WaymarkResult<()> {
        let mut state = self.open()?;
        let index = Self::resolve_one(&state, locator)?;
        state.dom.set_style(index, property, value);
        Ok(())
    }

    async fn element_screenshot(&self, locator: &Locator) -> WaymarkResult<Vec<u8>> {
        {
            let mut state = self.open()?;
            Self::resolve_one(&state, locator)?;
            state.history.push(format!("element_screenshot:{locator}"));
        }
        blank_png(200, 24)
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
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::WaitState;

    fn form_page() -> MockPage {
        let page = MockPage::new();
        page.set_content([
            MockElement::with_test_id("input", "email"),
            MockElement::with_test_id("button", "submit").text("Login"),
            MockElement::new("button").text("Cancel"),
        ]);
        page
    }

    mod action_tests {
        use super::*;

        #[tokio::test]
        async fn test_fill_and_type() {
            let page = form_page();
            let email = Locator::test_id("email");
            page.fill(&email, "a@b").await.unwrap();
            page.type_text(&email, ".com").await.unwrap();
            assert_eq!(page.value_of("email").as_deref(), Some("a@b.com"));
            page.fill(&email, "x").await.unwrap();
            assert_eq!(page.value_of("email").as_deref(), Some("x"));
        }

        #[tokio::test]
        async fn test_strict_actions() {
            let page = form_page();
            let err = page.click(&Locator::css("button")).await.unwrap_err();
            assert!(matches!(err, WaymarkError::StrictModeViolation { count: 2, .. }));
            let err = page.click(&Locator::test_id("missing")).await.unwrap_err();
            assert!(matches!(err, WaymarkError::ElementNotFound { .. }));
        }

        #[tokio::test]
        async fn test_element_handle_none_when_missing() {
            let page = form_page();
            assert!(page.element_handle(&Locator::test_id("missing")).await.unwrap().is_none());
            assert!(page.element_handle(&Locator::test_id("submit")).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_click_hook_runs() {
            let page = form_page();
            page.on_click("submit", |page| {
                page.set_url("http://localhost/");
                page.emit_console("log", "submitted");
            });
            let mut console = page.subscribe_console();
            page.click(&Locator::test_id("submit")).await.unwrap();
            assert_eq!(page.url().await.unwrap(), "http://localhost/");
            assert_eq!(console.recv().await.unwrap().text, "submitted");
            assert!(page.was_called("click:"));
        }

        #[tokio::test]
        async fn test_closed_page_rejects_calls() {
            let page = form_page();
            page.close().await.unwrap();
            assert!(matches!(page.goto("http://x").await, Err(WaymarkError::PageClosed)));
            assert!(page.screenshot(true).await.is_err());
        }
    }

    mod capture_tests {
        use super::*;

        #[tokio::test]
        async fn test_screenshot_is_png() {
            let page = form_page();
            let png = page.screenshot(false).await.unwrap();
            let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
            assert_eq!((img.width(), img.height()), MOCK_VIEWPORT);
        }

        #[tokio::test]
        async fn test_network_events() {
            let page = form_page();
            let mut rx = page.subscribe_network();
            page.emit_response(MockResponse::json(
                "http://x/api",
                "get",
                200,
                &serde_json::json!({"ok": true}),
            ));
            match rx.recv().await.unwrap() {
                NetworkEvent::Response(response) => {
                    assert_eq!(response.method(), "GET");
                    assert_eq!(response.json().await.unwrap()["ok"], true);
                    assert_eq!(response.text().await.unwrap(), r#"{"ok":true}"#);
                }
                NetworkEvent::RequestFailed { .. } => panic!("expected response"),
            }
        }

        #[tokio::test]
        async fn test_busy_network_times_out() {
            let page = form_page();
            page.set_network_busy(true);
            let err = page
                .wait_for_load_state(LoadState::NetworkIdle, Duration::from_millis(10))
                .await
                .unwrap_err();
            assert!(err.is_timeout());
            assert!(page
                .wait_for_load_state(LoadState::Load, Duration::from_millis(10))
                .await
                .is_ok());
        }
    }

    mod wait_tests {
        use super::*;

        #[tokio::test]
        async fn test_wait_for_visible_times_out_on_hidden() {
            let page = form_page();
            page.set_visible("email", false);
            let err = page
                .wait_for(&Locator::test_id("email"), WaitState::Visible, Duration::from_millis(120))
                .await
                .unwrap_err();
            assert!(matches!(err, WaymarkError::Timeout { ms: 120, .. }));
        }

        #[tokio::test]
        async fn test_wait_for_sees_later_change() {
            let page = Arc::new(form_page());
            page.set_visible("email", false);
            let shown = page.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                shown.set_visible("email", true);
            });
            page.wait_for(&Locator::test_id("email"), WaitState::Visible, Duration::from_secs(2))
                .await
                .unwrap();
        }
    }
}
