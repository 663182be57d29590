//! In-memory browser, context and launcher.

use super::page::MockPage;
use crate::driver::{BrowserContextHandle, BrowserHandle, BrowserLauncher, ContextOptions, PageDriver};
use crate::result::{WaymarkError, WaymarkResult};
use crate::video::{video_file_path, FrameRecorder};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LaunchStats {
    launched: AtomicUsize,
    running: AtomicUsize,
}

/// Launcher for in-memory browsers; clones share launch statistics
#[derive(Debug, Clone, Default)]
pub struct MockBrowser {
    stats: Arc<LaunchStats>,
}

impl MockBrowser {
    /// New launcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Browsers launched so far
    #[must_use]
    pub fn launched(&self) -> usize {
        self.stats.launched.load(Ordering::SeqCst)
    }

    /// Browsers launched and not yet closed
    #[must_use]
    pub fn running(&self) -> usize {
        self.stats.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for MockBrowser {
    async fn launch(&self) -> WaymarkResult<Box<dyn BrowserHandle>> {
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        self.stats.running.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBrowserInstance {
            stats: Arc::clone(&self.stats),
            connected: AtomicBool::new(true),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug)]
struct MockBrowserInstance {
    stats: Arc<LaunchStats>,
    connected: AtomicBool,
}

#[async_trait]
impl BrowserHandle for MockBrowserInstance {
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> WaymarkResult<Box<dyn BrowserContextHandle>> {
        if !self.is_connected() {
            return Err(WaymarkError::invalid_state("browser is closed"));
        }
        Ok(Box::new(MockContext::new(options)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> WaymarkResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.stats.running.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Browsing context holding mock pages; records video when asked to
#[derive(Debug)]
pub struct MockContext {
    options: ContextOptions,
    pages: Mutex<Vec<Arc<MockPage>>>,
    recorders: tokio::sync::Mutex<Vec<FrameRecorder>>,
    closed: AtomicBool,
}

impl MockContext {
    /// Context with the given options
    #[must_use]
    pub fn new(options: ContextOptions) -> Self {
        Self {
            options,
            pages: Mutex::new(Vec::new()),
            recorders: tokio::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn pages(&self) -> Vec<Arc<MockPage>> {
        self.pages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BrowserContextHandle for MockContext {
    async fn new_page(&self) -> WaymarkResult<Arc<dyn PageDriver>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WaymarkError::invalid_state("context is closed"));
        }

        let video = self
            .options
            .record_video
            .as_ref()
            .map(|video| (video.clone(), video_file_path(&video.dir)));
        let page = match &video {
            Some((_, path)) => MockPage::new().with_video_path(path.clone()),
            None => MockPage::new(),
        };
        let page = Arc::new(page);

        if let Some((video, path)) = video {
            let recorder = FrameRecorder::start(page.clone(), path, &video).await?;
            self.recorders.lock().await.push(recorder);
        }
        self.pages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
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
        for page in self.pages() {
            page.close().await?;
        }
        Ok(())
    }
}
