//! Isolated video contexts and the frame recorder behind them.
//!
//! A [`VideoContext`] owns a fresh browser, one browsing context configured
//! to record, and one page. It must be released with [`VideoContext::cleanup`]
//! (or used through [`VideoContext::scope`], which always cleans up); a
//! dropped context that was never cleaned up leaks its browser and logs a
//! warning.
//!
//! Videos are Motion JPEG streams: page screenshots are sampled at a fixed
//! rate, scaled to the recording size, JPEG-encoded and appended to one
//! `<uuid>.mjpeg` file per page.

use crate::driver::{
    BrowserContextHandle, BrowserHandle, BrowserLauncher, ContextOptions, PageDriver, RecordVideo,
};
use crate::logger::Logger;
use crate::metadata;
use crate::result::{WaymarkError, WaymarkResult};
use image::{DynamicImage, ImageFormat};
use std::fmt;
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// JPEG quality for recorded frames (1-100)
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Extension of recorded video files
pub const VIDEO_EXTENSION: &str = "mjpeg";

/// Fresh video file path inside `dir`
#[must_use]
pub fn video_file_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.{VIDEO_EXTENSION}", uuid::Uuid::new_v4()))
}

// =============================================================================
// FRAME ENCODING
// =============================================================================

/// Turns PNG screenshots into fixed-size JPEG frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    width: u32,
    height: u32,
    quality: u8,
}

impl FrameEncoder {
    /// Encoder producing `width`x`height` frames
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Set JPEG quality (1-100)
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Decode a PNG screenshot, scale it and encode it as JPEG
    pub fn encode(&self, png: &[u8]) -> WaymarkResult<Vec<u8>> {
        let img = image::load_from_memory_with_format(png, ImageFormat::Png).map_err(|e| {
            WaymarkError::VideoRecording {
                message: format!("Failed to decode screenshot: {e}"),
            }
        })?;

        let img = if img.width() != self.width || img.height() != self.height {
            img.resize_exact(self.width, self.height, image::imageops::FilterType::Triangle)
        } else {
            img
        };

        self.encode_image(&img)
    }

    fn encode_image(&self, img: &DynamicImage) -> WaymarkResult<Vec<u8>> {
        let rgb = img.to_rgb8();
        let mut buffer = Cursor::new(Vec::new());
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder
            .encode(
                rgb.as_raw(),
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| WaymarkError::VideoRecording {
                message: format!("JPEG encoding failed: {e}"),
            })?;
        Ok(buffer.into_inner())
    }
}

// =============================================================================
// FRAME RECORDER
// =============================================================================

/// Samples a page into an MJPEG file until stopped
pub struct FrameRecorder {
    path: PathBuf,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<WaymarkResult<usize>>>,
}

impl fmt::Debug for FrameRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRecorder")
            .field("path", &self.path)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl FrameRecorder {
    /// Create the video file and start sampling `page`
    pub async fn start(
        page: Arc<dyn PageDriver>,
        path: PathBuf,
        video: &RecordVideo,
    ) -> WaymarkResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        let encoder = FrameEncoder::new(video.width, video.height);
        let interval = video.frame_interval();
        let (stop_tx, stop_rx) = oneshot::channel();

        tracing::debug!(path = %path.display(), fps = video.fps, "video recording started");
        let task = tokio::spawn(record(page, file, encoder, interval, stop_rx));

        Ok(Self {
            path,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    /// File being written
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capture a final frame, flush the file and return the frame count
    pub async fn stop(mut self) -> WaymarkResult<usize> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(task) = self.task.take() else {
            return Ok(0);
        };
        let frames = task.await.map_err(|e| WaymarkError::VideoRecording {
            message: format!("recorder task failed: {e}"),
        })??;
        tracing::debug!(path = %self.path.display(), frames, "video recording stopped");
        Ok(frames)
    }
}

async fn record(
    page: Arc<dyn PageDriver>,
    mut file: tokio::fs::File,
    encoder: FrameEncoder,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) -> WaymarkResult<usize> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut frames = 0;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                if write_frame(page.as_ref(), &mut file, &encoder).await? {
                    frames += 1;
                }
            }
        }
    }

    if write_frame(page.as_ref(), &mut file, &encoder).await? {
        frames += 1;
    }
    file.flush().await?;
    Ok(frames)
}

/// Append one frame; a page that cannot be captured is skipped
async fn write_frame(
    page: &dyn PageDriver,
    file: &mut tokio::fs::File,
    encoder: &FrameEncoder,
) -> WaymarkResult<bool> {
    let png = match page.screenshot(false).await {
        Ok(png) => png,
        Err(err) => {
            tracing::debug!(error = %err, "video frame skipped");
            return Ok(false);
        }
    };
    let jpeg = match encoder.encode(&png) {
        Ok(jpeg) => jpeg,
        Err(err) => {
            tracing::warn!(error = %err, "video frame dropped");
            return Ok(false);
        }
    };
    file.write_all(&jpeg).await?;
    Ok(true)
}

// =============================================================================
// VIDEO CONTEXT
// =============================================================================

/// Browser, context and page dedicated to recording one test step
pub struct VideoContext {
    test_name: String,
    dir: PathBuf,
    page: Arc<dyn PageDriver>,
    context: Option<Box<dyn BrowserContextHandle>>,
    browser: Option<Box<dyn BrowserHandle>>,
    logger: Logger,
}

impl fmt::Debug for VideoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoContext")
            .field("test_name", &self.test_name)
            .field("dir", &self.dir)
            .field("cleaned_up", &self.is_cleaned_up())
            .finish_non_exhaustive()
    }
}

/// Launch a browser and open a recording context and page writing into `dir`
/// at the default 1280x720
pub async fn create_video_context(
    launcher: &dyn BrowserLauncher,
    test_name: &str,
    dir: impl Into<PathBuf>,
    logger: &Logger,
) -> WaymarkResult<VideoContext> {
    create_video_context_with(launcher, test_name, RecordVideo::new(dir), logger).await
}

/// [`create_video_context`] with explicit recording settings
pub async fn create_video_context_with(
    launcher: &dyn BrowserLauncher,
    test_name: &str,
    video: RecordVideo,
    logger: &Logger,
) -> WaymarkResult<VideoContext> {
    std::fs::create_dir_all(&video.dir)?;
    let dir = video.dir.clone();

    let browser = launcher.launch().await?;
    let context = match browser
        .new_context(ContextOptions {
            record_video: Some(video),
        })
        .await
    {
        Ok(context) => context,
        Err(err) => {
            let _ = browser.close().await;
            return Err(err);
        }
    };
    let page = match context.new_page().await {
        Ok(page) => page,
        Err(err) => {
            let _ = context.close().await;
            let _ = browser.close().await;
            return Err(err);
        }
    };

    logger.info_with(
        format!("Video context created for {test_name}"),
        metadata! { "dir" => dir.display().to_string(), "browser" => launcher.name() },
    );

    Ok(VideoContext {
        test_name: test_name.to_string(),
        dir,
        page,
        context: Some(context),
        browser: Some(browser),
        logger: logger.clone(),
    })
}

impl VideoContext {
    /// The recording page
    #[must_use]
    pub fn page(&self) -> &Arc<dyn PageDriver> {
        &self.page
    }

    /// Directory the video is written to
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether [`cleanup`](Self::cleanup) already ran
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool {
        self.context.is_none() && self.browser.is_none()
    }

    /// Close the context (flushing the video), then the browser, and log
    /// where the video went. Calling it again is a no-op returning `None`.
    pub async fn cleanup(&mut self) -> WaymarkResult<Option<PathBuf>> {
        if self.is_cleaned_up() {
            return Ok(None);
        }

        let video_path = match self.page.video_path().await {
            Ok(path) => path,
            Err(err) => {
                self.logger
                    .warn(format!("Could not read video path for {}: {err}", self.test_name));
                None
            }
        };

        let context_result = match self.context.take() {
            Some(context) => context.close().await,
            None => Ok(()),
        };
        let browser_result = match self.browser.take() {
            Some(browser) => browser.close().await,
            None => Ok(()),
        };

        match &video_path {
            Some(path) => self.logger.info(format!(
                "Video for {} saved to {}",
                self.test_name,
                path.display()
            )),
            None => self
                .logger
                .warn(format!("No video recorded for {}", self.test_name)),
        }

        context_result?;
        browser_result?;
        Ok(video_path)
    }

    /// Run `f` against the recording page, then always clean up.
    ///
    /// An error from `f` wins over a cleanup error, which is then only logged.
    pub async fn scope<F, Fut, T>(mut self, f: F) -> WaymarkResult<(T, Option<PathBuf>)>
    where
        F: FnOnce(Arc<dyn PageDriver>) -> Fut,
        Fut: Future<Output = WaymarkResult<T>>,
    {
        let outcome = f(self.page.clone()).await;
        let cleanup = self.cleanup().await;
        match (outcome, cleanup) {
            (Ok(value), Ok(path)) => Ok((value, path)),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    self.logger
                        .error("Video context cleanup failed", Some(&cleanup_err));
                }
                Err(err)
            }
        }
    }
}

impl Drop for VideoContext {
    fn drop(&mut self) {
        if !self.is_cleaned_up() {
            tracing::warn!(test = %self.test_name, "video context dropped without cleanup");
            self.logger.warn(format!(
                "Video context for {} dropped without cleanup; its browser is still running",
                self.test_name
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LoggerOptions;
    use crate::mock::{MockBrowser, MockPage};

    fn quiet_logger() -> Logger {
        Logger::new(LoggerOptions::default().with_console(false))
    }

    fn video_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == VIDEO_EXTENSION))
            .collect()
    }

    mod encoder_tests {
        use super::*;

        #[tokio::test]
        async fn test_encodes_scaled_jpeg() {
            let png = MockPage::new().screenshot(false).await.unwrap();
            let jpeg = FrameEncoder::new(64, 36).encode(&png).unwrap();
            let img = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
            assert_eq!((img.width(), img.height()), (64, 36));
        }

        #[test]
        fn test_rejects_garbage() {
            let err = FrameEncoder::new(10, 10).encode(b"not a png").unwrap_err();
            assert!(matches!(err, WaymarkError::VideoRecording { .. }));
        }

        #[test]
        fn test_quality_clamped() {
            assert_eq!(FrameEncoder::new(1, 1).with_quality(0).quality, 1);
            assert_eq!(FrameEncoder::new(1, 1).with_quality(200).quality, 100);
        }
    }

    mod recorder_tests {
        use super::*;

        #[tokio::test]
        async fn test_immediate_stop_writes_one_frame() {
            let dir = tempfile::tempdir().unwrap();
            let page: Arc<dyn PageDriver> = Arc::new(MockPage::new());
            let video = RecordVideo::new(dir.path()).with_size(32, 18).with_fps(1);
            let path = video_file_path(dir.path());
            let recorder = FrameRecorder::start(page, path.clone(), &video).await.unwrap();
            let frames = recorder.stop().await.unwrap();
            assert!(frames >= 1);
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }

        #[tokio::test]
        async fn test_closed_page_yields_empty_file() {
            let dir = tempfile::tempdir().unwrap();
            let page = Arc::new(MockPage::new());
            page.close().await.unwrap();
            let video = RecordVideo::new(dir.path()).with_size(32, 18);
            let path = video_file_path(dir.path());
            let recorder = FrameRecorder::start(page, path.clone(), &video).await.unwrap();
            assert_eq!(recorder.stop().await.unwrap(), 0);
            assert!(path.exists());
        }

        #[tokio::test]
        async fn test_rate_above_one_per_ms_still_records() {
            let dir = tempfile::tempdir().unwrap();
            let page: Arc<dyn PageDriver> = Arc::new(MockPage::new());
            let video = RecordVideo::new(dir.path()).with_size(32, 18).with_fps(2000);
            let path = video_file_path(dir.path());
            let recorder = FrameRecorder::start(page, path.clone(), &video).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(recorder.stop().await.unwrap() >= 1);
        }
    }

    mod context_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_then_cleanup() {
            let dir = tempfile::tempdir().unwrap();
            let videos = dir.path().join("videos").join("step");
            let launcher = MockBrowser::new();

            let mut ctx = create_video_context(&launcher, "login", &videos, &quiet_logger())
                .await
                .unwrap();
            assert_eq!(launcher.running(), 1);

            let path = ctx.cleanup().await.unwrap().unwrap();
            assert_eq!(launcher.running(), 0);
            assert!(ctx.is_cleaned_up());
            assert_eq!(video_files(&videos), vec![path]);
        }

        #[tokio::test]
        async fn test_cleanup_is_idempotent() {
            let dir = tempfile::tempdir().unwrap();
            let launcher = MockBrowser::new();
            let mut ctx = create_video_context(&launcher, "t", dir.path(), &quiet_logger())
                .await
                .unwrap();
            assert!(ctx.cleanup().await.unwrap().is_some());
            assert!(ctx.cleanup().await.unwrap().is_none());
            assert_eq!(launcher.running(), 0);
            assert_eq!(video_files(dir.path()).len(), 1);
        }

        #[tokio::test]
        async fn test_scope_cleans_up_on_error() {
            let dir = tempfile::tempdir().unwrap();
            let launcher = MockBrowser::new();
            let ctx = create_video_context(&launcher, "t", dir.path(), &quiet_logger())
                .await
                .unwrap();
            let result: WaymarkResult<((), Option<PathBuf>)> = ctx
                .scope(|page| async move {
                    page.goto("http://localhost/form").await?;
                    Err(WaymarkError::assertion("expected banner"))
                })
                .await;
            assert!(matches!(result, Err(WaymarkError::AssertionFailed { .. })));
            assert_eq!(launcher.running(), 0);
            assert_eq!(video_files(dir.path()).len(), 1);
        }

        #[tokio::test]
        async fn test_scope_returns_value_and_path() {
            let dir = tempfile::tempdir().unwrap();
            let launcher = MockBrowser::new();
            let ctx = create_video_context(&launcher, "t", dir.path(), &quiet_logger())
                .await
                .unwrap();
            let (url, path) = ctx
                .scope(|page| async move {
                    page.goto("http://localhost/").await?;
                    page.url().await
                })
                .await
                .unwrap();
            assert_eq!(url, "http://localhost/");
            assert!(path.unwrap().starts_with(dir.path()));
        }

        #[tokio::test]
        async fn test_drop_without_cleanup_leaks_browser() {
            let dir = tempfile::tempdir().unwrap();
            let launcher = MockBrowser::new();
            let ctx = create_video_context(&launcher, "t", dir.path(), &quiet_logger())
                .await
                .unwrap();
            drop(ctx);
            assert_eq!(launcher.running(), 1);
        }
    }
}
