//! Per-test JSON log of observed HTTP responses.
//!
//! Entries are kept in memory and the whole array is rewritten to
//! `<output>/<suite>/<case>/network-calls/network-logs-<timestamp>.json`
//! after every new entry, so the file is always a complete JSON document.

use crate::artifacts::{file_timestamp, iso_timestamp, sanitize, NETWORK_CALLS_DIR};
use crate::driver::Response;
use crate::result::WaymarkResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;

/// One observed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLogEntry {
    /// ISO-8601 time the entry was recorded
    pub timestamp: String,
    /// Response URL
    pub url: String,
    /// Request method
    pub method: String,
    /// HTTP status
    pub status: u16,
    /// Request body, if known
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_body: Option<Value>,
    /// Response body: parsed JSON, or the raw text when it is not JSON
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_body: Option<Value>,
    /// Milliseconds spent reading the body (not the request latency)
    pub duration: u64,
}

/// Sequential response log for one test case
#[derive(Debug)]
pub struct NetworkLogger {
    file: PathBuf,
    entries: Mutex<Vec<NetworkLogEntry>>,
}

impl NetworkLogger {
    /// Create `<output>/<suite>/<case>/network-calls/` and pick this
    /// instance's file name
    pub fn new(output: impl AsRef<Path>, suite: &str, case: &str) -> WaymarkResult<Self> {
        let dir = output
            .as_ref()
            .join(sanitize(suite))
            .join(sanitize(case))
            .join(NETWORK_CALLS_DIR);
        Self::in_dir(dir)
    }

    /// Log into an existing or new `network-calls` directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> WaymarkResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            file: dir.join(format!("network-logs-{}.json", file_timestamp())),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// File the log is written to (created on the first entry)
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Append an entry and rewrite the file
    pub async fn log_network_call(&self, entry: NetworkLogEntry) -> WaymarkResult<()> {
        let mut entries = self.entries.lock().await;
        entries.push(entry);
        let json = serde_json::to_string_pretty(&*entries)?;
        std::fs::write(&self.file, json)?;
        Ok(())
    }

    /// Record `response`, parsing its body as JSON with a raw-text fallback
    pub async fn log_response(
        &self,
        response: &dyn Response,
        request_body: Option<Value>,
    ) -> WaymarkResult<()> {
        let started = Instant::now();
        let body = response.body().await?;
        let response_body = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));

        let entry = NetworkLogEntry {
            timestamp: iso_timestamp(),
            url: response.url().to_string(),
            method: response.method().to_string(),
            status: response.status(),
            request_body,
            response_body: Some(response_body),
            duration: started.elapsed().as_millis() as u64,
        };
        self.log_network_call(entry).await
    }

    /// Snapshot of the entries logged so far
    pub async fn entries(&self) -> Vec<NetworkLogEntry> {
        self.entries.lock().await.clone()
    }
}
