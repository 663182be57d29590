//! Console and failed-request capture for one page.
//!
//! The monitor registers recorders on the page's event hubs when it is
//! created. Events queue up stamped with their emission time and are moved
//! into the snapshot whenever one is requested, so nothing runs in the
//! background and no event is dropped however long the test goes between
//! snapshots.

use crate::driver::{ConsoleMessage, NetworkEvent, Observed, PageDriver};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// A response with status >= 400, or a request that never got a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFailure {
    /// Request URL
    pub url: String,
    /// HTTP status; `None` for transport failures
    pub status: Option<u16>,
    /// Request method
    pub method: String,
    /// When the page emitted the failure
    pub timestamp: String,
}

impl NetworkFailure {
    /// Failure entry for `observed`, `None` when it is a successful response
    #[must_use]
    pub fn from_event(observed: &Observed<NetworkEvent>) -> Option<Self> {
        match &observed.event {
            NetworkEvent::Response(response) if response.status() >= 400 => Some(Self {
                url: response.url().to_string(),
                status: Some(response.status()),
                method: response.method().to_string(),
                timestamp: observed.at.clone(),
            }),
            NetworkEvent::Response(_) => None,
            NetworkEvent::RequestFailed { url, method, .. } => Some(Self {
                url: url.clone(),
                status: None,
                method: method.clone(),
                timestamp: observed.at.clone(),
            }),
        }
    }
}

#[derive(Debug)]
struct Collector<E, T> {
    receiver: mpsc::UnboundedReceiver<Observed<E>>,
    items: Vec<T>,
}

impl<E, T: Clone> Collector<E, T> {
    const fn new(receiver: mpsc::UnboundedReceiver<Observed<E>>) -> Self {
        Self {
            receiver,
            items: Vec::new(),
        }
    }

    fn drain(&mut self, mut keep: impl FnMut(Observed<E>) -> Option<T>) -> Vec<T> {
        while let Ok(observed) = self.receiver.try_recv() {
            self.items.extend(keep(observed));
        }
        self.items.clone()
    }
}

/// Collects console output and network failures of one page
#[derive(Debug)]
pub struct PageMonitor {
    console: Mutex<Collector<ConsoleMessage, ConsoleMessage>>,
    network: Mutex<Collector<NetworkEvent, NetworkFailure>>,
}

impl PageMonitor {
    /// Start collecting from `page`
    #[must_use]
    pub fn attach(page: &dyn PageDriver) -> Self {
        Self {
            console: Mutex::new(Collector::new(page.console_events().record())),
            network: Mutex::new(Collector::new(page.network_events().record())),
        }
    }

    /// Console messages observed so far, oldest first
    #[must_use]
    pub fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(|observed| Some(observed.event))
    }

    /// Failed responses and requests observed so far, oldest first
    #[must_use]
    pub fn network_failures(&self) -> Vec<NetworkFailure> {
        self.network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(|observed| NetworkFailure::from_event(&observed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::EVENT_CAPACITY;
    use crate::mock::{MockPage, MockResponse};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    #[test]
    fn test_console_messages_in_order() {
        let page = MockPage::new();
        let monitor = PageMonitor::attach(&page);
        page.emit_console("log", "ready");
        page.emit_console("error", "boom");

        let messages = monitor.console_messages();
        let kinds: Vec<_> = messages.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, ["log", "error"]);
        assert_eq!(messages[1].text, "boom");

        page.emit_console("warning", "late");
        assert_eq!(monitor.console_messages().len(), 3);
    }

    #[test]
    fn test_only_failures_are_kept() {
        let page = MockPage::new();
        let monitor = PageMonitor::attach(&page);
        page.emit_response(MockResponse::new("/ok", "GET", 200, ""));
        page.emit_response(MockResponse::new("/missing", "get", 404, ""));
        page.emit_request_failed("/down", "POST", "net::ERR_CONNECTION_REFUSED");

        let failures = monitor.network_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].url, "/missing");
        assert_eq!(failures[0].status, Some(404));
        assert_eq!(failures[0].method, "GET");
        assert_eq!(failures[1].status, None);
        assert_eq!(failures[1].method, "POST");
    }

    #[test]
    fn test_failure_stamped_when_emitted() {
        let page = MockPage::new();
        let monitor = PageMonitor::attach(&page);
        page.emit_response(MockResponse::new("/api/broken", "GET", 500, ""));
        let emitted = Utc::now();
        std::thread::sleep(Duration::from_millis(300));
        let snapshot = Utc::now();

        let failures = monitor.network_failures();
        let stamped: DateTime<Utc> = failures[0].timestamp.parse().unwrap();
        assert!(stamped <= emitted, "{stamped} after {emitted}");
        assert!(stamped < snapshot);

        // a second snapshot keeps the original stamp
        assert_eq!(monitor.network_failures()[0].timestamp, failures[0].timestamp);
    }

    #[test]
    fn test_keeps_everything_past_event_capacity() {
        let page = MockPage::new();
        let monitor = PageMonitor::attach(&page);
        let total = EVENT_CAPACITY + 44;
        for i in 0..total {
            page.emit_console("log", format!("m{i}"));
            page.emit_request_failed(format!("/r{i}"), "GET", "net::ERR_FAILED");
        }

        let messages = monitor.console_messages();
        assert_eq!(messages.len(), total);
        assert_eq!(messages[0].text, "m0");
        assert_eq!(messages[total - 1].text, format!("m{}", total - 1));

        let failures = monitor.network_failures();
        assert_eq!(failures.len(), total);
        assert_eq!(failures[0].url, "/r0");
    }

    #[test]
    fn test_live_subscribers_unaffected_by_recorders() {
        let page = MockPage::new();
        let _monitor = PageMonitor::attach(&page);
        let mut live = page.subscribe_console();
        page.emit_console("log", "both");
        assert_eq!(live.try_recv().unwrap().text, "both");
    }

    #[test]
    fn test_events_before_attach_are_not_seen() {
        let page = MockPage::new();
        page.emit_console("log", "early");
        let monitor = PageMonitor::attach(&page);
        assert!(monitor.console_messages().is_empty());
    }

    #[test]
    fn test_failure_serializes_null_status() {
        let failure = NetworkFailure {
            url: "/x".into(),
            status: None,
            method: "GET".into(),
            timestamp: "t".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert!(json["status"].is_null());
    }
}
