//! Matching observed responses.
//!
//! The harness never intercepts traffic; it only watches the driver's
//! response stream and picks out the response a test step is waiting for.

use crate::driver::Response;
use crate::wait::API_CALL_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// DELETE request
    Delete,
    /// PATCH request
    Patch,
    /// HEAD request
    Head,
    /// OPTIONS request
    Options,
    /// Any method
    Any,
}

impl HttpMethod {
    /// Parse from string; unknown methods become [`HttpMethod::Any`]
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => Self::Any,
        }
    }

    /// Convert to string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Any => "*",
        }
    }

    /// Check if this method matches another
    #[must_use]
    pub fn matches(&self, method: &str) -> bool {
        *self == Self::Any || self.as_str().eq_ignore_ascii_case(method)
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Get
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL pattern for matching responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlPattern {
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Contains substring
    Contains(String),
    /// Regex match; an invalid expression matches nothing
    Regex(String),
    /// Match any URL
    Any,
}

impl UrlPattern {
    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern),
            Self::Contains(pattern) => url.contains(pattern),
            Self::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(url))
                .unwrap_or(false),
            Self::Any => true,
        }
    }

    /// Compile once for repeated matching
    #[must_use]
    pub fn compile(&self) -> UrlMatcher {
        match self {
            Self::Regex(pattern) => match regex::Regex::new(pattern) {
                Ok(re) => UrlMatcher::Compiled(re),
                Err(_) => UrlMatcher::Never,
            },
            other => UrlMatcher::Plain(other.clone()),
        }
    }
}

impl From<&str> for UrlPattern {
    fn from(s: &str) -> Self {
        Self::Contains(s.to_string())
    }
}

impl From<String> for UrlPattern {
    fn from(s: String) -> Self {
        Self::Contains(s)
    }
}

impl From<regex::Regex> for UrlPattern {
    fn from(re: regex::Regex) -> Self {
        Self::Regex(re.as_str().to_string())
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "{p}"),
            Self::Prefix(p) => write!(f, "{p}*"),
            Self::Contains(p) => write!(f, "*{p}*"),
            Self::Regex(p) => write!(f, "/{p}/"),
            Self::Any => f.write_str("*"),
        }
    }
}

/// A [`UrlPattern`] with its regex compiled
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    /// Non-regex pattern
    Plain(UrlPattern),
    /// Compiled regex
    Compiled(regex::Regex),
    /// Invalid regex
    Never,
}

impl UrlMatcher {
    /// Check if a URL matches
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Plain(pattern) => pattern.matches(url),
            Self::Compiled(re) => re.is_match(url),
            Self::Never => false,
        }
    }
}

/// Criteria for `TestService::wait_for_api_call`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCallOptions {
    /// Request method (default GET)
    pub method: HttpMethod,
    /// Required status (default 200); `None` accepts any status
    pub status: Option<u16>,
    /// Bound on the wait (default 20 seconds)
    pub timeout: Duration,
    /// Log the parsed response (default true)
    pub log_response: bool,
}

impl Default for ApiCallOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            status: Some(200),
            timeout: Duration::from_millis(API_CALL_TIMEOUT_MS),
            log_response: true,
        }
    }
}

impl ApiCallOptions {
    /// GET, status 200, 20 seconds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect a POST
    #[must_use]
    pub const fn post() -> Self {
        Self {
            method: HttpMethod::Post,
            status: Some(200),
            timeout: Duration::from_millis(API_CALL_TIMEOUT_MS),
            log_response: true,
        }
    }

    /// Set the method
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Require a status code
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Accept any status code
    #[must_use]
    pub const fn any_status(mut self) -> Self {
        self.status = None;
        self
    }

    /// Set the bound
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Toggle response logging
    #[must_use]
    pub const fn with_log_response(mut self, log: bool) -> Self {
        self.log_response = log;
        self
    }

    /// Whether a response satisfies the method and status criteria
    #[must_use]
    pub fn accepts(&self, response: &dyn Response) -> bool {
        self.method.matches(response.method())
            && self.status.map_or(true, |status| status == response.status())
    }
}

/// A matched response and its parsed body
#[derive(Debug, Clone)]
pub struct ApiCall {
    /// The response
    pub response: Arc<dyn Response>,
    /// JSON body, `Null` when the body is not JSON
    pub body: serde_json::Value,
}

impl ApiCall {
    /// Status of the response
    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.status()
    }
}
