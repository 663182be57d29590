//! In-memory driver.
//!
//! Implements every driver seam without a browser so harness behaviour can be
//! exercised in unit tests and offline dry runs. Pages hold a small DOM,
//! record the calls made against them and let tests attach click hooks that
//! emit responses, console messages or navigations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use waymark::mock::{MockElement, MockPage, MockResponse};
//!
//! let page = MockPage::new();
//! page.set_content([MockElement::with_test_id("button", "submit").text("Login")]);
//! page.on_click("submit", |page| {
//!     page.emit_response(MockResponse::json("/api/auth/login", "POST", 200, &body));
//!     page.set_url("http://localhost/");
//! });
//! ```

mod browser;
mod dom;
mod page;

pub use browser::{MockBrowser, MockContext};
pub use dom::{MockDom, MockElement};
pub use page::{ClickHook, MockPage, MockResponse, MOCK_VIEWPORT};
