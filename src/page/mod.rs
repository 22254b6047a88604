//! Browser page abstraction.
//!
//! The engine only talks to a [`Page`]. Implementations provide the actual
//! browser control:
//! - [`PlaywrightPage`] drives Chromium through a Node + Playwright bridge
//! - [`MockPage`] is an in-memory page for tests and dry runs

pub mod mock;
pub mod playwright;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub use mock::{MockEffect, MockElement, MockPage};
pub use playwright::{PlaywrightConfig, PlaywrightPage};

/// Result type for page operations
pub type PageResult<T> = Result<T, PageError>;

/// Error types for page operations.
///
/// Display strings are written into failure records, so they are phrased
/// for a reader of the test report.
#[derive(Debug, Error)]
pub enum PageError {
    /// No element matched the query
    #[error("{0}")]
    NotFound(String),

    /// A wait exceeded its timeout
    #[error("Timed out {0}")]
    Timeout(String),

    /// A check ran but observed the wrong value
    #[error("{0}")]
    Assertion(String),

    /// Navigation failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The browser backend failed or violated its protocol
    #[error("Browser error: {0}")]
    Backend(String),

    /// I/O error talking to the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Computed style properties the color assertions read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleProperty {
    Color,
    BackgroundColor,
    BorderColor,
}

impl StyleProperty {
    /// CSS property name
    pub fn css_name(&self) -> &'static str {
        match self {
            StyleProperty::Color => "color",
            StyleProperty::BackgroundColor => "background-color",
            StyleProperty::BorderColor => "border-color",
        }
    }

    /// Key on `CSSStyleDeclaration`
    pub fn js_name(&self) -> &'static str {
        match self {
            StyleProperty::Color => "color",
            StyleProperty::BackgroundColor => "backgroundColor",
            StyleProperty::BorderColor => "borderColor",
        }
    }
}

/// Predicate for a network response the page should observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkExpectation {
    /// HTTP method, upper case
    pub method: String,
    /// Substring the response URL must contain
    pub url_part: String,
    /// Required status code
    pub status: u16,
}

impl NetworkExpectation {
    /// Expect a `200` response for `method` on a URL containing `url_part`
    pub fn new(method: impl Into<String>, url_part: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url_part: url_part.into(),
            status: 200,
        }
    }

    /// Whether an observed response satisfies this expectation
    pub fn matches(&self, method: &str, url: &str, status: u16) -> bool {
        url.contains(&self.url_part) && method.eq_ignore_ascii_case(&self.method) && status == self.status
    }
}

impl std::fmt::Display for NetworkExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url_part)
    }
}

/// A registered response listener. Resolves once a matching response arrives.
///
/// The listener is armed when [`Page::expect_response`] returns, not when the
/// future is first polled, so a triggering action may run concurrently.
pub type ResponseWait = Pin<Box<dyn Future<Output = PageResult<()>> + Send>>;

/// Capability interface over a single browser tab
#[async_trait]
pub trait Page: Send {
    /// Navigate to an absolute URL
    async fn goto(&mut self, url: &str, timeout: Duration) -> PageResult<()>;

    /// Whether the first element showing `text` is visible
    async fn is_text_visible(&mut self, text: &str) -> PageResult<bool>;

    /// Wait until an element matching `selector` is visible
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> PageResult<()>;

    /// Text content of the element matching `selector`
    async fn selector_text(&mut self, selector: &str, timeout: Duration) -> PageResult<String>;

    /// Click the element showing `text`
    async fn click_text(&mut self, text: &str, timeout: Duration) -> PageResult<()>;

    /// Number of inputs associated with an accessible label
    async fn count_by_label(&mut self, label: &str) -> PageResult<usize>;

    /// Fill the input associated with an accessible label
    async fn fill_by_label(&mut self, label: &str, value: &str) -> PageResult<()>;

    /// Number of inputs with this placeholder
    async fn count_by_placeholder(&mut self, placeholder: &str) -> PageResult<usize>;

    /// Fill the input with this placeholder
    async fn fill_by_placeholder(&mut self, placeholder: &str, value: &str) -> PageResult<()>;

    /// Fill the input matching `selector`
    async fn fill_selector(&mut self, selector: &str, value: &str) -> PageResult<()>;

    /// Wait until the current URL contains `fragment`
    async fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> PageResult<()>;

    /// Computed style of the first element containing `text`
    async fn computed_style(&mut self, text: &str, property: StyleProperty) -> PageResult<String>;

    /// Arm a response listener and return a future that resolves on a match
    async fn expect_response(
        &mut self,
        expectation: NetworkExpectation,
        timeout: Duration,
    ) -> PageResult<ResponseWait>;

    /// Sleep on the page's clock
    async fn wait(&mut self, ms: u64) -> PageResult<()> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    /// Release the underlying browser
    async fn close(&mut self) -> PageResult<()> {
        Ok(())
    }

    /// Backend identifier (e.g., "playwright", "mock")
    fn source_type(&self) -> &str;
}
