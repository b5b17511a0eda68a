//! Browser capabilities consumed by the crawl pipeline
//!
//! The orchestrator only talks to these traits. [`session::WebDriverSession`]
//! drives a real browser through WebDriver; tests plug in scripted doubles.

pub mod auth;
pub mod extract;
pub mod script;
pub mod session;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crawler::error::CrawlError;
use crate::crawler::task::{ApiCallRecord, PageElements};

pub use auth::{Credentials, FormAuthenticator};
pub use session::{WebDriverSession, WebDriverSessionFactory};

/// One isolated browser page, owned by a single task attempt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load a URL, failing if it does not finish loading within `timeout`
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), CrawlError>;

    async fn title(&self) -> Result<String, CrawlError>;

    /// URL of the page currently loaded
    async fn current_url(&self) -> Result<String, CrawlError>;

    /// Interactive elements (`input`, `button`, `a`) and outgoing links
    async fn extract_elements(&self) -> Result<PageElements, CrawlError>;

    /// Record XHR/fetch traffic for `window`, clicking `trigger` first if given
    async fn capture_network_activity(
        &self,
        trigger: Option<String>,
        window: Duration,
    ) -> Result<Vec<ApiCallRecord>, CrawlError>;

    /// Full-page PNG
    async fn screenshot(&self) -> Result<Vec<u8>, CrawlError>;

    /// Type into the element matching `selector`
    async fn fill(&self, selector: &str, value: &str) -> Result<(), CrawlError>;

    async fn click(&self, selector: &str) -> Result<(), CrawlError>;

    /// Wait up to `timeout` for `selector` to appear
    async fn element_exists(&self, selector: &str, timeout: Duration) -> Result<bool, CrawlError>;

    /// Release the underlying browser; further calls fail
    async fn close(&mut self) -> Result<(), CrawlError>;
}

/// Opens a fresh, isolated [`BrowserSession`] for each task attempt
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, CrawlError>;
}

/// Result of [`Authenticator::ensure_session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    AlreadyAuthenticated,
    FreshlyAuthenticated,
}

/// Logs a browser session into the target site
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the login flow and return the API traffic the form submission caused
    ///
    /// Any failure is an authentication error.
    async fn login(
        &self,
        session: &dyn BrowserSession,
        credentials: &Credentials,
    ) -> Result<Vec<ApiCallRecord>, CrawlError>;

    /// Log in only if the session is not logged in already
    async fn ensure_session(&self, session: &dyn BrowserSession) -> Result<AuthState, CrawlError>;
}
