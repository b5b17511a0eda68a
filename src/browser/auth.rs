use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{AuthState, Authenticator, BrowserSession};
use crate::cli::config::{CrawlerConfig, LoginSelectors};
use crate::crawler::error::CrawlError;
use crate::crawler::task::ApiCallRecord;

/// Username/password pair for the login form
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Fills and submits a login form identified by CSS selectors
#[derive(Debug, Clone)]
pub struct FormAuthenticator {
    login_url: String,
    credentials: Credentials,
    selectors: LoginSelectors,
    marker_timeout: Duration,
    navigation_timeout: Duration,
    capture_window: Duration,
}

impl FormAuthenticator {
    pub fn new(login_url: impl Into<String>, credentials: Credentials, selectors: LoginSelectors) -> Self {
        Self {
            login_url: login_url.into(),
            credentials,
            selectors,
            marker_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(60),
            capture_window: Duration::from_secs(5),
        }
    }

    /// Build from the `login` section; missing URL or credentials is a configuration error
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        let login = &config.login;
        let missing = |name: &str| CrawlError::Configuration(format!("login.{} is required when login is enabled", name));

        let url = login.url.clone().ok_or_else(|| missing("url"))?;
        let username = login.username.clone().ok_or_else(|| missing("username"))?;
        let password = login.password.clone().ok_or_else(|| missing("password"))?;

        Ok(Self {
            login_url: url,
            credentials: Credentials::new(username, password),
            selectors: login.selectors.clone(),
            marker_timeout: Duration::from_millis(login.marker_timeout_ms),
            navigation_timeout: Duration::from_millis(config.browser.navigation_timeout_ms),
            capture_window: Duration::from_millis(config.browser.capture_window_ms),
        })
    }

    pub fn with_timeouts(mut self, marker: Duration, navigation: Duration, capture_window: Duration) -> Self {
        self.marker_timeout = marker;
        self.navigation_timeout = navigation;
        self.capture_window = capture_window;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    pub(crate) async fn open_login_page(&self, session: &dyn BrowserSession) -> Result<(), CrawlError> {
        // Navigation failures keep their transient class
        session
            .goto(&self.login_url, self.navigation_timeout)
            .await
            .map_err(|e| {
                warn!("Could not open login page {}: {}", self.login_url, e);
                e
            })
    }
}

#[async_trait]
impl Authenticator for FormAuthenticator {
    async fn login(
        &self,
        session: &dyn BrowserSession,
        credentials: &Credentials,
    ) -> Result<Vec<ApiCallRecord>, CrawlError> {
        let auth_error = |step: &str, e: CrawlError| CrawlError::Authentication(format!("{}: {}", step, e));

        info!("Filling login form...");
        session
            .fill(&self.selectors.username, &credentials.username)
            .await
            .map_err(|e| auth_error("Could not fill username", e))?;
        session
            .fill(&self.selectors.password, &credentials.password)
            .await
            .map_err(|e| auth_error("Could not fill password", e))?;

        // Submitting goes through network capture so the login traffic is kept
        let api_calls = session
            .capture_network_activity(Some(self.selectors.submit.clone()), self.capture_window)
            .await
            .map_err(|e| auth_error("Could not submit login form", e))?;
        debug!("Captured {} API calls during login", api_calls.len());

        info!("Waiting for login confirmation...");
        match session
            .element_exists(&self.selectors.logged_in_marker, self.marker_timeout)
            .await
        {
            Ok(true) => {
                info!("Login successful");
                Ok(api_calls)
            }
            Ok(false) => Err(CrawlError::Authentication(format!(
                "Logged-in marker {} did not appear within {} ms",
                self.selectors.logged_in_marker,
                self.marker_timeout.as_millis()
            ))),
            Err(e) => Err(auth_error("Could not check login marker", e)),
        }
    }

    async fn ensure_session(&self, session: &dyn BrowserSession) -> Result<AuthState, CrawlError> {
        self.open_login_page(session).await?;

        let logged_in = session
            .element_exists(&self.selectors.logged_in_marker, Duration::ZERO)
            .await
            .unwrap_or_else(|e| {
                warn!("Could not check login marker, assuming logged out: {}", e);
                false
            });

        if logged_in {
            debug!("Session already authenticated");
            return Ok(AuthState::AlreadyAuthenticated);
        }

        self.login(session, &self.credentials).await?;
        Ok(AuthState::FreshlyAuthenticated)
    }
}
