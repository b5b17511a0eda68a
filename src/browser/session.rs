use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, error, warn};

use crate::browser::extract::parse_page;
use crate::browser::script::{CapturedCalls, COLLECT_CAPTURE, INSTALL_CAPTURE};
use crate::browser::{Authenticator, BrowserSession, SessionFactory};
use crate::cli::config::BrowserSettings;
use crate::crawler::error::CrawlError;
use crate::crawler::task::{ApiCallRecord, PageElements};

/// Poll interval for element waits
const WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// Browser session backed by a WebDriver (Chrome) instance
pub struct WebDriverSession {
    /// WebDriver instance, `None` once closed
    driver: Option<WebDriver>,
}

impl WebDriverSession {
    /// Connect to the WebDriver server and start a new browser
    pub async fn connect(settings: &BrowserSettings) -> Result<Self, CrawlError> {
        let session_error = |e: WebDriverError| CrawlError::Session(e.to_string());

        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_arg(&format!(
            "--window-size={},{}",
            settings.viewport.width, settings.viewport.height
        ))
        .map_err(session_error)?;
        caps.add_chrome_arg("--disable-dev-shm-usage").map_err(session_error)?;

        if settings.headless {
            caps.set_headless().map_err(session_error)?;
        }

        let driver = WebDriver::new(&settings.webdriver_url, caps)
            .await
            .map_err(|e| {
                CrawlError::Session(format!(
                    "Failed to connect to WebDriver at {}: {}",
                    settings.webdriver_url, e
                ))
            })?;

        driver
            .set_page_load_timeout(Duration::from_millis(settings.navigation_timeout_ms))
            .await
            .map_err(session_error)?;

        debug!("Browser session initialized (headless: {})", settings.headless);

        Ok(Self { driver: Some(driver) })
    }

    fn driver(&self) -> Result<&WebDriver, CrawlError> {
        self.driver
            .as_ref()
            .ok_or_else(|| CrawlError::Session("Browser session already closed".to_string()))
    }

    async fn page_url(&self) -> String {
        match self.driver() {
            Ok(driver) => driver
                .current_url()
                .await
                .map(|url| url.to_string())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), CrawlError> {
        let driver = self.driver()?;

        debug!("Navigating to: {}", url);
        match tokio::time::timeout(timeout, driver.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CrawlError::navigation(url, e)),
            Err(_) => Err(CrawlError::navigation(
                url,
                format!("timed out after {} ms", timeout.as_millis()),
            )),
        }
    }

    async fn title(&self) -> Result<String, CrawlError> {
        let driver = self.driver()?;
        let url = self.page_url().await;
        driver
            .title()
            .await
            .map_err(|e| CrawlError::extraction(&url, format!("Failed to get page title: {}", e)))
    }

    async fn current_url(&self) -> Result<String, CrawlError> {
        let driver = self.driver()?;
        driver
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(|e| CrawlError::Session(format!("Failed to read current URL: {}", e)))
    }

    async fn extract_elements(&self) -> Result<PageElements, CrawlError> {
        let driver = self.driver()?;
        let url = self.page_url().await;

        let source = driver
            .source()
            .await
            .map_err(|e| CrawlError::extraction(&url, format!("Failed to get page source: {}", e)))?;

        parse_page(&source, &url)
    }

    async fn capture_network_activity(
        &self,
        trigger: Option<String>,
        window: Duration,
    ) -> Result<Vec<ApiCallRecord>, CrawlError> {
        let driver = self.driver()?;
        let url = self.page_url().await;

        driver
            .execute(INSTALL_CAPTURE, Vec::new())
            .await
            .map_err(|e| CrawlError::capture(&url, format!("Failed to install capture script: {}", e)))?;

        if let Some(selector) = &trigger {
            debug!("Clicking {} while capturing API calls", selector);
            let element = driver
                .find(By::Css(selector.as_str()))
                .await
                .map_err(|e| CrawlError::capture(&url, format!("Trigger {} not found: {}", selector, e)))?;
            element
                .click()
                .await
                .map_err(|e| CrawlError::capture(&url, format!("Failed to click {}: {}", selector, e)))?;
        }

        tokio::time::sleep(window).await;

        let collected = driver
            .execute(COLLECT_CAPTURE, vec![serde_json::json!(trigger.is_none())])
            .await
            .and_then(|ret| ret.convert::<CapturedCalls>());

        match collected {
            Ok(calls) => Ok(calls.into_records()),
            // The trigger navigated away and took the capture buffer with it
            Err(e) if trigger.is_some() => {
                debug!("No capture buffer after clicking trigger on {}: {}", url, e);
                Ok(Vec::new())
            }
            Err(e) => Err(CrawlError::capture(&url, format!("Failed to collect API calls: {}", e))),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CrawlError> {
        let driver = self.driver()?;
        driver
            .screenshot_as_png()
            .await
            .map_err(|e| CrawlError::Screenshot(e.to_string()))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), CrawlError> {
        let driver = self.driver()?;
        let element = driver
            .find(By::Css(selector))
            .await
            .map_err(|e| CrawlError::Session(format!("Element not found: {}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| CrawlError::Session(format!("Failed to focus {}: {}", selector, e)))?;
        element
            .send_keys(value)
            .await
            .map_err(|e| CrawlError::Session(format!("Failed to type into {}: {}", selector, e)))
    }

    async fn click(&self, selector: &str) -> Result<(), CrawlError> {
        let driver = self.driver()?;
        driver
            .find(By::Css(selector))
            .await
            .map_err(|e| CrawlError::Session(format!("Element not found: {}: {}", selector, e)))?
            .click()
            .await
            .map_err(|e| CrawlError::Session(format!("Failed to click {}: {}", selector, e)))
    }

    async fn element_exists(&self, selector: &str, timeout: Duration) -> Result<bool, CrawlError> {
        let driver = self.driver()?;
        let query = driver.query(By::Css(selector));

        let exists = if timeout.is_zero() {
            query.nowait().exists().await
        } else {
            query.wait(timeout, WAIT_INTERVAL).exists().await
        };

        exists.map_err(|e| CrawlError::Session(format!("Failed to look up {}: {}", selector, e)))
    }

    async fn close(&mut self) -> Result<(), CrawlError> {
        if let Some(driver) = self.driver.take() {
            driver
                .quit()
                .await
                .map_err(|e| CrawlError::Session(format!("Error closing browser session: {}", e)))?;
            debug!("Browser session closed");
        }
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Quit the driver in the background if a runtime is still around
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = driver.quit().await {
                        error!("Error closing browser session during drop: {}", e);
                    }
                });
            }
        }
    }
}

/// Opens one WebDriver session per task attempt, logging it in when required
pub struct WebDriverSessionFactory {
    settings: BrowserSettings,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl WebDriverSessionFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            authenticator: None,
        }
    }

    /// Run `ensure_session` on every session before handing it out
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// A session that skips the login hook (used for the preflight login)
    pub async fn open_unauthenticated(&self) -> Result<WebDriverSession, CrawlError> {
        WebDriverSession::connect(&self.settings).await
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        let mut session = WebDriverSession::connect(&self.settings).await?;

        if let Some(authenticator) = &self.authenticator {
            if let Err(e) = authenticator.ensure_session(&session).await {
                if let Err(close_error) = session.close().await {
                    warn!("{}", close_error);
                }
                return Err(e);
            }
        }

        Ok(Box::new(session))
    }
}
