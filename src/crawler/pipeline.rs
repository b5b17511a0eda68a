use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{BrowserSession, SessionFactory};
use crate::cli::config::CrawlerConfig;
use crate::crawler::error::CrawlError;
use crate::crawler::frontier::normalize_url;
use crate::crawler::scheduler::AbortSignal;
use crate::crawler::task::{
    ApiCallRecord, CrawlMode, CrawlTask, ElementRecord, InteractionChange, InteractionRecord, PageResult,
};
use crate::storage::layout;
use crate::storage::OutputStore;

/// Per-page behaviour of the executor
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: CrawlMode,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    pub capture_window: Duration,
    pub trigger_selector: Option<String>,
    pub api_scope: Option<String>,
    pub interact_with_buttons: bool,
    pub max_interactions: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        let browser = &config.browser;
        Self {
            mode: config.crawler.mode,
            navigation_timeout: Duration::from_millis(browser.navigation_timeout_ms),
            settle_delay: Duration::from_millis(browser.settle_delay_ms),
            capture_window: Duration::from_millis(browser.capture_window_ms),
            trigger_selector: browser.trigger_selector.clone(),
            api_scope: browser.api_scope.clone(),
            interact_with_buttons: browser.interact_with_buttons,
            max_interactions: browser.max_interactions,
        }
    }
}

/// Runs the navigate, extract, monitor, screenshot and persist phases for one task attempt
///
/// Navigation, extraction and capture failures end the attempt with a
/// classified error. Screenshot and persistence failures only add warnings.
/// Discovered links are returned in the result; the executor never touches
/// the frontier.
pub struct PipelineExecutor {
    sessions: Arc<dyn SessionFactory>,
    store: Arc<dyn OutputStore>,
    settings: PipelineSettings,
}

impl PipelineExecutor {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        store: Arc<dyn OutputStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            sessions,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Site the URL's result is aggregated under
    pub fn site_for(&self, url: &str) -> String {
        layout::site_key(url, self.settings.mode)
    }

    /// Execute one attempt of `task` in a fresh browser session
    pub async fn execute(&self, task: &CrawlTask, abort: &AbortSignal) -> Result<PageResult, CrawlError> {
        let page_url = validate_url(&task.url)?;

        let mut session = self.sessions.open().await?;
        let outcome = self.run_phases(session.as_ref(), task, &page_url, abort).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close session for {}: {}", task.url, e);
        }

        outcome
    }

    /// The phases themselves, against an already open session
    pub async fn run_phases(
        &self,
        session: &dyn BrowserSession,
        task: &CrawlTask,
        page_url: &Url,
        abort: &AbortSignal,
    ) -> Result<PageResult, CrawlError> {
        let cancelled = || CrawlError::Cancelled {
            url: task.url.clone(),
        };

        // Phase 1: navigate
        info!("Navigating to {} (attempt {})", task.url, task.attempt);
        session.goto(&task.url, self.settings.navigation_timeout).await?;

        if abort.is_aborted() {
            return Err(cancelled());
        }

        // Phase 2: extract elements
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
        let page = session.extract_elements().await?;
        let title = session.title().await?;
        debug!("Found {} elements and {} links on {}", page.elements.len(), page.links.len(), task.url);

        if abort.is_aborted() {
            return Err(cancelled());
        }

        // Phase 3: monitor API calls
        let scope = self.api_scope(page_url);
        let captured = session
            .capture_network_activity(self.settings.trigger_selector.clone(), self.settings.capture_window)
            .await?;
        let api_calls = filter_scope(captured, &scope);
        debug!("Captured {} API calls within {}", api_calls.len(), scope);

        let site = self.site_for(&task.url);
        let mut result = PageResult {
            url: task.url.clone(),
            site,
            title,
            elements: page.elements,
            api_calls,
            links: page.links,
            interactions: Vec::new(),
            screenshot_path: None,
            warnings: Vec::new(),
            error: None,
            attempts: task.attempt,
            crawled_at: Utc::now(),
        };

        // Phase 4: screenshot, of the page as loaded
        self.capture_screenshot(session, task, &mut result).await;

        if self.settings.mode == CrawlMode::Recursive
            && self.settings.interact_with_buttons
            && !abort.is_aborted()
        {
            let interactions = self.interact(session, task, &result.elements, &scope, abort).await;
            result
                .api_calls
                .extend(interactions.iter().flat_map(|i| i.api_calls.iter().cloned()));
            result.interactions = interactions;
        }

        // Phase 5: persist
        self.persist(&mut result).await;

        Ok(result)
    }

    /// Build and persist the result of a task that gave up
    pub async fn record_failure(&self, task: &CrawlTask, error: &CrawlError) -> PageResult {
        let mut result = PageResult::failed(task, self.site_for(&task.url), error);
        let path = layout::page_dir(&result.site, &result.url).join("page.json");

        if let Err(e) = self.write_artifact(path, &result).await {
            warn!("Failed to persist failure of {}: {}", task.url, e);
            result.warnings.push(e.to_string());
        }

        result
    }

    fn api_scope(&self, page_url: &Url) -> String {
        self.settings
            .api_scope
            .clone()
            .unwrap_or_else(|| page_url.origin().ascii_serialization())
    }

    /// Click addressable buttons one by one, recording the traffic each causes
    async fn interact(
        &self,
        session: &dyn BrowserSession,
        task: &CrawlTask,
        elements: &[ElementRecord],
        scope: &str,
        abort: &AbortSignal,
    ) -> Vec<InteractionRecord> {
        let mut seen = HashSet::new();
        let triggers: Vec<String> = elements
            .iter()
            .filter(|element| element.tag_name == "button")
            .filter_map(|element| element.selector())
            .filter(|selector| seen.insert(selector.clone()))
            .take(self.settings.max_interactions)
            .collect();

        let mut records = Vec::with_capacity(triggers.len());

        for trigger in triggers {
            if abort.is_aborted() {
                break;
            }

            debug!("Clicking {} on {}", trigger, task.url);
            let mut record = InteractionRecord {
                timestamp: Utc::now(),
                source_url: task.url.clone(),
                trigger: trigger.clone(),
                api_calls: Vec::new(),
                change: None,
                error: None,
            };

            match session
                .capture_network_activity(Some(trigger), self.settings.capture_window)
                .await
            {
                Ok(calls) => record.api_calls = filter_scope(calls, scope),
                Err(e) => {
                    debug!("Interaction failed on {}: {}", task.url, e);
                    record.error = Some(e.to_string());
                    records.push(record);
                    continue;
                }
            }

            record.change = match session.current_url().await {
                Ok(current) if normalize_url(&current) != normalize_url(&task.url) => {
                    Some(InteractionChange::FullPageNavigation { new_url: current })
                }
                Ok(_) => Some(InteractionChange::InPage),
                Err(e) => {
                    debug!("Could not read URL after interaction: {}", e);
                    None
                }
            };

            let navigated = matches!(record.change, Some(InteractionChange::FullPageNavigation { .. }));
            records.push(record);

            if navigated {
                if let Err(e) = session.goto(&task.url, self.settings.navigation_timeout).await {
                    warn!("Could not return to {} after interaction, stopping: {}", task.url, e);
                    break;
                }
            }
        }

        records
    }

    async fn capture_screenshot(&self, session: &dyn BrowserSession, task: &CrawlTask, result: &mut PageResult) {
        let bytes = match session.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Screenshot of {} failed: {}", task.url, e);
                result.warnings.push(e.to_string());
                return;
            }
        };

        let path = layout::screenshot_path(&result.site, &task.parent_path, &task.url);
        match self.store.write_binary(&path, &bytes).await {
            Ok(()) => result.screenshot_path = Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("Failed to save screenshot of {}: {}", task.url, e);
                result.warnings.push(e.to_string());
            }
        }
    }

    async fn persist(&self, result: &mut PageResult) {
        let dir = layout::page_dir(&result.site, &result.url);

        let mut writes = vec![
            self.write_artifact(dir.join("elements.json"), &result.elements).await,
            self.write_artifact(dir.join("api_calls.json"), &result.api_calls).await,
        ];
        if !result.interactions.is_empty() {
            writes.push(
                self.write_artifact(dir.join("interactions.json"), &result.interactions)
                    .await,
            );
        }

        for error in writes.into_iter().filter_map(Result::err) {
            warn!("{}", error);
            result.warnings.push(error.to_string());
        }

        // Written last so it carries the warnings collected so far
        if let Err(e) = self.write_artifact(dir.join("page.json"), &*result).await {
            warn!("{}", e);
            result.warnings.push(e.to_string());
        }
    }

    async fn write_artifact<T: Serialize + ?Sized>(&self, path: PathBuf, value: &T) -> Result<(), CrawlError> {
        let json = serde_json::to_value(value)
            .map_err(|e| CrawlError::Persistence(format!("Failed to serialize {}: {}", path.display(), e)))?;
        self.store.write_json(&path, &json).await
    }
}

/// Only http(s) URLs can be crawled; anything else is a permanent failure
pub fn validate_url(url: &str) -> Result<Url, CrawlError> {
    let parsed = Url::parse(url).map_err(|e| CrawlError::malformed(url, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CrawlError::malformed(url, format!("unsupported scheme '{}'", other))),
    }
}

fn filter_scope(calls: Vec<ApiCallRecord>, scope: &str) -> Vec<ApiCallRecord> {
    calls.into_iter().filter(|call| call.url.starts_with(scope)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockBrowserSession;
    use crate::crawler::error::ErrorClass;
    use crate::crawler::task::{ApiCallKind, PageElements};
    use crate::storage::output::MockOutputStore;
    use async_trait::async_trait;
    use mockall::predicate::*;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoSessions;

    #[async_trait]
    impl SessionFactory for NoSessions {
        async fn open(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
            Err(CrawlError::Session("no browser in unit tests".to_string()))
        }
    }

    const PAGE: &str = "https://a.test/home";

    fn settings(mode: CrawlMode) -> PipelineSettings {
        PipelineSettings {
            mode,
            settle_delay: Duration::ZERO,
            capture_window: Duration::ZERO,
            ..PipelineSettings::default()
        }
    }

    fn executor(store: MockOutputStore, mode: CrawlMode) -> PipelineExecutor {
        PipelineExecutor::new(Arc::new(NoSessions), Arc::new(store), settings(mode))
    }

    fn call(url: &str) -> ApiCallRecord {
        ApiCallRecord {
            kind: ApiCallKind::Request,
            url: url.to_string(),
            method: "GET".to_string(),
            status: None,
            headers: None,
        }
    }

    fn button(id: &str) -> ElementRecord {
        let mut element = ElementRecord::new("button");
        element.id = Some(id.to_string());
        element
    }

    fn loaded_page(session: &mut MockBrowserSession, elements: Vec<ElementRecord>) {
        session.expect_goto().with(eq(PAGE), always()).returning(|_, _| Ok(()));
        session.expect_extract_elements().times(1).returning(move || {
            Ok(PageElements {
                elements: elements.clone(),
                links: vec!["https://a.test/about".to_string()],
            })
        });
        session.expect_title().returning(|| Ok("Home".to_string()));
    }

    fn accepting_store() -> MockOutputStore {
        let mut store = MockOutputStore::new();
        store.expect_write_json().returning(|_, _| Ok(()));
        store.expect_write_binary().returning(|_, _| Ok(()));
        store
    }

    async fn run(executor: &PipelineExecutor, session: &MockBrowserSession) -> Result<PageResult, CrawlError> {
        let task = CrawlTask::seed(PAGE);
        let url = Url::parse(PAGE).unwrap();
        executor.run_phases(session, &task, &url, &AbortSignal::new()).await
    }

    #[tokio::test]
    async fn test_all_phases_succeed() {
        let mut session = MockBrowserSession::new();
        loaded_page(&mut session, vec![ElementRecord::new("a"), button("save")]);
        session
            .expect_capture_network_activity()
            .withf(|trigger, _| trigger.is_none())
            .times(1)
            .returning(|_, _| Ok(vec![call("https://a.test/api/items"), call("https://cdn.test/x.js")]));
        session.expect_screenshot().times(1).returning(|| Ok(vec![0x89, 0x50]));

        let mut store = MockOutputStore::new();
        store
            .expect_write_binary()
            .withf(|path, bytes| {
                path.to_path_buf() == layout::screenshot_path("a_test", "", PAGE) && bytes.len() == 2
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let written = Arc::new(AtomicUsize::new(0));
        let counter = written.clone();
        store.expect_write_json().returning(move |path, _| {
            assert!(path.starts_with(layout::page_dir("a_test", PAGE)));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let executor = executor(store, CrawlMode::Flat);
        let result = run(&executor, &session).await.unwrap();

        assert!(result.is_success());
        assert!(!result.is_degraded());
        assert_eq!(result.site, "a_test");
        assert_eq!(result.title, "Home");
        assert_eq!(result.elements.len(), 2);
        assert_eq!(result.api_calls, vec![call("https://a.test/api/items")]);
        assert_eq!(result.links, vec!["https://a.test/about".to_string()]);
        assert!(result.interactions.is_empty(), "flat mode does not click");
        assert!(result.screenshot_path.is_some());
        // elements, api_calls and page
        assert_eq!(written.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_navigation_failure_skips_remaining_phases() {
        let mut session = MockBrowserSession::new();
        session
            .expect_goto()
            .returning(|url, _| Err(CrawlError::navigation(url, "net::ERR_CONNECTION_RESET")));
        session.expect_extract_elements().never();
        session.expect_capture_network_activity().never();
        session.expect_screenshot().never();

        let mut store = MockOutputStore::new();
        store.expect_write_json().never();

        let err = run(&executor(store, CrawlMode::Flat), &session).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(matches!(err, CrawlError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_capture_failure_is_transient() {
        let mut session = MockBrowserSession::new();
        loaded_page(&mut session, Vec::new());
        session
            .expect_capture_network_activity()
            .returning(|_, _| Err(CrawlError::capture(PAGE, "script error")));
        session.expect_screenshot().never();

        let err = run(&executor(accepting_store(), CrawlMode::Flat), &session)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_screenshot_failure_degrades() {
        let mut session = MockBrowserSession::new();
        loaded_page(&mut session, Vec::new());
        session
            .expect_capture_network_activity()
            .returning(|_, _| Ok(Vec::new()));
        session
            .expect_screenshot()
            .returning(|| Err(CrawlError::Screenshot("tab crashed".to_string())));

        let result = run(&executor(accepting_store(), CrawlMode::Flat), &session)
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(result.is_degraded());
        assert!(result.screenshot_path.is_none());
        assert_eq!(result.warnings, vec!["Screenshot failed: tab crashed".to_string()]);
    }

    #[tokio::test]
    async fn test_persistence_failure_degrades() {
        let mut session = MockBrowserSession::new();
        loaded_page(&mut session, vec![ElementRecord::new("input")]);
        session
            .expect_capture_network_activity()
            .returning(|_, _| Ok(Vec::new()));
        session.expect_screenshot().returning(|| Ok(Vec::new()));

        let mut store = MockOutputStore::new();
        store.expect_write_binary().returning(|_, _| Ok(()));
        store
            .expect_write_json()
            .returning(|_, _| Err(CrawlError::Persistence("disk full".to_string())));

        let result = run(&executor(store, CrawlMode::Flat), &session).await.unwrap();

        assert!(result.is_success());
        assert!(result.is_degraded());
        assert_eq!(result.elements.len(), 1, "in-memory data is kept");
        assert_eq!(result.warnings.len(), 3);
    }

    #[tokio::test]
    async fn test_recursive_mode_records_interactions() {
        let mut session = MockBrowserSession::new();
        session.expect_goto().with(eq(PAGE), always()).times(2).returning(|_, _| Ok(()));
        let elements = vec![button("load"), button("next"), button("load"), ElementRecord::new("button")];
        session.expect_extract_elements().returning(move || {
            Ok(PageElements {
                elements: elements.clone(),
                links: Vec::new(),
            })
        });
        session.expect_title().returning(|| Ok("Home".to_string()));
        session
            .expect_capture_network_activity()
            .withf(|trigger, _| trigger.is_none())
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        session
            .expect_capture_network_activity()
            .withf(|trigger, _| trigger.as_deref() == Some("#load"))
            .times(1)
            .returning(|_, _| Ok(vec![call("https://a.test/api/more")]));
        session
            .expect_capture_network_activity()
            .withf(|trigger, _| trigger.as_deref() == Some("#next"))
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        let mut reads = 0;
        session.expect_current_url().times(2).returning(move || {
            reads += 1;
            if reads == 1 {
                Ok(PAGE.to_string())
            } else {
                Ok("https://a.test/page/2".to_string())
            }
        });
        session.expect_screenshot().returning(|| Ok(Vec::new()));

        let executor = executor(accepting_store(), CrawlMode::Recursive);
        let result = run(&executor, &session).await.unwrap();

        assert_eq!(result.site, "a_test__home");
        assert_eq!(result.interactions.len(), 2);
        assert_eq!(result.interactions[0].trigger, "#load");
        assert_eq!(result.interactions[0].change, Some(InteractionChange::InPage));
        assert_eq!(
            result.interactions[1].change,
            Some(InteractionChange::FullPageNavigation {
                new_url: "https://a.test/page/2".to_string()
            })
        );
        assert_eq!(result.api_calls, vec![call("https://a.test/api/more")]);
    }

    #[tokio::test]
    async fn test_screenshot_shows_page_before_interactions() {
        let mut seq = Sequence::new();
        let mut session = MockBrowserSession::new();
        loaded_page(&mut session, vec![button("load")]);
        session
            .expect_capture_network_activity()
            .withf(|trigger, _| trigger.is_none())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Vec::new()));
        session
            .expect_screenshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![1]));
        session
            .expect_capture_network_activity()
            .withf(|trigger, _| trigger.as_deref() == Some("#load"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Vec::new()));
        session
            .expect_current_url()
            .returning(|| Ok(PAGE.to_string()));

        let executor = executor(accepting_store(), CrawlMode::Recursive);
        let result = run(&executor, &session).await.unwrap();

        assert_eq!(result.interactions.len(), 1);
        assert!(result.screenshot_path.is_some());
    }

    #[tokio::test]
    async fn test_abort_stops_before_extraction() {
        let mut session = MockBrowserSession::new();
        session.expect_goto().returning(|_, _| Ok(()));
        session.expect_extract_elements().never();

        let abort = AbortSignal::new();
        abort.abort();

        let executor = executor(accepting_store(), CrawlMode::Flat);
        let task = CrawlTask::seed(PAGE);
        let url = Url::parse(PAGE).unwrap();
        let err = executor.run_phases(&session, &task, &url, &abort).await.unwrap_err();

        assert!(matches!(err, CrawlError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_malformed_url_fails_without_a_session() {
        let executor = executor(MockOutputStore::new(), CrawlMode::Flat);

        let err = executor
            .execute(&CrawlTask::seed("a.test/no-scheme"), &AbortSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::MalformedUrl { .. }));
        assert_eq!(err.class(), ErrorClass::Permanent);

        let err = executor
            .execute(&CrawlTask::seed("ftp://a.test/file"), &AbortSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::MalformedUrl { .. }));
    }

    #[tokio::test]
    async fn test_record_failure_persists_error() {
        let mut store = MockOutputStore::new();
        store
            .expect_write_json()
            .withf(|path, value| path.ends_with("page.json") && value["error"]["kind"] == "navigation")
            .times(1)
            .returning(|_, _| Ok(()));

        let executor = executor(store, CrawlMode::Flat);
        let task = CrawlTask::seed(PAGE).next_attempt().next_attempt();
        let result = executor
            .record_failure(&task, &CrawlError::navigation(PAGE, "timeout"))
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
        assert!(result.elements.is_empty());
    }
}
