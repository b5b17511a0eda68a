//! Scripted browser and in-memory storage shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use web_inventory::analytics::ResultAggregator;
use web_inventory::browser::{BrowserSession, SessionFactory};
use web_inventory::crawler::task::{ApiCallKind, ApiCallRecord, ElementRecord, PageElements};
use web_inventory::crawler::{
    CrawlError, CrawlFrontier, CrawlMode, FrontierScope, PipelineExecutor, PipelineSettings, RetryPolicy,
    TaskScheduler,
};
use web_inventory::storage::OutputStore;

/// What the scripted browser serves for one URL
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub tags: Vec<&'static str>,
    pub links: Vec<String>,
    pub api_calls: Vec<String>,
    /// Navigation failures served before the page loads
    pub failures: usize,
}

impl ScriptedPage {
    pub fn with_tags(tags: &[&'static str]) -> Self {
        Self {
            tags: tags.to_vec(),
            ..Self::default()
        }
    }

    pub fn linking_to(mut self, links: &[&str]) -> Self {
        self.links = links.iter().map(|link| link.to_string()).collect();
        self
    }

    pub fn calling(mut self, endpoints: &[&str]) -> Self {
        self.api_calls = endpoints.iter().map(|endpoint| endpoint.to_string()).collect();
        self
    }

    pub fn failing(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }
}

/// Browser double that serves [`ScriptedPage`]s and tracks concurrency
#[derive(Debug, Default)]
pub struct ScriptedBrowser {
    pages: Mutex<HashMap<String, ScriptedPage>>,
    navigations: Mutex<HashMap<String, usize>>,
    load_time: Duration,
    open_sessions: AtomicUsize,
    peak_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
}

impl ScriptedBrowser {
    pub fn new(load_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            load_time,
            ..Self::default()
        })
    }

    pub fn serve(&self, url: &str, page: ScriptedPage) {
        self.pages.lock().unwrap().insert(url.to_string(), page);
    }

    /// Times `goto` was called for `url`
    pub fn navigations(&self, url: &str) -> usize {
        self.navigations.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn peak_sessions(&self) -> usize {
        self.peak_sessions.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

/// [`SessionFactory`] wrapper handing out sessions bound to a shared [`ScriptedBrowser`]
#[derive(Debug, Clone)]
pub struct ScriptedBrowserFactory(pub Arc<ScriptedBrowser>);

#[async_trait]
impl SessionFactory for ScriptedBrowserFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        let browser = &self.0;
        browser.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let open = browser.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        browser.peak_sessions.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            browser: browser.clone(),
            current: Mutex::new(None),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    browser: Arc<ScriptedBrowser>,
    current: Mutex<Option<String>>,
    closed: bool,
}

impl ScriptedSession {
    fn page(&self) -> Result<(String, ScriptedPage), CrawlError> {
        let url = self
            .current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CrawlError::Session("no page loaded".to_string()))?;
        let page = self.browser.pages.lock().unwrap().get(&url).cloned().unwrap_or_default();
        Ok((url, page))
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), CrawlError> {
        *self
            .browser
            .navigations
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        tokio::time::sleep(self.browser.load_time).await;

        {
            let mut pages = self.browser.pages.lock().unwrap();
            if let Some(page) = pages.get_mut(url) {
                if page.failures > 0 {
                    page.failures -= 1;
                    return Err(CrawlError::navigation(url, "timed out"));
                }
            }
        }

        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn title(&self) -> Result<String, CrawlError> {
        let (url, _) = self.page()?;
        Ok(format!("Title of {}", url))
    }

    async fn current_url(&self) -> Result<String, CrawlError> {
        Ok(self.page()?.0)
    }

    async fn extract_elements(&self) -> Result<PageElements, CrawlError> {
        let (_, page) = self.page()?;
        Ok(PageElements {
            elements: page.tags.iter().map(|tag| ElementRecord::new(*tag)).collect(),
            links: page.links,
        })
    }

    async fn capture_network_activity(
        &self,
        _trigger: Option<String>,
        _window: Duration,
    ) -> Result<Vec<ApiCallRecord>, CrawlError> {
        let (_, page) = self.page()?;
        Ok(page
            .api_calls
            .into_iter()
            .map(|url| ApiCallRecord {
                kind: ApiCallKind::Request,
                url,
                method: "GET".to_string(),
                status: None,
                headers: None,
            })
            .collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CrawlError> {
        Ok(b"\x89PNG".to_vec())
    }

    async fn fill(&self, _selector: &str, _value: &str) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn element_exists(&self, _selector: &str, _timeout: Duration) -> Result<bool, CrawlError> {
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), CrawlError> {
        if !self.closed {
            self.closed = true;
            self.browser.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Output store keeping every artifact in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    json: Mutex<BTreeMap<PathBuf, serde_json::Value>>,
    binary: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    pub fn json(&self, path: impl AsRef<Path>) -> Option<serde_json::Value> {
        self.json.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn binary(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.binary.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn json_paths(&self) -> Vec<PathBuf> {
        self.json.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl OutputStore for MemoryStore {
    async fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<(), CrawlError> {
        self.json.lock().unwrap().insert(path.to_path_buf(), value.clone());
        Ok(())
    }

    async fn write_binary(&self, path: &Path, bytes: &[u8]) -> Result<(), CrawlError> {
        self.binary.lock().unwrap().insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn ensure_dir(&self, _path: &Path) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn read_json(&self, path: &Path) -> Result<serde_json::Value, CrawlError> {
        self.json
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| CrawlError::Persistence(format!("{} not found", path.display())))
    }

    async fn find_files(&self, path: &Path, file_name: &str) -> Result<Vec<PathBuf>, CrawlError> {
        Ok(self
            .json
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(path) && key.file_name().map_or(false, |name| name == file_name))
            .cloned()
            .collect())
    }
}

/// Pipeline settings with no settle or capture delays
pub fn fast_settings(mode: CrawlMode) -> PipelineSettings {
    PipelineSettings {
        mode,
        settle_delay: Duration::ZERO,
        capture_window: Duration::ZERO,
        interact_with_buttons: false,
        ..PipelineSettings::default()
    }
}

/// Everything a scheduler test needs to inspect afterwards
pub struct Harness {
    pub browser: Arc<ScriptedBrowser>,
    pub store: Arc<MemoryStore>,
    pub frontier: Arc<CrawlFrontier>,
    pub aggregator: Arc<ResultAggregator>,
    pub scheduler: TaskScheduler,
}

pub fn harness(
    browser: Arc<ScriptedBrowser>,
    mode: CrawlMode,
    scope: FrontierScope,
    retry_policy: RetryPolicy,
) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let frontier = Arc::new(CrawlFrontier::new(scope));
    let aggregator = Arc::new(ResultAggregator::new());
    let executor = Arc::new(PipelineExecutor::new(
        Arc::new(ScriptedBrowserFactory(browser.clone())),
        store.clone(),
        fast_settings(mode),
    ));

    let scheduler = TaskScheduler::new(frontier.clone(), executor, aggregator.clone(), retry_policy);

    Harness {
        browser,
        store,
        frontier,
        aggregator,
        scheduler,
    }
}
