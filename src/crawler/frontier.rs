use regex::Regex;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::cli::config::CrawlerSettings;
use crate::crawler::task::CrawlTask;

/// Limits on which discovered URLs may be admitted
#[derive(Debug, Clone, Default)]
pub struct FrontierScope {
    /// Compiled regex patterns for URL inclusion
    include_patterns: Vec<Regex>,

    /// Compiled regex patterns for URL exclusion
    exclude_patterns: Vec<Regex>,

    /// Allowed domains for crawling (if empty, any domain is allowed)
    allowed_domains: HashSet<String>,

    /// Deepest link level followed (None = unlimited)
    max_depth: Option<u32>,

    /// Maximum number of URLs claimed (None = unlimited)
    max_pages: Option<usize>,
}

impl FrontierScope {
    /// No restrictions; used for flat seed lists
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build the scope from crawler settings
    pub fn from_settings(settings: &CrawlerSettings) -> Self {
        let compile = |patterns: &[String], kind: &str| -> Vec<Regex> {
            patterns
                .iter()
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!("Invalid {} pattern '{}': {}", kind, pattern, e);
                        None
                    }
                })
                .collect()
        };

        Self {
            include_patterns: compile(&settings.url_patterns.include, "include"),
            exclude_patterns: compile(&settings.url_patterns.exclude, "exclude"),
            allowed_domains: settings
                .allowed_domains
                .iter()
                .map(|domain| domain.to_lowercase())
                .collect(),
            max_depth: Some(settings.max_depth),
            max_pages: Some(settings.max_pages as usize),
        }
    }

    pub fn with_allowed_domain(mut self, domain: &str) -> Self {
        self.allowed_domains.insert(domain.to_lowercase());
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }

    pub fn has_allowed_domains(&self) -> bool {
        !self.allowed_domains.is_empty()
    }

    /// Determine if a discovered task is inside the crawl scope
    fn admits(&self, task: &CrawlTask, normalized: &str) -> bool {
        if let Some(max_depth) = self.max_depth {
            if task.depth > max_depth {
                debug!("Skipping URL beyond max depth {}: {}", max_depth, normalized);
                return false;
            }
        }

        if !self.allowed_domains.is_empty() {
            let host = Url::parse(normalized)
                .ok()
                .and_then(|url| url.host_str().map(str::to_lowercase));

            match host {
                Some(host)
                    if self
                        .allowed_domains
                        .iter()
                        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain))) => {}
                Some(host) => {
                    debug!("Skipping URL from non-allowed domain: {}", host);
                    return false;
                }
                None => {
                    debug!("Skipping URL without host: {}", normalized);
                    return false;
                }
            }
        }

        if self.exclude_patterns.iter().any(|p| p.is_match(normalized)) {
            debug!("Skipping URL matching exclusion pattern: {}", normalized);
            return false;
        }

        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(normalized))
        {
            debug!("Skipping URL not matching any inclusion pattern: {}", normalized);
            return false;
        }

        true
    }
}

/// Result of trying to admit the next pending task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Claimed; the caller now owns the task
    Claimed(CrawlTask),

    /// Already visited, out of scope, or over the page budget; dropped
    Skipped(String),
}

#[derive(Debug, Default)]
struct FrontierState {
    /// Normalized URLs that have been claimed
    visited: HashSet<String>,

    /// Claimed URLs in claim order
    claimed_order: Vec<String>,

    /// Tasks waiting to be claimed
    pending: VecDeque<CrawlTask>,

    /// Claimed tasks that have not settled yet (executing or waiting to retry)
    active: usize,
}

/// Visited set plus pending queue, shared by the scheduler's workers
///
/// Every mutation happens under one lock, so check-and-insert in
/// [`CrawlFrontier::try_claim`] is a single indivisible step.
#[derive(Debug, Default)]
pub struct CrawlFrontier {
    state: Mutex<FrontierState>,
    scope: FrontierScope,
}

impl CrawlFrontier {
    pub fn new(scope: FrontierScope) -> Self {
        Self {
            state: Mutex::new(FrontierState::default()),
            scope,
        }
    }

    /// Claim a URL: true the first time it is seen, false afterwards
    pub async fn try_claim(&self, url: &str) -> bool {
        let normalized = normalize_url(url);
        let mut state = self.state.lock().await;
        Self::claim_locked(&mut state, normalized)
    }

    fn claim_locked(state: &mut FrontierState, normalized: String) -> bool {
        if state.visited.contains(&normalized) {
            debug!("Skipping already seen URL: {}", normalized);
            return false;
        }

        state.visited.insert(normalized.clone());
        state.claimed_order.push(normalized);
        true
    }

    /// Queue discovered tasks; duplicates are filtered when claimed, not here
    pub async fn enqueue(&self, tasks: Vec<CrawlTask>) {
        if tasks.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        state.pending.extend(tasks);
    }

    /// Pop the next pending task, if any
    pub async fn next(&self) -> Option<CrawlTask> {
        self.state.lock().await.pending.pop_front()
    }

    /// Pop pending tasks until one is in scope and can be claimed
    ///
    /// Rejected tasks are dropped. Returns `None` when nothing is pending.
    /// A claimed task counts as active until [`CrawlFrontier::settle`].
    pub async fn next_claimed(&self) -> Option<CrawlTask> {
        let mut state = self.state.lock().await;

        while let Some(task) = state.pending.pop_front() {
            match self.admit_locked(&mut state, task) {
                Admission::Claimed(task) => {
                    state.active += 1;
                    return Some(task);
                }
                Admission::Skipped(reason) => debug!("{}", reason),
            }
        }

        None
    }

    fn admit_locked(&self, state: &mut FrontierState, task: CrawlTask) -> Admission {
        let normalized = normalize_url(&task.url);

        // Seeds are always in scope; only discovered links are filtered
        if task.depth > 0 && !self.scope.admits(&task, &normalized) {
            return Admission::Skipped(format!("Out of scope: {}", task.url));
        }

        if let Some(max_pages) = self.scope.max_pages {
            if state.visited.len() >= max_pages && !state.visited.contains(&normalized) {
                return Admission::Skipped(format!("Page budget of {} reached: {}", max_pages, task.url));
            }
        }

        if Self::claim_locked(state, normalized) {
            Admission::Claimed(task)
        } else {
            Admission::Skipped(format!("Already visited: {}", task.url))
        }
    }

    /// Mark a previously claimed task as finished for good
    pub async fn settle(&self) {
        let mut state = self.state.lock().await;
        state.active = state.active.saturating_sub(1);
    }

    /// Nothing pending and nothing claimed-but-unsettled
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty() && state.active == 0
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn visited_count(&self) -> usize {
        self.state.lock().await.visited.len()
    }

    /// Claimed URLs in the order they were claimed
    pub async fn discovered_urls(&self) -> Vec<String> {
        self.state.lock().await.claimed_order.clone()
    }

    /// Drop everything still pending (used on abort)
    pub async fn clear_pending(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }
}

/// Normalize a URL to avoid duplicates due to minor differences
///
/// Lower-cases the host, drops default ports and fragments, and sorts
/// query parameters. Unparseable input is returned unchanged so that it
/// still dedups against itself.
pub fn normalize_url(url: &str) -> String {
    let mut normalized = match Url::parse(url.trim()) {
        Ok(url) => url,
        Err(_) => return url.trim().to_string(),
    };

    if let Some(port) = normalized.port() {
        if (normalized.scheme() == "http" && port == 80)
            || (normalized.scheme() == "https" && port == 443)
        {
            let _ = normalized.set_port(None);
        }
    }

    if let Some(query) = normalized.query() {
        if query.is_empty() {
            normalized.set_query(None);
        } else {
            let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            params.sort_by(|a, b| {
                let key = |p: &str| p.split('=').next().unwrap_or("").to_string();
                key(a).cmp(&key(b))
            });
            let sorted = params.join("&");
            normalized.set_query(Some(&sorted));
        }
    }

    normalized.set_fragment(None);
    normalized.to_string()
}
