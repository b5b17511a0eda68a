use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::analytics::{AnalyticsSnapshot, MarkdownReportRenderer, ReportRenderer, ResultAggregator};
use crate::browser::{Authenticator, BrowserSession, FormAuthenticator, SessionFactory, WebDriverSessionFactory};
use crate::cli::config::{read_url_list, CrawlerConfig};
use crate::crawler::error::CrawlError;
use crate::crawler::frontier::{CrawlFrontier, FrontierScope};
use crate::crawler::pipeline::{PipelineExecutor, PipelineSettings};
use crate::crawler::report::Report;
use crate::crawler::retry::RetryPolicy;
use crate::crawler::scheduler::{AbortSignal, TaskScheduler};
use crate::crawler::task::{CrawlMode, PageResult};
use crate::storage::{OutputStore, OutputStoreFactory};

/// Page captures read concurrently when rebuilding analytics
const REBUILD_CONCURRENCY: usize = 8;

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunSummary {
    pub report: Report,
    pub analytics: AnalyticsSnapshot,
    /// Report artifacts, relative to the output directory
    pub artifacts: Vec<PathBuf>,
}

/// Wires configuration, browser sessions, storage and reporting into a crawl run
pub struct CrawlerController {
    config: CrawlerConfig,
    store: Arc<dyn OutputStore>,
    sessions: Arc<dyn SessionFactory>,
    renderer: Arc<dyn ReportRenderer>,
    abort: AbortSignal,
}

impl CrawlerController {
    /// Create a new crawler controller with the given configuration
    ///
    /// Validates the configuration and, when login is required, performs one
    /// login ahead of crawling. Either failing aborts before any task starts.
    pub async fn new(config: CrawlerConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let store = OutputStoreFactory::create(&config.output.output_dir)
            .await
            .context("Failed to prepare output directory")?;

        let mut factory = WebDriverSessionFactory::new(config.browser.clone());

        if config.login.required {
            let authenticator = Arc::new(FormAuthenticator::from_config(&config)?);
            Self::preflight_login(&factory, &authenticator, store.as_ref())
                .await
                .context("Login failed; aborting run")?;
            factory = factory.with_authenticator(authenticator);
        }

        let renderer = Arc::new(MarkdownReportRenderer::new(store.clone()));
        Ok(Self::with_components(config, store, Arc::new(factory), renderer))
    }

    /// Assemble a controller from explicit components
    pub fn with_components(
        config: CrawlerConfig,
        store: Arc<dyn OutputStore>,
        sessions: Arc<dyn SessionFactory>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            renderer,
            abort: AbortSignal::new(),
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Signal that cancels the run when raised
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Log in once and keep the login traffic with the other captures
    async fn preflight_login(
        factory: &WebDriverSessionFactory,
        authenticator: &FormAuthenticator,
        store: &dyn OutputStore,
    ) -> Result<(), CrawlError> {
        info!("Logging in at {}", authenticator.login_url());
        let mut session = factory.open_unauthenticated().await?;

        let outcome = match authenticator.open_login_page(&session).await {
            Ok(()) => authenticator.login(&session, authenticator.credentials()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = session.close().await {
            warn!("Failed to close login session: {}", e);
        }

        let api_calls = outcome?;
        let value = serde_json::to_value(&api_calls).map_err(|e| CrawlError::Persistence(e.to_string()))?;
        if let Err(e) = store.write_json(Path::new("login/api_calls.json"), &value).await {
            warn!("Failed to save login API calls: {}", e);
        }

        Ok(())
    }

    /// Seed URLs for the configured mode
    pub fn seed_urls(&self) -> Result<Vec<String>> {
        match self.config.crawler.mode {
            CrawlMode::Flat => {
                let path = Path::new(&self.config.crawler.urls_file);
                Ok(read_url_list(path).context("Failed to read URL list")?)
            }
            CrawlMode::Recursive => {
                let base_url = self
                    .config
                    .crawler
                    .base_url
                    .clone()
                    .context("crawler.base_url is required in recursive mode")?;
                Ok(vec![base_url])
            }
        }
    }

    /// Frontier limits; recursive crawls stay on the seed hosts unless domains are configured
    fn frontier_scope(&self, seeds: &[String]) -> FrontierScope {
        if self.config.crawler.mode == CrawlMode::Flat {
            return FrontierScope::unbounded();
        }

        let mut scope = FrontierScope::from_settings(&self.config.crawler);
        if !scope.has_allowed_domains() {
            for host in seeds
                .iter()
                .filter_map(|seed| Url::parse(seed).ok())
                .filter_map(|url| url.host_str().map(str::to_string))
            {
                scope = scope.with_allowed_domain(&host);
            }
        }
        scope
    }

    /// Crawl the seeds, then finalize analytics and write the reports
    pub async fn run(&self, seeds: Vec<String>) -> Result<RunSummary> {
        let mode = self.config.crawler.mode;
        let frontier = Arc::new(CrawlFrontier::new(self.frontier_scope(&seeds)));
        let executor = Arc::new(PipelineExecutor::new(
            self.sessions.clone(),
            self.store.clone(),
            PipelineSettings::from_config(&self.config),
        ));
        let aggregator = Arc::new(ResultAggregator::new());

        let scheduler = TaskScheduler::new(
            frontier,
            executor,
            aggregator.clone(),
            RetryPolicy::from_settings(&self.config.retry),
        )
        .with_abort_signal(self.abort.clone());

        let report = scheduler
            .run(seeds, self.config.crawler.concurrency_limit)
            .await;
        let analytics = aggregator.finalize().await;

        let mut artifacts = match self.renderer.render(&analytics, Some(&report)).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Failed to render reports: {}", e);
                Vec::new()
            }
        };

        let run_report = serde_json::to_value(&report).context("Failed to serialize run report")?;
        self.write_json("run_report.json", &run_report, &mut artifacts).await;

        if mode == CrawlMode::Recursive {
            let discovered = serde_json::json!(report.discovered_urls);
            self.write_json("discovered_urls.json", &discovered, &mut artifacts).await;
        }

        Ok(RunSummary {
            report,
            analytics,
            artifacts,
        })
    }

    async fn write_json(&self, name: &str, value: &serde_json::Value, artifacts: &mut Vec<PathBuf>) {
        let path = PathBuf::from(name);
        match self.store.write_json(&path, value).await {
            Ok(()) => artifacts.push(path),
            Err(e) => warn!("Failed to write {}: {}", name, e),
        }
    }

    /// Rebuild analytics and reports from the page captures already on disk
    pub async fn rebuild_report(
        store: Arc<dyn OutputStore>,
        renderer: &dyn ReportRenderer,
    ) -> Result<AnalyticsSnapshot> {
        let pages = store
            .find_files(Path::new(""), "page.json")
            .await
            .context("Failed to list page captures")?;
        info!("Rebuilding analytics from {} page captures", pages.len());

        let loaded: Vec<(PathBuf, Result<serde_json::Value, CrawlError>)> = stream::iter(pages)
            .map(|path| {
                let store = store.clone();
                async move {
                    let value = store.read_json(&path).await;
                    (path, value)
                }
            })
            .buffer_unordered(REBUILD_CONCURRENCY)
            .collect()
            .await;

        let aggregator = ResultAggregator::new();
        for (path, value) in loaded {
            let result = value.and_then(|value| {
                serde_json::from_value::<PageResult>(value)
                    .map_err(|e| CrawlError::Persistence(e.to_string()))
            });

            match result {
                Ok(result) => aggregator.ingest(&result).await,
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        aggregator.mark_drained().await;
        let snapshot = aggregator.finalize().await;
        renderer
            .render(&snapshot, None)
            .await
            .context("Failed to render reports")?;

        Ok(snapshot)
    }
}
