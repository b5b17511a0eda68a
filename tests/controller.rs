//! Full runs through the controller: seeds, crawl, analytics and reports

mod common;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{MemoryStore, ScriptedBrowser, ScriptedBrowserFactory, ScriptedPage};
use tempfile::NamedTempFile;
use web_inventory::analytics::MarkdownReportRenderer;
use web_inventory::cli::config::CrawlerConfig;
use web_inventory::crawler::{CrawlMode, CrawlerController, RunStatus};

fn controller(config: CrawlerConfig, browser: Arc<ScriptedBrowser>, store: Arc<MemoryStore>) -> CrawlerController {
    let renderer = Arc::new(MarkdownReportRenderer::new(store.clone()));
    CrawlerController::with_components(config, store, Arc::new(ScriptedBrowserFactory(browser)), renderer)
}

fn quick_config(mode: CrawlMode) -> CrawlerConfig {
    let mut config = CrawlerConfig::default();
    config.crawler.mode = mode;
    config.crawler.concurrency_limit = 2;
    config.browser.settle_delay_ms = 0;
    config.browser.capture_window_ms = 0;
    config.browser.interact_with_buttons = false;
    config.retry.delay_ms = 10;
    config
}

#[tokio::test]
async fn test_flat_run_writes_reports() {
    let mut urls = NamedTempFile::new().unwrap();
    writeln!(urls, "https://a.test/\n\n  https://b.test/  \n").unwrap();

    let browser = ScriptedBrowser::new(Duration::ZERO);
    browser.serve("https://a.test/", ScriptedPage::with_tags(&["a", "a", "button"]));
    browser.serve("https://b.test/", ScriptedPage::with_tags(&["input"]).failing(10));

    let mut config = quick_config(CrawlMode::Flat);
    config.crawler.urls_file = urls.path().display().to_string();

    let store = Arc::new(MemoryStore::default());
    let controller = controller(config, browser, store.clone());

    let seeds = controller.seed_urls().unwrap();
    assert_eq!(seeds, vec!["https://a.test/".to_string(), "https://b.test/".to_string()]);

    let summary = controller.run(seeds).await.unwrap();

    assert_eq!(summary.report.status, RunStatus::PartialFailure);
    assert!(summary.analytics.complete);
    assert_eq!(summary.analytics.sites["a_test"].tag_counts["a"], 2);
    assert_eq!(summary.analytics.sites["b_test"].pages_failed, 1);

    for artifact in ["a_test/summary.md", "summary.md"] {
        assert!(summary.artifacts.contains(&PathBuf::from(artifact)));
        assert!(store.binary(artifact).is_some());
    }
    assert!(summary.artifacts.contains(&PathBuf::from("run_report.json")));
    assert!(store.json("discovered_urls.json").is_none());

    let run_report = store.json("run_report.json").unwrap();
    assert_eq!(run_report["status"], "partial_failure");
    assert_eq!(run_report["succeeded"], 1);
}

#[tokio::test]
async fn test_recursive_run_stays_on_seed_host() {
    let browser = ScriptedBrowser::new(Duration::ZERO);
    browser.serve(
        "https://a.test/",
        ScriptedPage::with_tags(&["a"]).linking_to(&["https://a.test/docs/intro", "https://other.test/"]),
    );
    browser.serve("https://a.test/docs/intro", ScriptedPage::with_tags(&["button"]));

    let mut config = quick_config(CrawlMode::Recursive);
    config.crawler.base_url = Some("https://a.test/".to_string());

    let store = Arc::new(MemoryStore::default());
    let controller = controller(config, browser.clone(), store.clone());

    let seeds = controller.seed_urls().unwrap();
    let summary = controller.run(seeds).await.unwrap();

    assert_eq!(summary.report.status, RunStatus::Completed);
    assert_eq!(summary.report.succeeded, 2);
    assert_eq!(browser.navigations("https://other.test/"), 0);

    assert!(summary.analytics.sites.contains_key("a_test"));
    assert!(summary.analytics.sites.contains_key("a_test__docs"));

    let discovered = store.json("discovered_urls.json").unwrap();
    assert_eq!(discovered.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rebuild_matches_live_run() {
    let browser = ScriptedBrowser::new(Duration::ZERO);
    browser.serve(
        "https://a.test/",
        ScriptedPage::with_tags(&["a", "input"]).calling(&["https://a.test/api/items"]),
    );

    let mut config = quick_config(CrawlMode::Recursive);
    config.crawler.base_url = Some("https://a.test/".to_string());

    let store = Arc::new(MemoryStore::default());
    let controller = controller(config, browser, store.clone());
    let live = controller.run(controller.seed_urls().unwrap()).await.unwrap();

    let renderer = MarkdownReportRenderer::new(store.clone());
    let rebuilt = CrawlerController::rebuild_report(store, &renderer).await.unwrap();

    assert_eq!(rebuilt.sites, live.analytics.sites);
    assert_eq!(rebuilt.global.endpoint_counts["https://a.test/api/items"], 1);
}

#[tokio::test]
async fn test_urls_with_matching_slugs_keep_separate_captures() {
    let browser = ScriptedBrowser::new(Duration::ZERO);
    browser.serve("https://a.test/a-b", ScriptedPage::with_tags(&["a", "a"]));
    browser.serve("https://a.test/a_b", ScriptedPage::with_tags(&["button"]));

    let store = Arc::new(MemoryStore::default());
    let controller = controller(quick_config(CrawlMode::Flat), browser, store.clone());
    let live = controller
        .run(vec!["https://a.test/a-b".to_string(), "https://a.test/a_b".to_string()])
        .await
        .unwrap();

    assert_eq!(live.analytics.global.pages_ingested, 2);
    assert_eq!(live.analytics.global.element_total, 3);

    let renderer = MarkdownReportRenderer::new(store.clone());
    let rebuilt = CrawlerController::rebuild_report(store, &renderer).await.unwrap();

    assert_eq!(rebuilt.global.pages_ingested, 2);
    assert_eq!(rebuilt.global.element_total, 3);
    assert_eq!(rebuilt.sites, live.analytics.sites);
}
