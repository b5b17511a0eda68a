use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::MarkdownReportRenderer;
use crate::cli::config::CrawlerConfig;
use crate::cli::RunOptions;
use crate::crawler::controller::{CrawlerController, RunSummary};
use crate::crawler::report::{Outcome, RunStatus};
use crate::crawler::task::CrawlMode;
use crate::storage::OutputStoreFactory;

/// Crawl every URL of a newline-delimited list
pub async fn crawl(urls_file: Option<String>, options: RunOptions) -> Result<()> {
    let mut config = load_config(&options)?;
    config.crawler.mode = CrawlMode::Flat;
    if let Some(path) = urls_file {
        config.crawler.urls_file = path;
    }

    run(config).await
}

/// Crawl a site recursively from `base_url`
pub async fn scan(base_url: String, depth: Option<u32>, limit: Option<u32>, options: RunOptions) -> Result<()> {
    let mut config = load_config(&options)?;
    config.crawler.mode = CrawlMode::Recursive;
    config.crawler.base_url = Some(base_url);

    // Override configuration with command line parameters if provided
    if let Some(d) = depth {
        config.crawler.max_depth = d;
    }

    if let Some(l) = limit {
        config.crawler.max_pages = l;
    }

    run(config).await
}

/// Rebuild analytics and summaries from page captures on disk
pub async fn report(output_dir: String) -> Result<()> {
    let store = OutputStoreFactory::create(&output_dir)
        .await
        .context(format!("Failed to open output directory: {}", output_dir))?;
    let renderer = MarkdownReportRenderer::new(store.clone());

    let snapshot = CrawlerController::rebuild_report(store, &renderer).await?;

    println!("Sites: {}", snapshot.sites.len());
    println!("Pages: {}", snapshot.global.pages_ingested);
    println!("Failed Pages: {}", snapshot.global.pages_failed);
    println!("Summary written to {}/summary.md", output_dir);

    Ok(())
}

/// Profile, then environment, then command line flags
fn load_config(options: &RunOptions) -> Result<CrawlerConfig> {
    let mut config = match &options.profile {
        Some(profile) => CrawlerConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => CrawlerConfig::load_default().context("Failed to load default configuration")?,
    };

    config.apply_env();

    if let Some(dir) = &options.output_dir {
        config.output.output_dir = dir.clone();
    }
    if let Some(limit) = options.concurrency {
        config.crawler.concurrency_limit = limit;
    }
    if options.headful {
        config.browser.headless = false;
    }
    if options.login {
        config.login.required = true;
    }

    Ok(config)
}

async fn run(config: CrawlerConfig) -> Result<()> {
    let controller = CrawlerController::new(config).await?;
    let seeds = controller.seed_urls()?;

    let abort = controller.abort_signal();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight pages");
            abort.abort();
        }
    });

    let summary = controller.run(seeds).await;
    ctrl_c.abort();
    let summary = summary?;

    print_summary(&summary, &controller.config().output.output_dir);

    match summary.report.status {
        RunStatus::Completed => info!("Crawl completed"),
        RunStatus::PartialFailure => warn!("Crawl finished with {} failed pages", summary.report.failed),
        RunStatus::Cancelled => warn!("Crawl cancelled; reports cover the pages finished so far"),
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, output_dir: &str) {
    let report = &summary.report;

    println!("Run ID: {}", report.run_id);
    println!("Status: {:?}", report.status);
    println!(
        "Pages: {} attempted, {} succeeded, {} failed, {} degraded",
        report.attempted, report.succeeded, report.failed, report.degraded
    );
    println!("Retries: {}", report.retries);
    println!("Peak Concurrency: {}", report.peak_concurrency);

    let failures: Vec<_> = report
        .outcomes
        .iter()
        .filter_map(|outcome| match &outcome.outcome {
            Outcome::Failed { attempts, error } => Some((&outcome.url, attempts, error)),
            _ => None,
        })
        .collect();

    if !failures.is_empty() {
        println!("Failed URLs:");
        for (url, attempts, error) in failures {
            println!("  - {} after {} attempts: {}", url, attempts, error.message);
        }
    }

    println!("Output written to {}", output_dir);
    for artifact in &summary.artifacts {
        println!("  - {}", artifact.display());
    }
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it from defaults when missing
pub fn manage_profile(profile_name: String) -> Result<()> {
    match CrawlerConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", render_config(&config)?);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = CrawlerConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", render_config(&config)?);

    Ok(())
}

/// YAML view of a configuration with the login password masked
fn render_config(config: &CrawlerConfig) -> Result<String> {
    let mut shown = config.clone();
    if shown.login.password.is_some() {
        shown.login.password = Some("***".to_string());
    }
    Ok(serde_yaml::to_string(&shown)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_config_masks_password() {
        let mut config = CrawlerConfig::default();
        config.login.password = Some("secret".to_string());

        let rendered = render_config(&config).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("***"));
    }
}
