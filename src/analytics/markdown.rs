//! Markdown summary generation
//!
//! Per-site summaries mirror the analytics sections (summary metrics, top
//! tags, unique classes, API metrics) with plain-text bar charts. The run
//! summary adds per-URL outcomes when a [`Report`] is available.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::analytics::{AnalyticsAccumulator, AnalyticsSnapshot, ReportRenderer};
use crate::crawler::error::CrawlError;
use crate::crawler::report::{Outcome, Report};
use crate::storage::OutputStore;

/// Width of the longest bar in text charts
const BAR_WIDTH: usize = 20;

/// Writes `analytics.json` and `summary.md` per site and for the whole run
pub struct MarkdownReportRenderer {
    store: Arc<dyn OutputStore>,
    top_entries: usize,
}

impl MarkdownReportRenderer {
    pub fn new(store: Arc<dyn OutputStore>) -> Self {
        Self {
            store,
            top_entries: 10,
        }
    }

    async fn write_text(&self, path: &Path, text: &str) -> Result<(), CrawlError> {
        self.store.write_binary(path, text.as_bytes()).await
    }
}

#[async_trait]
impl ReportRenderer for MarkdownReportRenderer {
    async fn render(&self, snapshot: &AnalyticsSnapshot, report: Option<&Report>) -> Result<Vec<PathBuf>, CrawlError> {
        let mut written = Vec::new();
        let to_json = |value: &AnalyticsAccumulator| {
            serde_json::to_value(value).map_err(|e| CrawlError::Persistence(e.to_string()))
        };

        for (site, accumulator) in &snapshot.sites {
            let mut analytics = to_json(accumulator)?;
            analytics["site"] = serde_json::json!(site);
            analytics["failureRate"] = serde_json::json!(accumulator.failure_rate());
            analytics["complete"] = serde_json::json!(snapshot.complete);

            let json_path = PathBuf::from(site).join("analytics.json");
            self.store.write_json(&json_path, &analytics).await?;
            written.push(json_path);

            let md_path = PathBuf::from(site).join("summary.md");
            self.write_text(&md_path, &format_site_summary(site, accumulator, self.top_entries))
                .await?;
            written.push(md_path);

            info!("Analytics generated for {}", site);
        }

        let snapshot_json =
            serde_json::to_value(snapshot).map_err(|e| CrawlError::Persistence(e.to_string()))?;
        let json_path = PathBuf::from("analytics.json");
        self.store.write_json(&json_path, &snapshot_json).await?;
        written.push(json_path);

        let md_path = PathBuf::from("summary.md");
        self.write_text(&md_path, &format_run_summary(snapshot, report, self.top_entries))
            .await?;
        written.push(md_path);

        Ok(written)
    }
}

/// Formats the analytics of one site as markdown
pub fn format_site_summary(site: &str, analytics: &AnalyticsAccumulator, top: usize) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Site Analytics: {}\n\n", site));

    md.push_str("## Summary Metrics\n\n");
    md.push_str(&format!("- **Pages Crawled**: {}\n", analytics.pages_ingested));
    md.push_str(&format!(
        "- **Failed Pages**: {} ({:.2}%)\n",
        analytics.pages_failed,
        analytics.failure_rate() * 100.0
    ));
    md.push_str(&format!("- **Total Elements**: {}\n", analytics.element_total));
    md.push_str(&format!("- **Unique CSS Classes**: {}\n", analytics.unique_classes.len()));
    md.push_str(&format!(
        "- **Elements Without Attributes**: {}\n",
        analytics.empty_attributes
    ));
    md.push_str(&format!("- **Inline Styles**: {}\n", analytics.inline_styles));
    md.push_str(&format!("- **Total API Calls**: {}\n\n", analytics.api_call_total));

    md.push_str("## Top HTML Tags\n\n");
    push_count_table(&mut md, "Tag", &analytics.top_tags(top));

    md.push_str("## Unique CSS Classes\n\n");
    if analytics.unique_classes.is_empty() {
        md.push_str("_None_\n\n");
    } else {
        let classes: Vec<String> = analytics
            .unique_classes
            .iter()
            .map(|class| format!("`{}`", class))
            .collect();
        md.push_str(&classes.join(", "));
        md.push_str("\n\n");
    }

    md.push_str("## API Metrics\n\n");
    md.push_str("### Methods\n\n");
    let methods: Vec<(&str, u64)> = analytics
        .method_counts
        .iter()
        .map(|(method, count)| (method.as_str(), *count))
        .collect();
    push_count_table(&mut md, "Method", &methods);

    md.push_str("### Top Endpoints\n\n");
    push_count_table(&mut md, "Endpoint", &analytics.top_endpoints(top));

    md
}

/// Formats the run-level summary as markdown
pub fn format_run_summary(snapshot: &AnalyticsSnapshot, report: Option<&Report>, top: usize) -> String {
    let mut md = String::new();

    md.push_str("# Crawl Summary\n\n");

    if let Some(report) = report {
        md.push_str("## Run Information\n\n");
        md.push_str(&format!("- **Run ID**: {}\n", report.run_id));
        md.push_str(&format!("- **Started**: {}\n", report.started_at));
        if let Some(finished) = &report.finished_at {
            md.push_str(&format!("- **Finished**: {}\n", finished));
            md.push_str(&format!("- **Duration**: {} seconds\n", report.duration_secs()));
        }
        md.push_str(&format!("- **Status**: {:?}\n", report.status));
        md.push_str(&format!(
            "- **Tasks**: {} attempted, {} succeeded, {} failed, {} degraded\n",
            report.attempted, report.succeeded, report.failed, report.degraded
        ));
        md.push_str(&format!("- **Total Attempts**: {}\n", report.total_attempts));
        md.push_str(&format!("- **Peak Concurrency**: {}\n\n", report.peak_concurrency));
    }

    if !snapshot.complete {
        md.push_str("> **Note**: the crawl did not drain; these analytics are partial.\n\n");
    }

    let global = &snapshot.global;
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Sites**: {}\n", snapshot.sites.len()));
    md.push_str(&format!("- **Pages**: {}\n", global.pages_ingested));
    md.push_str(&format!(
        "- **Failure Rate**: {:.2}%\n",
        global.failure_rate() * 100.0
    ));
    md.push_str(&format!("- **Total Elements**: {}\n", global.element_total));
    md.push_str(&format!("- **Total API Calls**: {}\n\n", global.api_call_total));

    if !snapshot.sites.is_empty() {
        md.push_str("## Sites\n\n");
        md.push_str("| Site | Pages | Failed | Elements | API Calls |\n");
        md.push_str("|------|-------|--------|----------|-----------|\n");
        for (site, analytics) in &snapshot.sites {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                site,
                analytics.pages_ingested,
                analytics.pages_failed,
                analytics.element_total,
                analytics.api_call_total
            ));
        }
        md.push('\n');
    }

    md.push_str("## Top HTML Tags (all sites)\n\n");
    push_count_table(&mut md, "Tag", &global.top_tags(top));

    if let Some(report) = report {
        if !report.outcomes.is_empty() {
            md.push_str("## Outcomes\n\n");
            md.push_str("| URL | Outcome | Attempts | Notes |\n");
            md.push_str("|-----|---------|----------|-------|\n");
            for outcome in &report.outcomes {
                let (label, notes) = match &outcome.outcome {
                    Outcome::Succeeded => ("succeeded", String::new()),
                    Outcome::RetriedThenSucceeded { .. } => ("retried then succeeded", String::new()),
                    Outcome::Failed { error, .. } => ("failed", error.message.replace('|', "\\|")),
                };
                let notes = if outcome.degraded {
                    "degraded".to_string()
                } else {
                    notes
                };
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    outcome.url,
                    label,
                    outcome.outcome.attempts(),
                    notes
                ));
            }
            md.push('\n');
        }
    }

    md
}

fn push_count_table(md: &mut String, label: &str, rows: &[(&str, u64)]) {
    if rows.is_empty() {
        md.push_str("_None_\n\n");
        return;
    }

    let max = rows.iter().map(|(_, count)| *count).max().unwrap_or(1).max(1);

    md.push_str(&format!("| {} | Count | |\n", label));
    md.push_str("|---|---|---|\n");
    for (name, count) in rows {
        md.push_str(&format!("| {} | {} | {} |\n", name, count, bar(*count, max)));
    }
    md.push('\n');
}

/// Text bar scaled so `max` fills [`BAR_WIDTH`]
fn bar(value: u64, max: u64) -> String {
    let width = ((value as f64 / max as f64) * BAR_WIDTH as f64).round() as usize;
    "█".repeat(width.max(usize::from(value > 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::output::MockOutputStore;
    use std::collections::BTreeMap;

    fn analytics() -> AnalyticsAccumulator {
        AnalyticsAccumulator {
            element_total: 3,
            tag_counts: BTreeMap::from([("a".to_string(), 2), ("button".to_string(), 1)]),
            unique_classes: ["btn".to_string()].into_iter().collect(),
            method_counts: BTreeMap::from([("GET".to_string(), 4)]),
            endpoint_counts: BTreeMap::from([("https://a.test/api".to_string(), 4)]),
            api_call_total: 4,
            pages_ingested: 2,
            pages_failed: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_bar() {
        assert_eq!(bar(10, 10).chars().count(), BAR_WIDTH);
        assert_eq!(bar(5, 10).chars().count(), BAR_WIDTH / 2);
        assert_eq!(bar(1, 1000).chars().count(), 1);
        assert_eq!(bar(0, 10), "");
    }

    #[test]
    fn test_site_summary_sections() {
        let md = format_site_summary("a_test", &analytics(), 10);

        assert!(md.starts_with("# Site Analytics: a_test"));
        assert!(md.contains("- **Failed Pages**: 1 (50.00%)"));
        assert!(md.contains("| a | 2 |"));
        assert!(md.contains("`btn`"));
        assert!(md.contains("| GET | 4 |"));
        assert!(md.contains("| https://a.test/api | 4 |"));
    }

    #[test]
    fn test_partial_snapshot_is_flagged() {
        let snapshot = AnalyticsSnapshot {
            complete: false,
            sites: BTreeMap::from([("a_test".to_string(), analytics())]),
            global: analytics(),
        };

        let md = format_run_summary(&snapshot, None, 10);
        assert!(md.contains("analytics are partial"));
        assert!(md.contains("| a_test | 2 | 1 | 3 | 4 |"));
        assert!(!md.contains("## Outcomes"));
    }

    #[tokio::test]
    async fn test_render_writes_site_and_run_artifacts() {
        let mut store = MockOutputStore::new();
        store
            .expect_write_json()
            .withf(|path, value| {
                (path == Path::new("a_test/analytics.json") && value["failureRate"] == 0.5)
                    || (path == Path::new("analytics.json") && value["complete"] == true)
            })
            .times(2)
            .returning(|_, _| Ok(()));
        store
            .expect_write_binary()
            .withf(|path, _| path == Path::new("a_test/summary.md") || path == Path::new("summary.md"))
            .times(2)
            .returning(|_, _| Ok(()));

        let snapshot = AnalyticsSnapshot {
            complete: true,
            sites: BTreeMap::from([("a_test".to_string(), analytics())]),
            global: analytics(),
        };

        let renderer = MarkdownReportRenderer::new(Arc::new(store));
        let written = renderer.render(&snapshot, None).await.unwrap();
        assert_eq!(written.len(), 4);
    }
}
