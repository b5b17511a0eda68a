pub mod accumulator;
pub mod aggregator;
pub mod markdown;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::crawler::error::CrawlError;
use crate::crawler::report::Report;

// Re-export common types
pub use accumulator::AnalyticsAccumulator;
pub use aggregator::{AnalyticsSnapshot, ResultAggregator};
pub use markdown::MarkdownReportRenderer;

/// Turns finalized analytics into report artifacts
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render once after finalize; returns the paths written, relative to the output root
    async fn render(&self, snapshot: &AnalyticsSnapshot, report: Option<&Report>) -> Result<Vec<PathBuf>, CrawlError>;
}
