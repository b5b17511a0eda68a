pub mod controller;
pub mod error;
pub mod frontier;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod task;

// Re-export common types
pub use controller::CrawlerController;
pub use error::{CrawlError, ErrorClass};
pub use frontier::{CrawlFrontier, FrontierScope};
pub use pipeline::{PipelineExecutor, PipelineSettings};
pub use report::{Outcome, Report, RunStatus, UrlOutcome};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{AbortSignal, TaskScheduler};
pub use task::{CrawlMode, CrawlTask, PageResult};
