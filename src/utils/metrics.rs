use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// Run metrics collector, shared by all workers
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Attempts currently executing
    pub active_tasks: usize,

    /// Highest number of attempts ever executing at once
    pub peak_concurrency: usize,

    /// Attempts started, retries included
    pub total_attempts: usize,

    /// Attempts that produced a page result
    pub successful_attempts: usize,

    /// Attempts that returned an error
    pub failed_attempts: usize,

    /// Retry decisions returned by the retry policy
    pub retry_decisions: usize,

    /// Give-up decisions returned by the retry policy
    pub give_up_decisions: usize,

    /// Attempt durations (URL -> duration in milliseconds)
    pub attempt_durations: HashMap<String, Vec<u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            active_tasks: 0,
            peak_concurrency: 0,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            retry_decisions: 0,
            give_up_decisions: 0,
            attempt_durations: HashMap::new(),
        }
    }
}

impl Metrics {
    /// Total milliseconds spent on a URL across all its attempts
    pub fn duration_ms(&self, url: &str) -> u64 {
        self.attempt_durations
            .get(url)
            .map(|durations| durations.iter().sum())
            .unwrap_or(0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(Metrics::default())),
        }
    }

    /// Record the start of an attempt; returns the number of active tasks
    pub async fn attempt_started(&self) -> usize {
        let mut metrics = self.metrics.lock().await;
        metrics.active_tasks += 1;
        metrics.total_attempts += 1;
        metrics.peak_concurrency = metrics.peak_concurrency.max(metrics.active_tasks);
        metrics.active_tasks
    }

    /// Record the end of an attempt; returns the number of active tasks
    pub async fn attempt_finished(&self, url: &str, success: bool, duration_ms: u64) -> usize {
        let mut metrics = self.metrics.lock().await;
        metrics.active_tasks = metrics.active_tasks.saturating_sub(1);

        if success {
            metrics.successful_attempts += 1;
        } else {
            metrics.failed_attempts += 1;
        }

        metrics
            .attempt_durations
            .entry(url.to_string())
            .or_default()
            .push(duration_ms);

        debug!("Attempt on {} took {} ms", url, duration_ms);
        metrics.active_tasks
    }

    /// Record what the retry policy decided
    pub async fn record_decision(&self, retry: bool) {
        let mut metrics = self.metrics.lock().await;
        if retry {
            metrics.retry_decisions += 1;
        } else {
            metrics.give_up_decisions += 1;
        }
    }

    /// Start timing an attempt
    pub fn start_timer(&self) -> AttemptTimer {
        AttemptTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

/// Attempt timer for measuring durations
pub struct AttemptTimer {
    /// Start time of the attempt
    start: Instant,
}

impl AttemptTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
