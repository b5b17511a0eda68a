use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crawler::task::{ErrorInfo, PageResult};
use crate::utils::Metrics;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task succeeded
    Completed,

    /// At least one task failed terminally
    PartialFailure,

    /// The abort signal was raised before the frontier drained
    Cancelled,
}

/// Final state of one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    RetriedThenSucceeded { attempts: u32 },
    Failed { attempts: u32, error: ErrorInfo },
}

impl Outcome {
    pub fn from_result(result: &PageResult) -> Self {
        match &result.error {
            Some(error) => Outcome::Failed {
                attempts: result.attempts,
                error: error.clone(),
            },
            None if result.attempts > 1 => Outcome::RetriedThenSucceeded {
                attempts: result.attempts,
            },
            None => Outcome::Succeeded,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Succeeded => 1,
            Outcome::RetriedThenSucceeded { attempts } | Outcome::Failed { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlOutcome {
    pub url: String,
    pub site: String,
    pub outcome: Outcome,
    /// Screenshot or persistence trouble on an otherwise successful page
    pub degraded: bool,
    /// Time spent across all attempts
    pub duration_ms: u64,
}

impl UrlOutcome {
    pub fn from_result(result: &PageResult) -> Self {
        Self {
            url: result.url.clone(),
            site: result.site.clone(),
            outcome: Outcome::from_result(result),
            degraded: result.is_success() && result.is_degraded(),
            duration_ms: 0,
        }
    }
}

/// Summary of a crawl run, returned by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub run_id: Uuid,
    pub status: RunStatus,

    /// Tasks that reached a terminal state
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub degraded: usize,

    /// Attempts started, retries included
    pub total_attempts: usize,

    /// Retry decisions returned by the retry policy
    pub retries: usize,

    /// Highest number of attempts that ever ran at once
    pub peak_concurrency: usize,

    pub outcomes: Vec<UrlOutcome>,

    /// Every URL claimed by the frontier, in claim order
    pub discovered_urls: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Completed,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            degraded: 0,
            total_attempts: 0,
            retries: 0,
            peak_concurrency: 0,
            outcomes: Vec::new(),
            discovered_urls: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    /// Record the terminal outcome of one task
    pub fn record(&mut self, outcome: UrlOutcome) {
        self.attempted += 1;
        if outcome.outcome.is_failure() {
            self.failed += 1;
        } else {
            self.succeeded += 1;
        }
        if outcome.degraded {
            self.degraded += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Close the report once every task has settled
    pub fn finish(&mut self, cancelled: bool, metrics: &Metrics, discovered_urls: Vec<String>) {
        for outcome in &mut self.outcomes {
            outcome.duration_ms = metrics.duration_ms(&outcome.url);
        }

        self.total_attempts = metrics.total_attempts;
        self.retries = metrics.retry_decisions;
        self.peak_concurrency = metrics.peak_concurrency;
        self.discovered_urls = discovered_urls;
        self.finished_at = Some(Utc::now());

        self.status = if cancelled {
            RunStatus::Cancelled
        } else if self.failed > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Completed
        };
    }

    pub fn outcome(&self, url: &str) -> Option<&UrlOutcome> {
        self.outcomes.iter().find(|outcome| outcome.url == url)
    }

    pub fn duration_secs(&self) -> i64 {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
            .unwrap_or(0)
    }
}
