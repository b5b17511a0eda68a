use std::time::Duration;

use crate::cli::config::RetrySettings;
use crate::crawler::error::ErrorClass;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait the delay, then run the task again with `attempt + 1`
    Retry(Duration),

    /// Record the task as terminally failed
    GiveUp,
}

/// Fixed-delay retry policy for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, Duration::from_millis(settings.delay_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decide after attempt number `attempt` (1-based) failed with `class`
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        match class {
            ErrorClass::Transient if attempt < self.max_attempts => RetryDecision::Retry(self.delay),
            _ => RetryDecision::GiveUp,
        }
    }
}
