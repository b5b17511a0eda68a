use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::analytics::ResultAggregator;
use crate::crawler::error::CrawlError;
use crate::crawler::frontier::CrawlFrontier;
use crate::crawler::pipeline::PipelineExecutor;
use crate::crawler::report::{Report, UrlOutcome};
use crate::crawler::retry::{RetryDecision, RetryPolicy};
use crate::crawler::task::{CrawlMode, CrawlTask, PageResult};
use crate::utils::MetricsCollector;

/// Run-wide cancellation flag
///
/// Clones share the same flag. Once raised it stays raised.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal is raised
    pub async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender gone; the flag can no longer change
                std::future::pending::<()>().await;
            }
        }
    }
}

/// What a spawned worker reports back to the scheduler loop
enum AttemptEvent {
    /// An attempt ran to completion, successfully or not
    Finished {
        task: CrawlTask,
        outcome: Result<PageResult, CrawlError>,
    },

    /// A retry was waiting for its delay or a slot when the run was aborted
    Interrupted { task: CrawlTask, error: CrawlError },
}

/// State cloned into every spawned attempt
#[derive(Clone)]
struct Worker {
    executor: Arc<PipelineExecutor>,
    metrics: MetricsCollector,
    abort: AbortSignal,
    slots: Arc<Semaphore>,
}

impl Worker {
    /// Run one attempt while holding a concurrency slot
    async fn attempt(self, task: CrawlTask, permit: OwnedSemaphorePermit) -> AttemptEvent {
        let active = self.metrics.attempt_started().await;
        info!(
            "Starting {} (attempt {}). Active tasks: {}",
            task.url, task.attempt, active
        );

        let timer = self.metrics.start_timer();
        let outcome = self.executor.execute(&task, &self.abort).await;
        let active = self
            .metrics
            .attempt_finished(&task.url, outcome.is_ok(), timer.end())
            .await;
        drop(permit);

        debug!("Finished {}. Active tasks: {}", task.url, active);
        AttemptEvent::Finished { task, outcome }
    }

    /// Wait out the retry delay without a slot, then run the next attempt
    async fn retry_after(self, failed: CrawlTask, error: CrawlError, delay: Duration) -> AttemptEvent {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.abort.aborted() => {
                return AttemptEvent::Interrupted { task: failed, error };
            }
        }

        let permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return AttemptEvent::Interrupted { task: failed, error },
            },
            _ = self.abort.aborted() => {
                return AttemptEvent::Interrupted { task: failed, error };
            }
        };

        self.attempt(failed.next_attempt(), permit).await
    }
}

/// Drives tasks from the frontier through the pipeline under a concurrency cap
///
/// At most `concurrency_limit` attempts execute at any time. A task waiting
/// on its retry delay holds no slot. Every task produces exactly one
/// `PageResult` for the aggregator, either its success or its terminal
/// failure.
pub struct TaskScheduler {
    frontier: Arc<CrawlFrontier>,
    executor: Arc<PipelineExecutor>,
    aggregator: Arc<ResultAggregator>,
    retry_policy: RetryPolicy,
    metrics: MetricsCollector,
    abort: AbortSignal,
}

impl TaskScheduler {
    pub fn new(
        frontier: Arc<CrawlFrontier>,
        executor: Arc<PipelineExecutor>,
        aggregator: Arc<ResultAggregator>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            frontier,
            executor,
            aggregator,
            retry_policy,
            metrics: MetricsCollector::new(),
            abort: AbortSignal::new(),
        }
    }

    /// Share an abort signal raised elsewhere (Ctrl-C handler, tests)
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Crawl `seed_urls` (and, in recursive mode, everything they lead to)
    pub async fn run(&self, seed_urls: Vec<String>, concurrency_limit: usize) -> Report {
        let limit = concurrency_limit.max(1);
        let slots = Arc::new(Semaphore::new(limit));
        let mut workers: JoinSet<AttemptEvent> = JoinSet::new();
        let mut report = Report::new(Utc::now());
        let mut abort_handled = false;

        info!(
            "Starting crawl of {} seed URLs with concurrency limit {}",
            seed_urls.len(),
            limit
        );
        self.frontier
            .enqueue(seed_urls.into_iter().map(CrawlTask::seed).collect())
            .await;

        loop {
            if !self.abort.is_aborted() {
                self.admit(&slots, &mut workers).await;
            }

            // Admission only stops short while slots are busy, so an empty
            // set means nothing is pending, running or waiting to retry
            if workers.is_empty() {
                break;
            }

            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(event)) => self.handle(event, &slots, &mut workers, &mut report).await,
                    Some(Err(e)) => {
                        error!("Crawl worker failed: {}", e);
                        self.frontier.settle().await;
                    }
                    None => break,
                },
                _ = self.abort.aborted(), if !abort_handled => {
                    abort_handled = true;
                    let dropped = self.frontier.clear_pending().await;
                    warn!(
                        "Abort requested: dropped {} pending tasks, waiting for {} in flight",
                        dropped,
                        workers.len()
                    );
                }
            }
        }

        let cancelled = self.abort.is_aborted();
        if cancelled {
            self.frontier.clear_pending().await;
        } else if self.frontier.is_drained().await {
            self.aggregator.mark_drained().await;
        }

        let metrics = self.metrics.get_metrics().await;
        report.finish(cancelled, &metrics, self.frontier.discovered_urls().await);

        info!(
            "Crawl finished ({:?}): {} attempted, {} succeeded, {} failed, peak concurrency {}",
            report.status, report.attempted, report.succeeded, report.failed, report.peak_concurrency
        );

        report
    }

    /// Claim pending tasks while slots are free
    async fn admit(&self, slots: &Arc<Semaphore>, workers: &mut JoinSet<AttemptEvent>) {
        loop {
            let permit = match slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match self.frontier.next_claimed().await {
                Some(task) => {
                    let worker = self.worker(slots);
                    workers.spawn(worker.attempt(task, permit));
                }
                None => return,
            }
        }
    }

    async fn handle(
        &self,
        event: AttemptEvent,
        slots: &Arc<Semaphore>,
        workers: &mut JoinSet<AttemptEvent>,
        report: &mut Report,
    ) {
        match event {
            AttemptEvent::Finished {
                task,
                outcome: Ok(result),
            } => {
                if self.executor.settings().mode == CrawlMode::Recursive
                    && !self.abort.is_aborted()
                    && !result.links.is_empty()
                {
                    let children = result.links.iter().map(|link| task.child(link.as_str())).collect();
                    self.frontier.enqueue(children).await;
                }

                info!("Crawled {} ({} elements, {} API calls)", result.url, result.elements.len(), result.api_calls.len());
                self.complete(result, report).await;
            }
            AttemptEvent::Finished {
                task,
                outcome: Err(error),
            } => {
                match self.retry_policy.decide(task.attempt, error.class()) {
                    RetryDecision::Retry(delay) if !self.abort.is_aborted() => {
                        self.metrics.record_decision(true).await;
                        warn!(
                            "Attempt {} for {} failed: {}. Retrying in {} ms",
                            task.attempt,
                            task.url,
                            error,
                            delay.as_millis()
                        );
                        let worker = self.worker(slots);
                        workers.spawn(worker.retry_after(task, error, delay));
                    }
                    _ => {
                        self.metrics.record_decision(false).await;
                        error!(
                            "Giving up on {} after {} attempts: {}",
                            task.url, task.attempt, error
                        );
                        let result = self.executor.record_failure(&task, &error).await;
                        self.complete(result, report).await;
                    }
                }
            }
            AttemptEvent::Interrupted { task, error } => {
                warn!("Retry of {} cancelled, keeping last failure", task.url);
                let result = self.executor.record_failure(&task, &error).await;
                self.complete(result, report).await;
            }
        }
    }

    /// Hand a terminal result to the aggregator and release the task
    async fn complete(&self, result: PageResult, report: &mut Report) {
        self.aggregator.ingest(&result).await;
        report.record(UrlOutcome::from_result(&result));
        self.frontier.settle().await;
    }

    fn worker(&self, slots: &Arc<Semaphore>) -> Worker {
        Worker {
            executor: self.executor.clone(),
            metrics: self.metrics.clone(),
            abort: self.abort.clone(),
            slots: slots.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_signal_is_shared() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_aborted());

        let waiter = tokio::spawn(async move { clone.aborted().await });
        signal.abort();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn test_already_raised_signal_resolves_immediately() {
        let signal = AbortSignal::new();
        signal.abort();
        tokio::time::timeout(Duration::from_millis(100), signal.aborted())
            .await
            .unwrap();
    }
}
