use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::analytics::accumulator::AnalyticsAccumulator;
use crate::crawler::task::PageResult;

/// Finalized (or partial) analytics of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    /// False when taken before the frontier drained
    pub complete: bool,

    /// Per-site accumulators keyed by site identifier
    pub sites: BTreeMap<String, AnalyticsAccumulator>,

    /// All sites merged
    pub global: AnalyticsAccumulator,
}

impl AnalyticsSnapshot {
    pub fn site(&self, site: &str) -> Option<&AnalyticsAccumulator> {
        self.sites.get(site)
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    sites: BTreeMap<String, AnalyticsAccumulator>,
    drained: bool,
}

/// Folds page results into per-site accumulators
///
/// Shared by all workers; each `ingest` holds the lock for one fold.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result into its site's accumulator
    pub async fn ingest(&self, result: &PageResult) {
        let mut state = self.state.lock().await;
        state.sites.entry(result.site.clone()).or_default().fold(result);
        debug!("Ingested {} into {}", result.url, result.site);
    }

    /// Called by the scheduler once no task is pending or in flight
    pub async fn mark_drained(&self) {
        self.state.lock().await.drained = true;
    }

    pub async fn is_drained(&self) -> bool {
        self.state.lock().await.drained
    }

    /// Snapshot of every site plus the cross-site totals
    ///
    /// Before [`ResultAggregator::mark_drained`] the snapshot is flagged incomplete.
    pub async fn finalize(&self) -> AnalyticsSnapshot {
        let state = self.state.lock().await;

        if !state.drained {
            warn!("Finalizing analytics before the crawl drained; snapshot is partial");
        }

        let mut global = AnalyticsAccumulator::default();
        for accumulator in state.sites.values() {
            global.merge(accumulator);
        }

        AnalyticsSnapshot {
            complete: state.drained,
            sites: state.sites.clone(),
            global,
        }
    }

    /// Forget everything ingested so far
    pub async fn reset(&self) {
        *self.state.lock().await = AggregatorState::default();
    }
}
