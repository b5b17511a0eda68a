use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::crawler::task::PageResult;

/// Running analytics for one site
///
/// Every update is a plain increment or set union, so folding the same
/// result twice counts it twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsAccumulator {
    pub element_total: u64,
    pub tag_counts: BTreeMap<String, u64>,
    pub unique_classes: BTreeSet<String>,
    /// Elements with no id, no classes and no attributes
    pub empty_attributes: u64,
    /// Elements carrying a `style` attribute
    pub inline_styles: u64,

    pub api_call_total: u64,
    pub method_counts: BTreeMap<String, u64>,
    pub endpoint_counts: BTreeMap<String, u64>,

    pub pages_ingested: u64,
    pub pages_failed: u64,
}

impl AnalyticsAccumulator {
    /// Fold one page result in; failed results only count as failures
    pub fn fold(&mut self, result: &PageResult) {
        self.pages_ingested += 1;

        if !result.is_success() {
            self.pages_failed += 1;
            return;
        }

        self.element_total += result.elements.len() as u64;
        for element in &result.elements {
            *self.tag_counts.entry(element.tag_name.clone()).or_default() += 1;
            self.unique_classes.extend(element.classes.iter().cloned());

            if element.is_bare() {
                self.empty_attributes += 1;
            }
            if element.has_inline_style() {
                self.inline_styles += 1;
            }
        }

        self.api_call_total += result.api_calls.len() as u64;
        for call in &result.api_calls {
            *self.method_counts.entry(call.method.clone()).or_default() += 1;
            *self.endpoint_counts.entry(call.url.clone()).or_default() += 1;
        }
    }

    /// Add another accumulator's counts to this one
    pub fn merge(&mut self, other: &AnalyticsAccumulator) {
        self.element_total += other.element_total;
        self.empty_attributes += other.empty_attributes;
        self.inline_styles += other.inline_styles;
        self.api_call_total += other.api_call_total;
        self.pages_ingested += other.pages_ingested;
        self.pages_failed += other.pages_failed;
        self.unique_classes.extend(other.unique_classes.iter().cloned());

        for (tag, count) in &other.tag_counts {
            *self.tag_counts.entry(tag.clone()).or_default() += count;
        }
        for (method, count) in &other.method_counts {
            *self.method_counts.entry(method.clone()).or_default() += count;
        }
        for (endpoint, count) in &other.endpoint_counts {
            *self.endpoint_counts.entry(endpoint.clone()).or_default() += count;
        }
    }

    /// Share of ingested pages that failed terminally (0.0 when nothing was ingested)
    pub fn failure_rate(&self) -> f64 {
        if self.pages_ingested == 0 {
            0.0
        } else {
            self.pages_failed as f64 / self.pages_ingested as f64
        }
    }

    pub fn top_tags(&self, limit: usize) -> Vec<(&str, u64)> {
        top_entries(&self.tag_counts, limit)
    }

    pub fn top_endpoints(&self, limit: usize) -> Vec<(&str, u64)> {
        top_entries(&self.endpoint_counts, limit)
    }
}

/// Highest counts first; ties keep key order
fn top_entries(counts: &BTreeMap<String, u64>, limit: usize) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(limit);
    entries
}
