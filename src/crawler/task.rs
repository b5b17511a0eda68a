use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::crawler::error::{CrawlError, ErrorClass};

/// Whether discovered links are followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Only the seed list is processed
    #[default]
    Flat,

    /// Links found on each page are fed back into the frontier
    Recursive,
}

/// Represents a crawling task to be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTask {
    /// URL to crawl
    pub url: String,

    /// Page key of the page that led to this URL (empty for seed URLs)
    pub parent_path: String,

    /// Current depth in the crawl tree (0 for seed URLs)
    pub depth: u32,

    /// Attempt number, starting at 1
    pub attempt: u32,
}

impl CrawlTask {
    /// Create a task for a seed URL
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            parent_path: String::new(),
            depth: 0,
            attempt: 1,
        }
    }

    /// Create a task for a link discovered on this task's page
    pub fn child(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            parent_path: crate::storage::layout::page_key(&self.url),
            depth: self.depth + 1,
            attempt: 1,
        }
    }

    /// The same task, scheduled for another attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// An interactive element captured from a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    pub tag_name: String,
    pub id: Option<String>,
    pub classes: BTreeSet<String>,
    pub attributes: BTreeMap<String, String>,
}

impl ElementRecord {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            id: None,
            classes: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// A CSS selector that addresses this element, if it can be addressed uniquely enough
    pub fn selector(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return Some(format!("#{}", id));
        }

        ["data-qa", "data-testid", "name"]
            .iter()
            .find_map(|attr| {
                self.attributes
                    .get(*attr)
                    .filter(|value| !value.is_empty() && !value.contains('"'))
                    .map(|value| format!("{}[{}=\"{}\"]", self.tag_name, attr, value))
            })
    }

    /// No id, no classes, no attributes at all
    pub fn is_bare(&self) -> bool {
        self.id.is_none() && self.classes.is_empty() && self.attributes.is_empty()
    }

    pub fn has_inline_style(&self) -> bool {
        self.attributes.contains_key("style")
    }
}

/// Direction of a captured API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiCallKind {
    Request,
    Response,
}

/// A single XHR/fetch request or response observed on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallRecord {
    #[serde(rename = "type")]
    pub kind: ApiCallKind,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Elements and links read from a loaded page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageElements {
    pub elements: Vec<ElementRecord>,
    pub links: Vec<String>,
}

/// What a clicked element did to the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InteractionChange {
    #[serde(rename_all = "camelCase")]
    FullPageNavigation { new_url: String },
    InPage,
}

/// Outcome of clicking one element while capturing traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub timestamp: DateTime<Utc>,
    pub source_url: String,
    pub trigger: String,
    pub api_calls: Vec<ApiCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<InteractionChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error details attached to a terminally failed page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: String,
    pub class: ErrorClass,
    pub message: String,
}

impl From<&CrawlError> for ErrorInfo {
    fn from(error: &CrawlError) -> Self {
        Self {
            kind: error.kind().to_string(),
            class: error.class(),
            message: error.to_string(),
        }
    }
}

/// Result of a completed (or terminally failed) crawl task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// URL that was crawled
    pub url: String,

    /// Site identifier the page is aggregated under
    pub site: String,

    /// Page title (empty when the page never loaded)
    pub title: String,

    pub elements: Vec<ElementRecord>,

    pub api_calls: Vec<ApiCallRecord>,

    /// Links discovered on the page
    pub links: Vec<String>,

    #[serde(default)]
    pub interactions: Vec<InteractionRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,

    /// Field-level problems that did not fail the page (screenshot, persistence)
    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Number of attempts it took to produce this result
    pub attempts: u32,

    /// Timestamp when the page was crawled
    pub crawled_at: DateTime<Utc>,
}

impl PageResult {
    /// Result for a task that gave up: error populated, data fields empty
    pub fn failed(task: &CrawlTask, site: impl Into<String>, error: &CrawlError) -> Self {
        Self {
            url: task.url.clone(),
            site: site.into(),
            title: String::new(),
            elements: Vec::new(),
            api_calls: Vec::new(),
            links: Vec::new(),
            interactions: Vec::new(),
            screenshot_path: None,
            warnings: Vec::new(),
            error: Some(ErrorInfo::from(error)),
            attempts: task.attempt,
            crawled_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Screenshot or persistence trouble was recorded
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}
