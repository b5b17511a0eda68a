use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the scheduler should treat a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// May succeed on another attempt (timeouts, flaky loads)
    Transient,

    /// No retry can resolve it (bad input, bad configuration, rejected login)
    Permanent,

    /// Auxiliary phase failed; the page result is kept and marked degraded
    Degraded,
}

/// Errors raised while executing a crawl task
#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed URL {url}: {message}")]
    MalformedUrl { url: String, message: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Network capture failed for {url}: {message}")]
    Capture { url: String, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Browser session error: {0}")]
    Session(String),

    #[error("Run cancelled while crawling {url}")]
    Cancelled { url: String },
}

impl CrawlError {
    pub fn navigation(url: &str, message: impl ToString) -> Self {
        Self::Navigation {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn extraction(url: &str, message: impl ToString) -> Self {
        Self::Extraction {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn capture(url: &str, message: impl ToString) -> Self {
        Self::Capture {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn malformed(url: &str, message: impl ToString) -> Self {
        Self::MalformedUrl {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify the error for the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Navigation { .. }
            | Self::Extraction { .. }
            | Self::Capture { .. }
            | Self::Session(_) => ErrorClass::Transient,
            Self::Configuration(_)
            | Self::MalformedUrl { .. }
            | Self::Authentication(_)
            | Self::Cancelled { .. } => ErrorClass::Permanent,
            Self::Screenshot(_) | Self::Persistence(_) => ErrorClass::Degraded,
        }
    }

    /// Short machine-readable name, used in persisted results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::MalformedUrl { .. } => "malformed_url",
            Self::Navigation { .. } => "navigation",
            Self::Extraction { .. } => "extraction",
            Self::Capture { .. } => "capture",
            Self::Authentication(_) => "authentication",
            Self::Screenshot(_) => "screenshot",
            Self::Persistence(_) => "persistence",
            Self::Session(_) => "session",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
