use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::crawler::task::CrawlMode;

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    pub crawler: CrawlerSettings,
    pub browser: BrowserSettings,
    pub retry: RetrySettings,
    pub login: LoginSettings,
    pub output: OutputSettings,
}

/// Crawler-specific settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Newline-delimited list of URLs for flat mode
    pub urls_file: String,
    /// Seed URL for recursive mode
    pub base_url: Option<String>,
    pub mode: CrawlMode,
    pub concurrency_limit: usize,
    pub max_depth: u32,
    pub max_pages: u32,
    pub allowed_domains: Vec<String>,
    pub url_patterns: UrlPatterns,
}

/// URL pattern settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UrlPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Browser settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub viewport: Viewport,
    pub navigation_timeout_ms: u64,
    /// Wait before reading the DOM so client-side rendering can settle
    pub settle_delay_ms: u64,
    /// Observation window for network capture
    pub capture_window_ms: u64,
    /// Element to click while capturing network activity
    pub trigger_selector: Option<String>,
    /// Only API calls whose URL starts with this prefix are kept (default: page origin)
    pub api_scope: Option<String>,
    /// Click discovered buttons in recursive mode
    pub interact_with_buttons: bool,
    pub max_interactions: usize,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Retry settings for transient failures
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds
    pub delay_ms: u64,
}

/// Login settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoginSettings {
    pub required: bool,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub selectors: LoginSelectors,
    pub marker_timeout_ms: u64,
}

/// CSS selectors of the login form
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoginSelectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    /// Present only once the user is logged in
    pub logged_in_marker: String,
}

/// Output settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OutputSettings {
    pub output_dir: String,
    pub log_file: Option<String>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            urls_file: "./urls.txt".to_string(),
            base_url: None,
            mode: CrawlMode::Flat,
            concurrency_limit: 3,
            max_depth: 3,
            max_pages: 1000,
            allowed_domains: vec![],
            url_patterns: UrlPatterns::default(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            navigation_timeout_ms: 60_000,
            settle_delay_ms: 5_000,
            capture_window_ms: 5_000,
            trigger_selector: None,
            api_scope: None,
            interact_with_buttons: true,
            max_interactions: 10,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            required: false,
            url: None,
            username: None,
            password: None,
            selectors: LoginSelectors::default(),
            marker_timeout_ms: 10_000,
        }
    }
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username: "[data-qa=\"login-inp-username\"]".to_string(),
            password: "[data-qa=\"login-inp-password\"]".to_string(),
            submit: "[data-qa=\"submit-auth\"]".to_string(),
            logged_in_marker: "[data-qa=\"nav-menu-logout\"]".to_string(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: "./output".to_string(),
            log_file: None,
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "web-inventory", "web-inventory")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self, ConfigError> {
        let profile_path = Self::config_dir()
            .join("sites")
            .join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            Err(ConfigError::ProfileNotFound(profile.to_string()))
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<(), ConfigError> {
        self.save_to_file(&Self::config_dir().join("default.yaml"))
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<(), ConfigError> {
        let sites_dir = Self::config_dir().join("sites");
        self.save_to_file(&sites_dir.join(format!("{}.yaml", profile)))
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>, ConfigError> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();
        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup
    ///
    /// Unparseable numeric or boolean values are ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("URLS_FILE") {
            self.crawler.urls_file = value;
        }
        if let Some(value) = lookup("OUTPUT_DIR") {
            self.output.output_dir = value;
        }
        if let Some(value) = lookup("CONCURRENCY_LIMIT") {
            match value.trim().parse() {
                Ok(limit) => self.crawler.concurrency_limit = limit,
                Err(_) => tracing::warn!("Ignoring invalid CONCURRENCY_LIMIT: {}", value),
            }
        }
        if let Some(value) = lookup("HEADLESS") {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => self.browser.headless = true,
                "false" | "0" | "no" => self.browser.headless = false,
                _ => tracing::warn!("Ignoring invalid HEADLESS: {}", value),
            }
        }
        if let Some(value) = lookup("BASE_URL") {
            self.crawler.base_url = Some(value);
        }
        if let Some(value) = lookup("WEBDRIVER_URL") {
            self.browser.webdriver_url = value;
        }
        if let Some(value) = lookup("LOGIN_URL") {
            self.login.url = Some(value);
        }
        if let Some(value) = lookup("LOGIN_USER") {
            self.login.username = Some(value);
        }
        if let Some(value) = lookup("LOGIN_PASSWORD") {
            self.login.password = Some(value);
        }
    }

    /// Check the configuration before any task starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawler.concurrency_limit < 1 || self.crawler.concurrency_limit > 64 {
            return Err(ConfigError::Validation(format!(
                "concurrency_limit must be between 1 and 64, got {}",
                self.crawler.concurrency_limit
            )));
        }

        if self.retry.max_attempts < 1 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be >= 1".to_string(),
            ));
        }

        if self.output.output_dir.trim().is_empty() {
            return Err(ConfigError::Missing("output.output_dir".to_string()));
        }

        match self.crawler.mode {
            CrawlMode::Flat if self.crawler.urls_file.trim().is_empty() => {
                return Err(ConfigError::Missing("crawler.urls_file".to_string()));
            }
            CrawlMode::Recursive if self.crawler.base_url.is_none() => {
                return Err(ConfigError::Missing("crawler.base_url".to_string()));
            }
            _ => {}
        }

        for pattern in self
            .crawler
            .url_patterns
            .include
            .iter()
            .chain(self.crawler.url_patterns.exclude.iter())
        {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("Invalid URL pattern '{}': {}", pattern, e))
            })?;
        }

        if self.login.required {
            let missing = [
                ("login.url", &self.login.url),
                ("login.username", &self.login.username),
                ("login.password", &self.login.password),
            ]
            .into_iter()
            .find(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()));

            if let Some((name, _)) = missing {
                return Err(ConfigError::Missing(name.to_string()));
            }
        }

        Ok(())
    }
}

/// Read a newline-delimited URL list, trimming lines and skipping blanks
pub fn read_url_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(format!(
            "URLs file not found: {}",
            path.display()
        )));
    }

    let urls = parse_url_list(&fs::read_to_string(path)?);
    if urls.is_empty() {
        return Err(ConfigError::Validation(format!(
            "No URLs found in {}",
            path.display()
        )));
    }

    Ok(urls)
}

pub fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
