//! Configuration file parser for ~/.config/feedskim/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::ItemSpec;
use crate::page::TitleSelector;
use crate::pipeline::FailurePolicy;

const DEFAULT_FEED_URL: &str =
    "http://www.fit-pro.cz/export/fitpro-cf6ad8215df1f1cf993029a1684d5251.xml";
const DEFAULT_PROFILE_URL: &str =
    "http://aiweb.cs.washington.edu/research/projects/xmltk/xmldata/data/pir/psd7003.xml.gz";
const ZBOZI_NAMESPACE: &str = "http://www.zbozi.cz/ns/offer/1.0";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but cannot be used.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL of the XML product feed.
    pub feed_url: String,

    /// Maximum size of one downloaded chunk, in bytes.
    pub chunk_size: usize,

    /// Number of workers, which is also the queue capacity.
    pub workers: usize,

    /// Qualified name of the item element (`prefix:local`).
    pub item_tag: String,

    /// Path from the item element to its URL field.
    pub url_path: String,

    /// CSS selector for the page title.
    pub title_selector: String,

    /// Whether one failed item page stops the run.
    pub failure_policy: FailurePolicy,

    /// Decompress the feed body as gzip.
    pub gzip: bool,

    /// Per-request timeout in seconds. 0 = no timeout.
    pub request_timeout_secs: u64,

    /// Prefix → namespace URI, used to resolve `item_tag` and `url_path`.
    pub namespaces: HashMap<String, String>,

    /// Memory-profiling harness parameters.
    pub profile: ProfileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            chunk_size: 1024,
            workers: 5,
            item_tag: "zbozi:SHOPITEM".to_string(),
            url_path: "//zbozi:URL".to_string(),
            title_selector: "h1".to_string(),
            failure_policy: FailurePolicy::Abort,
            gzip: false,
            request_timeout_secs: 0,
            namespaces: HashMap::from([("zbozi".to_string(), ZBOZI_NAMESPACE.to_string())]),
            profile: ProfileConfig::default(),
        }
    }
}

/// `[profile]` table: a gzip-compressed feed streamed only to watch memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub url: String,
    pub item_tag: String,
    pub text_path: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROFILE_URL.to_string(),
            item_tag: "ProteinEntry".to_string(),
            text_path: "//sequence".to_string(),
        }
    }
}

/// Validated configuration for one scrape run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub feed_url: String,
    pub chunk_size: usize,
    pub workers: usize,
    pub item: ItemSpec,
    pub title: TitleSelector,
    pub policy: FailurePolicy,
    pub gzip: bool,
    pub request_timeout: Option<Duration>,
    /// Keep every page report in the run summary instead of only counting it.
    /// Not read from the config file; the report list grows with the feed.
    pub keep_reports: bool,
}

impl Settings {
    /// Builds the HTTP client shared by the whole run.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        build_client(self.request_timeout)
    }
}

/// Validated configuration for the memory-profiling harness.
#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub url: String,
    pub chunk_size: usize,
    pub item: ItemSpec,
    pub request_timeout: Option<Duration>,
}

impl ProfileSettings {
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        build_client(self.request_timeout)
    }
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "feed_url",
                "chunk_size",
                "workers",
                "item_tag",
                "url_path",
                "title_selector",
                "failure_policy",
                "gzip",
                "request_timeout_secs",
                "namespaces",
                "profile",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), feed = %config.feed_url, "Loaded configuration");
        Ok(config)
    }

    /// Validates values and resolves names, paths and selectors.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        validate_http_url(&self.feed_url)?;
        let chunk_size = self.positive_chunk_size()?;
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }

        let item = ItemSpec::resolve(&self.item_tag, &self.url_path, &self.namespaces)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let title = TitleSelector::parse(&self.title_selector).map_err(|e| {
            ConfigError::Invalid(format!("title_selector '{}': {}", self.title_selector, e))
        })?;

        Ok(Settings {
            feed_url: self.feed_url.clone(),
            chunk_size,
            workers: self.workers,
            item,
            title,
            policy: self.failure_policy,
            gzip: self.gzip,
            request_timeout: self.request_timeout(),
            keep_reports: false,
        })
    }

    pub fn resolve_profile(&self) -> Result<ProfileSettings, ConfigError> {
        validate_http_url(&self.profile.url)?;
        let item = ItemSpec::resolve(
            &self.profile.item_tag,
            &self.profile.text_path,
            &self.namespaces,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(ProfileSettings {
            url: self.profile.url.clone(),
            chunk_size: self.positive_chunk_size()?,
            item,
            request_timeout: self.request_timeout(),
        })
    }

    fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    fn positive_chunk_size(&self) -> Result<usize, ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".into()));
        }
        Ok(self.chunk_size)
    }
}

fn validate_http_url(raw: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::Invalid(format!(
            "URL '{}': unsupported scheme {} (only http/https allowed)",
            raw, scheme
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
