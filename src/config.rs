use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, CredentialError};
use crate::fetch::github::DEFAULT_API_URL;
use crate::fetch::{github_repo_from_urls, parse_repository};
use crate::fetch::pull_requests::{DEFAULT_CATALOG_REPO, DEFAULT_GRAPHQL_URL};
use crate::history::ManifestHistory;
use crate::url::features::DEFAULT_EXTENSIONS;
use crate::url::{ArchEntry, ArchTable, FeatureExtractor};

// =============================================================================
// Time-related constants
// =============================================================================

/// Timeout for a single HTTP request in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// Pause between batches in milliseconds (1 second)
pub const DEFAULT_BATCH_DELAY_MS: u64 = 1_000;

/// Backoff applied to a credential rejected without a retry hint (60 seconds)
pub const DEFAULT_BACKOFF_MS: u64 = 60_000;

/// Longest credential wait the scheduler sits through (15 minutes)
pub const DEFAULT_MAX_WAIT_MS: u64 = 15 * 60 * 1000;

// =============================================================================
// Scheduling constants
// =============================================================================

pub const DEFAULT_BATCH_SIZE: usize = 50;

pub const DEFAULT_CONCURRENCY: usize = 10;

/// What the scheduler does when every credential is rate limited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Sleep until a credential resets, up to `maxWait`
    #[default]
    Wait,
    /// Stop and report the remaining packages as errors
    Abort,
}

/// Configuration file contents, before validation
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawConfig {
    pub credentials: Vec<String>,
    pub extensions: Vec<String>,
    pub architectures: Vec<ArchEntry>,
    pub concurrency: usize,
    pub batch_size: usize,
    /// Milliseconds
    pub batch_delay: u64,
    /// Milliseconds
    pub default_backoff: u64,
    /// Milliseconds
    pub max_wait: u64,
    pub exhaustion_policy: ExhaustionPolicy,
    pub github: GitHubConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            architectures: ArchEntry::defaults(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY_MS,
            default_backoff: DEFAULT_BACKOFF_MS,
            max_wait: DEFAULT_MAX_WAIT_MS,
            exhaustion_policy: ExhaustionPolicy::default(),
            github: GitHubConfig::default(),
        }
    }
}

/// GitHub endpoints
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GitHubConfig {
    pub api_url: String,
    pub graphql_url: String,
    /// `owner/repo` searched for pull requests
    pub catalog_repo: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            catalog_repo: DEFAULT_CATALOG_REPO.to_string(),
        }
    }
}

/// Scheduler knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub concurrency: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_wait: Duration,
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            exhaustion_policy: ExhaustionPolicy::default(),
        }
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Vec<String>,
    pub extractor: FeatureExtractor,
    pub schedule: ScheduleSettings,
    pub default_backoff: Duration,
    pub fetch_timeout: Duration,
    pub github: GitHubConfig,
}

impl Config {
    /// Reads and validates a config file, adding credentials from the
    /// process environment. `None` uses the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str::<RawConfig>(&content)?
            }
            None => RawConfig::default(),
        };

        raw.validate(|name| std::env::var(name).ok())
    }
}

impl RawConfig {
    /// Checks every setting once and compiles the architecture table.
    /// `env` looks up environment variables.
    pub fn validate<F>(self, env: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = collect_credentials(&self.credentials, env);
        if credentials.is_empty() {
            return Err(CredentialError::Empty.into());
        }

        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batchSize", "must be at least 1"));
        }

        let extensions: Vec<String> = self
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(invalid("extensions", "at least one extension is required"));
        }

        let table = ArchTable::compile(&self.architectures)?;

        if parse_repository(&self.github.catalog_repo).is_none() {
            return Err(invalid(
                "github.catalogRepo",
                &format!("expected owner/repo, got {:?}", self.github.catalog_repo),
            ));
        }

        Ok(Config {
            credentials,
            extractor: FeatureExtractor::new(extensions, table),
            schedule: ScheduleSettings {
                concurrency: self.concurrency,
                batch_size: self.batch_size,
                batch_delay: Duration::from_millis(self.batch_delay),
                max_wait: Duration::from_millis(self.max_wait),
                exhaustion_policy: self.exhaustion_policy,
            },
            default_backoff: Duration::from_millis(self.default_backoff),
            fetch_timeout: Duration::from_millis(FETCH_TIMEOUT_MS),
            github: self.github,
        })
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}

/// Gathers tokens in priority order and drops duplicates:
/// configured list, `GITHUB_TOKENS` (comma separated), `TOKEN_1`, `TOKEN_2`, ...
/// and `TOKEN` when no numbered token is set.
pub fn collect_credentials<F>(configured: &[String], env: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut tokens: Vec<String> = configured.to_vec();

    if let Some(list) = env("GITHUB_TOKENS") {
        tokens.extend(list.split(',').map(|t| t.trim().to_string()));
    }

    let numbered: Vec<String> = (1..)
        .map(|i| env(&format!("TOKEN_{}", i)))
        .take_while(|token| token.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .flatten()
        .collect();
    if numbered.is_empty() {
        tokens.extend(env("TOKEN"));
    } else {
        tokens.extend(numbered);
    }

    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// One package of the catalog input file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogEntry {
    pub package_id: String,
    /// Upstream `owner/repo`; derived from the current URLs when absent
    pub repository: Option<String>,
    pub current_version: String,
    pub current_urls: Vec<String>,
    /// Installer count recorded in the catalog; the URL count when absent
    pub installer_url_count: Option<usize>,
    /// Version label -> installer URLs, for every published version
    pub history: ManifestHistory,
}

impl CatalogEntry {
    pub fn recorded_installer_count(&self) -> usize {
        self.installer_url_count.unwrap_or(self.current_urls.len())
    }

    /// Upstream repository to query, if one can be determined
    pub fn upstream_repository(&self) -> Option<(String, String)> {
        self.repository
            .as_deref()
            .and_then(parse_repository)
            .or_else(|| {
                github_repo_from_urls(self.current_urls.iter().map(String::as_str))
            })
    }
}

/// Reads the catalog input file: a JSON array of [`CatalogEntry`]
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&content)?;

    if let Some(entry) = entries.iter().find(|e| e.package_id.trim().is_empty()) {
        return Err(invalid(
            "packageId",
            &format!("empty package id (current version {:?})", entry.current_version),
        ));
    }

    Ok(entries)
}

/// Returns the path to the data directory for release-drift.
/// Uses $XDG_DATA_HOME/release-drift if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/release-drift,
/// or ./release-drift if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("release-drift.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("release-drift")
}
