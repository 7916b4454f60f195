//! Configuration for a summary invocation.
//!
//! Layered: compiled-in defaults, then an optional TOML file named by
//! `NIGHTLY_SUMMARY_CONFIG`, then environment variables. The result is built
//! once in `main` and passed down explicitly.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "NIGHTLY_SUMMARY_CONFIG";

/// Default lookback. Runs created in the last 16 hours count as "last night".
pub const DEFAULT_LOOKBACK_HOURS: u64 = 16;

/// Longest accepted lookback: one year.
pub const MAX_LOOKBACK_HOURS: u64 = 24 * 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracking-backend entity (organization) owning the nightly projects.
    pub entity: String,
    /// Only projects whose name starts with this prefix are summarized.
    pub project_prefix: String,
    /// Optional ANY-match tag filter applied to run listings.
    pub filter_tags: Vec<String>,
    pub lookback_hours: u64,
    /// Concurrent project fetches. `None` picks `min(32, cpus + 4)`.
    pub max_workers: Option<usize>,
    /// Per-project deadline. `None` waits indefinitely.
    pub fetch_timeout_secs: Option<u64>,
    pub wandb: WandbConfig,
    pub slack: SlackConfig,
    pub build: BuildRef,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entity: "far-wandb".to_string(),
            project_prefix: "nightly".to_string(),
            filter_tags: Vec::new(),
            lookback_hours: DEFAULT_LOOKBACK_HOURS,
            max_workers: None,
            fetch_timeout_secs: None,
            wandb: WandbConfig::default(),
            slack: SlackConfig::default(),
            build: BuildRef::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        check_lookback("lookback_hours", config.lookback_hours)?;
        info!(path = %path.display(), "loaded summary configuration");
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("WANDB_ENTITY") {
            self.entity = v;
        }
        if let Some(v) = var("WANDB_API_KEY") {
            self.wandb.api_key = Some(v);
        }
        if let Some(v) = var("WANDB_BASE_URL") {
            self.wandb.base_url = v;
        }
        if let Some(v) = var("WANDB_APP_URL") {
            self.wandb.app_url = v;
        }
        if let Some(v) = var("SLACK_CHANNEL") {
            self.slack.channel = v;
        }
        if let Some(v) = var("SLACK_BOT_TOKEN") {
            self.slack.token = v;
        }
        if let Some(v) = var("SLACK_API_URL") {
            self.slack.api_url = v;
        }
        if let Some(v) = var("GITHUB_SERVER_URL") {
            self.build.server_url = v;
        }
        if let Some(v) = var("GITHUB_REPOSITORY") {
            self.build.repository = v;
        }
        if let Some(v) = var("GITHUB_RUN_ID") {
            self.build.run_id = v;
        }
        if let Some(v) = var("NIGHTLY_PROJECT_PREFIX") {
            self.project_prefix = v;
        }
        if let Some(v) = var("NIGHTLY_FILTER_TAGS") {
            self.filter_tags = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = var("NIGHTLY_LOOKBACK_HOURS") {
            let hours = parse_number("NIGHTLY_LOOKBACK_HOURS", &v)?;
            check_lookback("NIGHTLY_LOOKBACK_HOURS", hours)?;
            self.lookback_hours = hours;
        }
        if let Some(v) = var("NIGHTLY_MAX_WORKERS") {
            let workers: usize = parse_number("NIGHTLY_MAX_WORKERS", &v)?;
            if workers == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "NIGHTLY_MAX_WORKERS",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
            self.max_workers = Some(workers);
        }
        if let Some(v) = var("NIGHTLY_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = Some(parse_number("NIGHTLY_FETCH_TIMEOUT_SECS", &v)?);
        }
        Ok(())
    }

    /// Lookback as a duration. `None` only for values that bypassed loading.
    pub fn lookback(&self) -> Option<chrono::Duration> {
        i64::try_from(self.lookback_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }

    /// Worker limit, falling back to `min(32, cpus + 4)`.
    pub fn worker_limit(&self) -> usize {
        self.max_workers.unwrap_or_else(default_worker_limit).max(1)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

/// `min(32, cpu_count + 4)`.
pub fn default_worker_limit() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(32)
}

fn check_lookback(var: &'static str, hours: u64) -> Result<(), ConfigError> {
    if (1..=MAX_LOOKBACK_HOURS).contains(&hours) {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        var,
        value: hours.to_string(),
        reason: format!("must be between 1 and {} hours", MAX_LOOKBACK_HOURS),
    })
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tracking backend
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WandbConfig {
    /// API host; the GraphQL endpoint is `<base_url>/graphql`.
    pub base_url: String,
    /// Browser host used to build run URLs.
    pub app_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for WandbConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.wandb.ai".to_string(),
            app_url: "https://wandb.ai".to_string(),
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for WandbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WandbConfig")
            .field("base_url", &self.base_url)
            .field("app_url", &self.app_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub channel: String,
    pub token: String,
    pub api_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            token: String::new(),
            api_url: "https://slack.com/api".to_string(),
        }
    }
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = if self.token.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("SlackConfig")
            .field("channel", &self.channel)
            .field("token", &token)
            .field("api_url", &self.api_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Build reference
// ---------------------------------------------------------------------------

/// CI job that invoked the summary, linked from the report header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildRef {
    pub server_url: String,
    pub repository: String,
    pub run_id: String,
}

impl BuildRef {
    /// `<server>/<repository>/actions/runs/<run_id>`, or empty if any part is unset.
    pub fn url(&self) -> String {
        if self.server_url.is_empty() || self.repository.is_empty() || self.run_id.is_empty() {
            return String::new();
        }
        format!(
            "{}/{}/actions/runs/{}",
            self.server_url.trim_end_matches('/'),
            self.repository,
            self.run_id
        )
    }
}
