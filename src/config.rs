//! Configuration file parser for ~/.config/feedintake/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SUBMIT_TIMEOUT};
use crate::feed::{FetchSettings, ValidatorSettings, DISCOVERY_TIMEOUT, MAX_DISCOVERY_SIZE};
use crate::util::UrlPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database location. Defaults to `feeds.db` next to the config file.
    pub database_path: Option<PathBuf>,
    pub discovery: DiscoveryConfig,
    pub dispatch: DispatchConfig,
    pub fetch: FetchConfig,
}

/// `[discovery]`: validating user-supplied URLs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Upper bound for one validation, in seconds. 0 = default.
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
    /// Permit loopback and private-network feeds (self-hosted setups).
    pub allow_private_hosts: bool,
    pub user_agent: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DISCOVERY_TIMEOUT.as_secs(),
            max_body_bytes: MAX_DISCOVERY_SIZE,
            allow_private_hosts: false,
            user_agent: None,
        }
    }
}

/// `[dispatch]`: the queue between front end and fetch worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub submit_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT.as_millis() as u64,
        }
    }
}

/// `[fetch]`: the background fetch worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    /// Per-request timeout in seconds. 0 = default.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            concurrency: defaults.concurrency,
            timeout_secs: defaults.timeout.as_secs(),
            max_retries: defaults.max_retries,
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

const KNOWN_KEYS: &[&str] = &["database_path", "discovery", "dispatch", "fetch"];
const KNOWN_SECTION_KEYS: &[(&str, &[&str])] = &[
    (
        "discovery",
        &[
            "timeout_secs",
            "max_body_bytes",
            "allow_private_hosts",
            "user_agent",
        ],
    ),
    ("dispatch", &["queue_capacity", "submit_timeout_ms"]),
    (
        "fetch",
        &["concurrency", "timeout_secs", "max_retries", "max_body_bytes"],
    ),
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
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

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in unknown_keys(&raw) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// The database file, resolved against `config_dir` when unset.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feeds.db"))
    }

    pub fn url_policy(&self) -> UrlPolicy {
        UrlPolicy::from_allow_private(self.discovery.allow_private_hosts)
    }

    pub fn validator_settings(&self) -> ValidatorSettings {
        let defaults = ValidatorSettings::default();
        ValidatorSettings {
            timeout: secs_or(self.discovery.timeout_secs, defaults.timeout),
            max_body_bytes: self.discovery.max_body_bytes,
            policy: self.url_policy(),
            user_agent: self
                .discovery
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            concurrency: self.fetch.concurrency.max(1),
            timeout: secs_or(self.fetch.timeout_secs, defaults.timeout),
            max_retries: self.fetch.max_retries,
            max_body_bytes: self.fetch.max_body_bytes,
            ..defaults
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.submit_timeout_ms)
    }
}

fn secs_or(secs: u64, default: Duration) -> Duration {
    if secs == 0 {
        default
    } else {
        Duration::from_secs(secs)
    }
}

/// Dotted paths of keys the config structs do not know about.
fn unknown_keys(raw: &toml::Table) -> Vec<String> {
    let mut unknown = Vec::new();
    for (key, value) in raw {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            unknown.push(key.clone());
            continue;
        }
        let Some(table) = value.as_table() else {
            continue;
        };
        let Some((_, known)) = KNOWN_SECTION_KEYS.iter().find(|(name, _)| *name == key.as_str()) else {
            continue;
        };
        unknown.extend(
            table
                .keys()
                .filter(|k| !known.contains(&k.as_str()))
                .map(|k| format!("{key}.{k}")),
        );
    }
    unknown
}

// ============================================================================
// Tests
// ============================================================================
