//! Configuration loading and management
//!
//! Handles parsing of `.weave.toml` configuration files and the `WV_*`
//! environment overrides layered on top of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the per-repository config file
pub const CONFIG_FILE: &str = ".weave.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hot store configuration
    #[serde(default)]
    pub hot: HotConfig,

    /// Eviction configuration
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// External tracker sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Graph policy configuration
    #[serde(default)]
    pub graph: GraphConfig,
}

/// Hot (volatile) store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotConfig {
    /// Size cap in bytes before eviction runs
    #[serde(default = "default_size_max_bytes")]
    pub size_max_bytes: u64,

    /// Explicit hot base directory, bypassing auto-detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,

    /// Minimum free space on the fast volume before falling back
    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,

    /// Seconds between size checks across invocations
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_size_max_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_min_free_mb() -> u64 {
    64
}

fn default_check_interval_secs() -> u64 {
    60
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            size_max_bytes: default_size_max_bytes(),
            location: None,
            min_free_mb: default_min_free_mb(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// Eviction of terminal nodes from an oversized hot store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Done nodes older than this many days are eligible
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,
}

fn default_grace_days() -> u32 {
    30
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            grace_days: default_grace_days(),
        }
    }
}

/// External issue tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum interval between API requests
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Tracker repository in `owner/name` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per request on retryable failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_ms() -> u64 {
    1000
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit_ms: default_rate_limit_ms(),
            repo: None,
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Graph policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Active nodes allowed before an advisory is raised
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Busy-wait on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_active() -> usize {
    1
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a `.weave.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from repo root (or defaults) and apply `WV_*`
    /// environment overrides.
    pub fn resolve(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment overrides from a lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("WV_HOT_SIZE_MAX") {
            self.hot.size_max_bytes = parse_number("WV_HOT_SIZE_MAX", &value)?;
        }
        if let Some(value) = get("WV_HOT_ZONE") {
            self.hot.location = Some(PathBuf::from(value));
        }
        if let Some(value) = get("WV_MIN_FREE_MB") {
            self.hot.min_free_mb = parse_number("WV_MIN_FREE_MB", &value)?;
        }
        if let Some(value) = get("WV_SIZE_CHECK_INTERVAL") {
            self.hot.check_interval_secs = parse_number("WV_SIZE_CHECK_INTERVAL", &value)?;
        }
        if let Some(value) = get("WV_ARCHIVE_GRACE_DAYS") {
            self.eviction.grace_days = parse_number("WV_ARCHIVE_GRACE_DAYS", &value)?;
        }
        if let Some(value) = get("WV_SYNC_ENABLED") {
            self.sync.enabled = parse_bool("WV_SYNC_ENABLED", &value)?;
        }
        if let Some(value) = get("WV_SYNC_RATE_MS") {
            self.sync.rate_limit_ms = parse_number("WV_SYNC_RATE_MS", &value)?;
        }
        if let Some(value) = get("WV_SYNC_REPO") {
            self.sync.repo = Some(value);
        }
        if let Some(value) = get("WV_SYNC_API") {
            self.sync.api_url = value;
        }
        if let Some(value) = get("WV_MAX_ACTIVE") {
            self.graph.max_active = parse_number("WV_MAX_ACTIVE", &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.hot.size_max_bytes == 0 {
            return Err(Error::InvalidConfig(
                "hot.size_max_bytes must be > 0".to_string(),
            ));
        }
        if self.sync.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "sync.max_attempts must be >= 1".to_string(),
            ));
        }
        if let Some(repo) = &self.sync.repo {
            let mut parts = repo.split('/');
            let valid = matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
            );
            if !valid {
                return Err(Error::InvalidConfig(format!(
                    "sync.repo '{repo}' must be in owner/name form"
                )));
            }
        }
        if self.graph.max_active == 0 {
            return Err(Error::InvalidConfig(
                "graph.max_active must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::InvalidConfig(format!("{key}='{value}' is not a valid number")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "{key}='{value}' is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.hot.size_max_bytes, 100 * 1024 * 1024);
        assert!(cfg.hot.location.is_none());
        assert_eq!(cfg.hot.min_free_mb, 64);
        assert_eq!(cfg.eviction.grace_days, 30);
        assert!(cfg.sync.enabled);
        assert_eq!(cfg.sync.rate_limit_ms, 1000);
        assert_eq!(cfg.sync.api_url, "https://api.github.com");
        assert_eq!(cfg.graph.max_active, 1);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[hot]
size_max_bytes = 2048
location = "/var/tmp/wv"

[eviction]
grace_days = 7

[sync]
enabled = false
repo = "acme/widgets"
"#,
        )
        .expect("write config");

        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.hot.size_max_bytes, 2048);
        assert_eq!(cfg.hot.location, Some(PathBuf::from("/var/tmp/wv")));
        assert_eq!(cfg.eviction.grace_days, 7);
        assert!(!cfg.sync.enabled);
        assert_eq!(cfg.sync.repo.as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("WV_HOT_SIZE_MAX", "4096"),
            ("WV_ARCHIVE_GRACE_DAYS", "3"),
            ("WV_SYNC_ENABLED", "off"),
            ("WV_SYNC_RATE_MS", "250"),
            ("WV_HOT_ZONE", "  "),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string()))
            .expect("apply env");
        assert_eq!(cfg.hot.size_max_bytes, 4096);
        assert_eq!(cfg.eviction.grace_days, 3);
        assert!(!cfg.sync.enabled);
        assert_eq!(cfg.sync.rate_limit_ms, 250);
        assert!(cfg.hot.location.is_none());
    }

    #[test]
    fn invalid_env_value_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|key| (key == "WV_HOT_SIZE_MAX").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn invalid_sync_repo_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[sync]\nrepo = \"no-slash\"\n").expect("write config");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("grace_days = 30"));
    }
}
