//! Application configuration management.
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. TOML file (`--config`, else the platform config dir `config.toml`)
//! 3. `REFGUARD_*` environment variables
//! 4. command-line flags, applied by the caller
//!
//! ```toml
//! database = "/var/lib/refguard/refguard.db"
//! staleness_window_secs = 3600
//! sample_cap = 10
//! default_page_limit = 50
//! busy_timeout_ms = 5000
//! default_window_days = 7
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "REFGUARD_";

/// Largest accepted staleness window (ten years).
pub const MAX_STALENESS_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

const KNOWN_KEYS: &[&str] = &[
    "database",
    "staleness_window_secs",
    "sample_cap",
    "default_page_limit",
    "busy_timeout_ms",
    "default_window_days",
    "partial_refresh_warns",
];

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A layer held a value of the wrong type.
    #[error("invalid configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// A value was out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No platform directory could be determined for the default database.
    #[error("could not determine a data directory; pass --database")]
    NoDataDir,
}

/// A key in a config file that refguard does not recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKey {
    pub key: String,
    pub suggestion: Option<&'static str>,
}

impl std::fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.suggestion {
            Some(s) => write!(f, "unknown config key '{}' (did you mean '{s}'?)", self.key),
            None => write!(f, "unknown config key '{}'", self.key),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path; `None` means the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Age in seconds after which cache entries are evicted by a refresh.
    pub staleness_window_secs: u64,
    /// Upper bound on the sample page size.
    pub sample_cap: u32,
    /// Page size for audit browsing when none is given.
    pub default_page_limit: u32,
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Reporting window when none is given.
    pub default_window_days: u32,
    /// Audit incomplete refresh runs as `WARNING` rather than `SUCCESS`.
    pub partial_refresh_warns: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            staleness_window_secs: 3600,
            sample_cap: 10,
            default_page_limit: 50,
            busy_timeout_ms: 5000,
            default_window_days: 7,
            partial_refresh_warns: true,
        }
    }
}

impl Config {
    /// Load defaults, then the config file, then the environment.
    ///
    /// With `path = None` the platform config file is used if it exists.
    /// An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match path {
            Some(path) => figment = figment.merge(Self::file_layer(path)?),
            None => {
                if let Some(default_path) = Self::default_path().filter(|p| p.exists()) {
                    log::debug!("Using config file {}", default_path.display());
                    figment = figment.merge(Self::file_layer(&default_path)?);
                }
            }
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults overlaid with one TOML file, ignoring the environment.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Self::file_layer(path)?)
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, warn about unknown keys, and return it as a layer.
    fn file_layer(path: &Path) -> Result<figment::providers::Data<Toml>, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        for unknown in unknown_keys(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })? {
            log::warn!("{}: {unknown}", path.display());
        }
        Ok(Toml::string(&content))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("staleness_window_secs", self.staleness_window_secs == 0),
            ("sample_cap", self.sample_cap == 0),
            ("default_page_limit", self.default_page_limit == 0),
            ("busy_timeout_ms", self.busy_timeout_ms == 0),
            ("default_window_days", self.default_window_days == 0),
        ];
        if let Some((key, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
        }
        if self.staleness_window_secs > MAX_STALENESS_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "staleness_window_secs must be at most {MAX_STALENESS_WINDOW_SECS}"
            )));
        }
        if self.default_page_limit > crate::audit::MAX_PAGE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "default_page_limit must be at most {}",
                crate::audit::MAX_PAGE_LIMIT
            )));
        }
        if self.default_window_days > crate::audit::MAX_WINDOW_DAYS {
            return Err(ConfigError::Invalid(format!(
                "default_window_days must be at most {}",
                crate::audit::MAX_WINDOW_DAYS
            )));
        }
        Ok(())
    }

    /// Configured or platform-default database path.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("refguard.db"))
            .ok_or(ConfigError::NoDataDir)
    }

    /// Platform-specific config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    #[must_use]
    pub fn staleness_window(&self) -> chrono::Duration {
        let secs = self.staleness_window_secs.min(MAX_STALENESS_WINDOW_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "refguard", "refguard")
}

/// Top-level keys in `content` that are not configuration settings.
pub fn unknown_keys(content: &str) -> Result<Vec<UnknownKey>, toml::de::Error> {
    let table: toml::Table = content.parse()?;
    Ok(table
        .keys()
        .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
        .map(|key| UnknownKey {
            key: key.clone(),
            suggestion: suggest(key),
        })
        .collect())
}

fn suggest(key: &str) -> Option<&'static str> {
    KNOWN_KEYS
        .iter()
        .map(|known| (*known, strsim::jaro_winkler(key, known)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(known, _)| known)
}
