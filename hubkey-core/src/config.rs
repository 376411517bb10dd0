//! Configuration loading and validation.
//!
//! The configuration file is TOML, by default at
//! `~/.config/hubkey/config.toml` on Linux (platform equivalents elsewhere):
//!
//! ```toml
//! [settings]
//! keyring_timeout_secs = 3
//!
//! [[source]]
//! type = "app"
//! name = "ci-bot"
//! app_id = 12345
//! installation_id = 678
//! patterns = ["github.com/acme"]
//! key = { backend = "keyring", id = "ci-bot" }
//!
//! [[source]]
//! type = "token"
//! name = "personal"
//! patterns = ["github.com/me"]
//! token = { backend = "filesystem", id = "personal" }
//! ```
//!
//! Sources keep the order they are declared in; that order is the final
//! tie-breaker when resolving a request.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::github::DEFAULT_API_URL;
use crate::jwt::{DEFAULT_CLOCK_SKEW_SECS, MAX_LIFETIME_SECS};
use crate::matcher::Pattern;
use crate::model::CredentialSource;
use crate::token_cache::DEFAULT_SAFETY_MARGIN_SECS;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "HUBKEY_CONFIG";

const SAFETY_MARGIN_BOUNDS: (i64, i64) = (60, 1800);
const JWT_LIFETIME_BOUNDS: (i64, i64) = (60, MAX_LIFETIME_SECS);

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Tunable policy constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Token issuance API base URL.
    pub api_url: String,

    /// Deadline for each OS keyring call.
    pub keyring_timeout_secs: u64,

    /// Deadline for each GitHub API request.
    pub http_timeout_secs: u64,

    /// Treat installation tokens as expired this long before they are.
    pub token_safety_margin_secs: i64,

    /// `exp - iat` of minted assertions.
    pub jwt_lifetime_secs: i64,

    /// How far `iat` is back-dated.
    pub jwt_clock_skew_secs: i64,

    /// Base directory of the encrypted filesystem store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            keyring_timeout_secs: 3,
            http_timeout_secs: 10,
            token_safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
            jwt_lifetime_secs: MAX_LIFETIME_SECS,
            jwt_clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            data_dir: None,
        }
    }
}

impl Settings {
    pub fn keyring_timeout(&self) -> Duration {
        Duration::from_secs(self.keyring_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_safety_margin_secs)
    }

    pub fn jwt_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.jwt_lifetime_secs)
    }

    pub fn jwt_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.jwt_clock_skew_secs)
    }

    /// Directory for the filesystem fallback store.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|d| d.data_dir().to_path_buf())
                .ok_or(ConfigError::ConfigDirUnavailable),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_bounds(
            "token_safety_margin_secs",
            self.token_safety_margin_secs,
            SAFETY_MARGIN_BOUNDS,
        )?;
        check_bounds("jwt_lifetime_secs", self.jwt_lifetime_secs, JWT_LIFETIME_BOUNDS)?;
        check_bounds("jwt_clock_skew_secs", self.jwt_clock_skew_secs, (0, 300))?;
        if self.keyring_timeout_secs == 0 || self.http_timeout_secs == 0 {
            return Err(invalid("timeouts must be at least one second"));
        }
        if !self.api_url.starts_with("https://") && !self.api_url.starts_with("http://") {
            return Err(invalid(format!(
                "api_url '{}' must be an http(s) URL",
                self.api_url
            )));
        }
        Ok(())
    }
}

fn check_bounds(name: &str, value: i64, (min, max): (i64, i64)) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(format!(
            "{} = {} is outside [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Full hubkey configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// Credential sources in declaration order.
    #[serde(default, rename = "source")]
    pub sources: Vec<CredentialSource>,
}

impl Config {
    /// Default configuration file path.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .ok_or(ConfigError::ConfigDirUnavailable)
    }

    /// Load from `path`, or from [`CONFIG_ENV`] / the default path.
    ///
    /// A missing default file yields an empty configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => {
                let path = Self::default_path()?;
                if !path.exists() {
                    tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.clone(),
                message,
            },
            other => other,
        })?;

        tracing::debug!(path = %path.display(), sources = config.sources.len(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the resolution engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        let mut names = HashSet::new();
        for source in &self.sources {
            let name = source.name();
            if name.trim().is_empty() {
                return Err(invalid("source name must not be empty"));
            }
            if !names.insert(name) {
                return Err(invalid(format!("duplicate source name '{}'", name)));
            }
            if source.patterns().is_empty() {
                return Err(invalid(format!("{} has no patterns", source)));
            }
            for pattern in source.patterns() {
                Pattern::parse(pattern).map_err(|e| invalid(format!("{}: {}", source, e)))?;
            }
            if let CredentialSource::App(app) = source {
                if app.app_id <= 0 {
                    return Err(invalid(format!(
                        "{} has app_id {}; it must be positive",
                        source, app.app_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a source by name.
    pub fn source(&self, name: &str) -> Option<&CredentialSource> {
        self.sources.iter().find(|s| s.name() == name)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "hubkey", "hubkey")
}
