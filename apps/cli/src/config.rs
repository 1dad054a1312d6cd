//! Uploader configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/packdrop/packdrop.toml`
//! - Windows: `%APPDATA%/packdrop/packdrop.toml`
//!
//! Environment variables override the file; command-line flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use packdrop_protocol::constants::{DEFAULT_API_BASE_URL, DEFAULT_PART_SIZE};
use packdrop_upload::{Credentials, DEFAULT_MAX_CONCURRENCY, RetryPolicy, SessionConfig};
use serde::{Deserialize, Serialize};

pub const ENV_USER_TOKEN: &str = "PACKDROP_USER_TOKEN";
pub const ENV_TEAM_ID: &str = "PACKDROP_TEAM_ID";
pub const ENV_API_URL: &str = "PACKDROP_API_URL";
pub const ENV_PART_SIZE: &str = "PACKDROP_PART_SIZE";

/// Uploader configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// API root of the delivery service.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// User token from `packdrop auth`.
    #[serde(default)]
    pub user_token: String,

    #[serde(default)]
    pub team_id: String,

    /// Part size in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Parts uploaded in parallel per file.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_part_timeout")]
    pub part_timeout_secs: u64,

    /// Attempts per registration call and per part.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts per finalize call.
    #[serde(default = "default_finalize_attempts")]
    pub finalize_attempts: u32,
}

fn default_api_url() -> String {
    DEFAULT_API_BASE_URL.into()
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_request_timeout() -> u64 {
    60
}

fn default_part_timeout() -> u64 {
    15 * 60
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_finalize_attempts() -> u32 {
    RetryPolicy::default().finalize_attempts
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_token: String::new(),
            team_id: String::new(),
            part_size: default_part_size(),
            max_concurrency: default_max_concurrency(),
            request_timeout_secs: default_request_timeout(),
            part_timeout_secs: default_part_timeout(),
            max_attempts: default_max_attempts(),
            finalize_attempts: default_finalize_attempts(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("user_token", &"<redacted>")
            .field("team_id", &self.team_id)
            .field("part_size", &self.part_size)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Loads `path`, or the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let location = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if location.exists() {
            let content = std::fs::read_to_string(&location)
                .with_context(|| format!("reading {}", location.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", location.display()))?;
            tracing::debug!(path = %location.display(), "configuration loaded");
            Ok(config)
        } else if path.is_some() {
            bail!("config file not found: {}", location.display());
        } else {
            Ok(Config::default())
        }
    }

    /// Saves the configuration to `path`, readable only by the owner on Unix.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies `PACKDROP_*` overrides looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(token) = var(ENV_USER_TOKEN) {
            self.user_token = token;
        }
        if let Some(team) = var(ENV_TEAM_ID) {
            self.team_id = team;
        }
        if let Some(url) = var(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(size) = var(ENV_PART_SIZE) {
            self.part_size = size
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PART_SIZE} is not a byte count: {size}"))?;
        }
        Ok(())
    }

    /// Builds the validated session configuration for the upload core.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut session = SessionConfig::new(Credentials {
            user_token: self.user_token.clone(),
            team_id: self.team_id.clone(),
        });
        session.part_size = self.part_size;
        session.max_concurrency = self.max_concurrency;
        session.request_timeout = Duration::from_secs(self.request_timeout_secs);
        session.part_timeout = Duration::from_secs(self.part_timeout_secs);
        session.retry.max_attempts = self.max_attempts;
        session.retry.finalize_attempts = self.finalize_attempts;
        session.validate()?;
        Ok(session)
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("packdrop")
            .join("packdrop.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata).join("packdrop").join("packdrop.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".packdrop").join("packdrop.toml"))
    }
}
