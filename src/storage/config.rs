//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux: `~/.config/sigmahub/config.toml`
//! - macOS: `~/Library/Application Support/com.rbsigma.sigmahub/config.toml`
//! - Windows: `%APPDATA%/rbsigma/sigmahub/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `SIGMAHUB_CONFIG`: Override config file path
//! - `SIGMAHUB_BASE_URL`: Remote API base URL
//! - `SIGMAHUB_CLIENT_ID` / `SIGMAHUB_CLIENT_SECRET`: OAuth client credentials
//! - `SIGMAHUB_ACCOUNT_ID`: Account id header value
//! - `SIGMAHUB_PAGE_SIZE`: Records per remote page
//! - `SIGMAHUB_CACHE_PATH`: Cache database path
//! - `SIGMAHUB_BIND`: Admin server bind address
//! - `SIGMAHUB_ADMIN_KEY`: Required `x-internal-key` for the admin server

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::http::{DEFAULT_BASE_URL, normalize_base_url};
use crate::core::range::MAX_WINDOW_DAYS;
use crate::core::retry::RetryPolicy;
use crate::core::token::{ClientCredentials, DEFAULT_EXPIRY_MARGIN, TokenSettings};
use crate::error::{HubError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "SIGMAHUB_CONFIG";
/// Environment variable for the remote API base URL.
pub const ENV_BASE_URL: &str = "SIGMAHUB_BASE_URL";
/// Environment variable for the OAuth client id.
pub const ENV_CLIENT_ID: &str = "SIGMAHUB_CLIENT_ID";
/// Environment variable for the OAuth client secret.
pub const ENV_CLIENT_SECRET: &str = "SIGMAHUB_CLIENT_SECRET";
/// Environment variable for the account id header.
pub const ENV_ACCOUNT_ID: &str = "SIGMAHUB_ACCOUNT_ID";
/// Environment variable for the remote page size.
pub const ENV_PAGE_SIZE: &str = "SIGMAHUB_PAGE_SIZE";
/// Environment variable for the cache database path.
pub const ENV_CACHE_PATH: &str = "SIGMAHUB_CACHE_PATH";
/// Environment variable for the admin server bind address.
pub const ENV_BIND: &str = "SIGMAHUB_BIND";
/// Environment variable for the admin key.
pub const ENV_ADMIN_KEY: &str = "SIGMAHUB_ADMIN_KEY";

/// Largest page size the remote accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub page_size: Option<u32>,
    pub cache_path: Option<PathBuf>,
    pub bind: Option<String>,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    credentials: Option<ClientCredentials>,
    pub account_id: Option<String>,
    pub partner_id: Option<String>,
    /// Per-request timeout for remote calls.
    pub timeout: Duration,
    pub page_size: u32,
    pub max_window_days: i64,
    pub default_range_days: u32,
    /// Time budget for one sync run, `None` for unbounded.
    pub budget: Option<Duration>,
    pub retry: RetryPolicy,
    pub token: TokenSettings,
    pub cache_path: PathBuf,
    pub bind: String,
    pub admin_key: Option<String>,
    pub request_timeout: Duration,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub base_url: ConfigSource,
    pub credentials: ConfigSource,
    pub account_id: ConfigSource,
    pub page_size: ConfigSource,
    pub cache_path: ConfigSource,
    pub bind: ConfigSource,
    pub admin_key: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI overrides, the process environment,
    /// and the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file exists but is invalid
    /// - Any resolved value is out of bounds
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let config = match cli.config_path.clone().or_else(|| env(ENV_CONFIG).map(PathBuf::from)) {
            Some(path) => Config::load_from(&path)?,
            None => Config::load()?,
        };
        Self::resolve_with(&config, cli, env)
    }

    /// Resolve against an explicit config and environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] when the config or any override is invalid.
    pub fn resolve_with<E>(config: &Config, cli: &CliOverrides, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        config.validate()?;
        let mut sources = ConfigSources::default();

        let base_url = layered(
            cli.base_url.clone(),
            env(ENV_BASE_URL),
            Some(config.remote.base_url.clone()).filter(|u| u != DEFAULT_BASE_URL),
            DEFAULT_BASE_URL.to_string(),
            &mut sources.base_url,
        );

        let page_size = match env(ENV_PAGE_SIZE) {
            Some(raw) if cli.page_size.is_none() => Some(raw.trim().parse::<u32>().map_err(|_| {
                HubError::Config(format!("{ENV_PAGE_SIZE} must be a positive integer, got '{raw}'"))
            })?),
            _ => None,
        };
        let page_size = layered(
            cli.page_size,
            page_size,
            Some(config.sync.page_size).filter(|size| *size != SyncConfig::default().page_size),
            SyncConfig::default().page_size,
            &mut sources.page_size,
        );
        check_page_size(page_size)?;

        let cache_path = layered(
            cli.cache_path.clone(),
            env(ENV_CACHE_PATH).map(PathBuf::from),
            config.cache.path.clone(),
            AppPaths::new().cache_db_file(),
            &mut sources.cache_path,
        );

        let bind = layered(
            cli.bind.clone(),
            env(ENV_BIND),
            Some(config.server.bind.clone()).filter(|b| *b != ServerConfig::default().bind),
            ServerConfig::default().bind,
            &mut sources.bind,
        );

        let account_id = optional_layer(
            env(ENV_ACCOUNT_ID),
            config.remote.account_id.clone(),
            &mut sources.account_id,
        );
        let admin_key = optional_layer(
            env(ENV_ADMIN_KEY),
            config.server.admin_key.clone(),
            &mut sources.admin_key,
        );

        let client_id = env(ENV_CLIENT_ID).or_else(|| config.remote.client_id.clone());
        let client_secret = env(ENV_CLIENT_SECRET).or_else(|| config.remote.client_secret.clone());
        let credentials = match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => {
                sources.credentials = if env(ENV_CLIENT_ID).is_some() || env(ENV_CLIENT_SECRET).is_some() {
                    ConfigSource::Env
                } else {
                    ConfigSource::ConfigFile
                };
                Some(ClientCredentials {
                    client_id,
                    client_secret,
                    scope: config.remote.scope.clone(),
                    audience: config.remote.audience.clone(),
                })
            }
            _ => None,
        };

        let retry = config.retry.policy();
        let token = TokenSettings {
            expiry_margin: Duration::from_secs(config.token.expiry_margin_seconds),
            refresh: RetryPolicy {
                max_attempts: config.token.refresh_attempts.max(1),
                ..retry.clone()
            },
        };

        Ok(Self {
            base_url: normalize_base_url(&base_url),
            credentials,
            account_id,
            partner_id: config.remote.partner_id.clone(),
            timeout: Duration::from_secs(config.remote.timeout_seconds),
            page_size,
            max_window_days: config.sync.max_window_days,
            default_range_days: config.sync.default_range_days,
            budget: (config.sync.budget_seconds > 0)
                .then(|| Duration::from_secs(config.sync.budget_seconds)),
            retry,
            token,
            cache_path,
            bind,
            admin_key,
            request_timeout: Duration::from_secs(config.server.request_timeout_seconds),
            sources,
        })
    }

    /// Client credentials, required by any operation that talks to the remote.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AuthNotConfigured`] when either half is missing.
    pub fn credentials(&self) -> Result<&ClientCredentials> {
        self.credentials.as_ref().ok_or_else(|| {
            HubError::AuthNotConfigured(format!(
                "set {ENV_CLIENT_ID} and {ENV_CLIENT_SECRET} or [remote] client_id/client_secret"
            ))
        })
    }

    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

fn layered<T>(
    cli: Option<T>,
    env: Option<T>,
    file: Option<T>,
    default: T,
    source: &mut ConfigSource,
) -> T {
    if let Some(value) = cli {
        *source = ConfigSource::Cli;
        value
    } else if let Some(value) = env {
        *source = ConfigSource::Env;
        value
    } else if let Some(value) = file {
        *source = ConfigSource::ConfigFile;
        value
    } else {
        *source = ConfigSource::Default;
        default
    }
}

fn optional_layer(
    env: Option<String>,
    file: Option<String>,
    source: &mut ConfigSource,
) -> Option<String> {
    if env.is_some() {
        *source = ConfigSource::Env;
        env
    } else if file.is_some() {
        *source = ConfigSource::ConfigFile;
        file
    } else {
        None
    }
}

fn check_page_size(page_size: u32) -> Result<()> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(HubError::Config(format!(
            "Page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }
    Ok(())
}

// =============================================================================
// Config File
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub token: TokenConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

/// Remote platform connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub account_id: Option<String>,
    pub partner_id: Option<String>,
    pub scope: Option<String>,
    pub audience: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub page_size: u32,
    /// Widest date window per sales query.
    pub max_window_days: i64,
    /// Range used when a sync or doctor run names none.
    pub default_range_days: u32,
    /// Per-run time budget; 0 disables it.
    pub budget_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub refresh_attempts: u32,
    pub expiry_margin_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache database path; defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub admin_key: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: None,
            client_secret: None,
            account_id: None,
            partner_id: None,
            scope: None,
            audience: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_window_days: MAX_WINDOW_DAYS,
            default_range_days: 30,
            budget_seconds: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_attempts: 3,
            expiry_margin_seconds: DEFAULT_EXPIRY_MARGIN.as_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            admin_key: None,
            request_timeout_seconds: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error only if the file exists but is invalid.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error only if the file exists but is invalid.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HubError::Config(format!("Invalid config file: {e}")))?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the file written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| HubError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns [`HubError::Config`] naming the first out-of-bounds value.
    pub fn validate(&self) -> Result<()> {
        check_page_size(self.sync.page_size)?;

        if !(1..=MAX_WINDOW_DAYS).contains(&self.sync.max_window_days) {
            return Err(HubError::Config(format!(
                "max_window_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }

        if self.sync.default_range_days == 0 {
            return Err(HubError::Config(
                "default_range_days must be at least 1".to_string(),
            ));
        }

        for (name, seconds) in [
            ("remote.timeout_seconds", self.remote.timeout_seconds),
            ("server.request_timeout_seconds", self.server.request_timeout_seconds),
        ] {
            if seconds == 0 || seconds > 300 {
                return Err(HubError::Config(format!(
                    "{name} must be between 1 and 300 seconds"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(HubError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(HubError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync.max_window_days, 90);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let config = Config::load_from(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config.remote.timeout_seconds, 30);
    }

    #[test]
    fn load_valid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[remote]
client_id = "cid"
client_secret = "secret"
account_id = "acc-1"

[sync]
page_size = 50
budget_seconds = 20

[server]
admin_key = "k"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.sync.page_size, 50);
        assert_eq!(config.remote.account_id.as_deref(), Some("acc-1"));
        assert_eq!(config.server.bind, "127.0.0.1:8787");

        let resolved =
            ResolvedConfig::resolve_with(&config, &CliOverrides::default(), env_from(&[])).unwrap();
        assert_eq!(resolved.page_size, 50);
        assert_eq!(resolved.sources.page_size, ConfigSource::ConfigFile);
        assert_eq!(resolved.budget, Some(Duration::from_secs(20)));
        assert_eq!(resolved.credentials().unwrap().client_id, "cid");
        assert_eq!(resolved.sources.credentials, ConfigSource::ConfigFile);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(HubError::Config(_))
        ));
    }

    #[test]
    fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.sync.page_size = 25;
        config.server.admin_key = Some("key".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sync.page_size, 25);
        assert_eq!(loaded.server.admin_key.as_deref(), Some("key"));
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let mut config = Config::default();
        config.remote.base_url = "https://file.example".into();

        let env = env_from(&[(ENV_BASE_URL, "https://env.example/")]);
        let resolved =
            ResolvedConfig::resolve_with(&config, &CliOverrides::default(), &env).unwrap();
        assert_eq!(resolved.base_url, "https://env.example");
        assert_eq!(resolved.sources.base_url, ConfigSource::Env);

        let cli = CliOverrides {
            base_url: Some("https://cli.example".into()),
            ..CliOverrides::default()
        };
        let resolved = ResolvedConfig::resolve_with(&config, &cli, &env).unwrap();
        assert_eq!(resolved.base_url, "https://cli.example");
        assert_eq!(resolved.sources.base_url, ConfigSource::Cli);

        let resolved =
            ResolvedConfig::resolve_with(&config, &CliOverrides::default(), env_from(&[])).unwrap();
        assert_eq!(resolved.base_url, "https://file.example");
        assert_eq!(resolved.sources.base_url, ConfigSource::ConfigFile);
    }

    #[test]
    fn missing_credentials_only_fail_on_use() {
        let resolved = ResolvedConfig::resolve_with(
            &Config::default(),
            &CliOverrides::default(),
            env_from(&[(ENV_CLIENT_ID, "only-id")]),
        )
        .unwrap();
        assert!(!resolved.has_credentials());
        assert!(matches!(
            resolved.credentials(),
            Err(HubError::AuthNotConfigured(_))
        ));
    }

    #[test]
    fn env_page_size_is_validated() {
        let bad = ResolvedConfig::resolve_with(
            &Config::default(),
            &CliOverrides::default(),
            env_from(&[(ENV_PAGE_SIZE, "900")]),
        );
        assert!(matches!(bad, Err(HubError::Config(_))));

        let garbage = ResolvedConfig::resolve_with(
            &Config::default(),
            &CliOverrides::default(),
            env_from(&[(ENV_PAGE_SIZE, "ten")]),
        );
        assert!(garbage.is_err());
    }

    #[test]
    fn validate_rejects_out_of_bounds_values() {
        let mut config = Config::default();
        config.sync.max_window_days = 91;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.remote.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.base_delay_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_settings_follow_token_section() {
        let mut config = Config::default();
        config.token.refresh_attempts = 5;
        config.token.expiry_margin_seconds = 30;
        let resolved =
            ResolvedConfig::resolve_with(&config, &CliOverrides::default(), env_from(&[])).unwrap();
        assert_eq!(resolved.token.refresh.max_attempts, 5);
        assert_eq!(resolved.token.expiry_margin, Duration::from_secs(30));
    }
}
