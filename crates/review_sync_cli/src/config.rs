//! Configuration file support for review-sync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (`REVIEW_SYNC_` prefix, `__` between sections,
//!    e.g. `REVIEW_SYNC_SYNC__MAX_CONCURRENT=20`), plus the shortcuts
//!    `REVIEW_SYNC_DATABASE_URL`, `REVIEW_SYNC_TOKEN` and `REVIEW_SYNC_BASE_URL`
//! 3. Config file (./review-sync.toml, then ~/.config/review-sync/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/review-sync/review-sync.db`
//! on Linux (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "postgres://localhost/reviews"
//!
//! [api]
//! base_url = "https://api.example.com/v1"
//! token = "..."  # or REVIEW_SYNC_TOKEN
//! project_id = "p-123"
//! requests_per_second = 10
//!
//! [sync]
//! preset = "production"
//! max_concurrent = 20
//! enable_cache = true
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use review_sync::source::rate_limits;
use review_sync::{Preset, SyncConfig};
use serde::Deserialize;

const APP_NAME: &str = "review-sync";
const ENV_PREFIX: &str = "REVIEW_SYNC";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub sync: SyncSection,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Supports sqlite:// and postgres:// schemes.
    pub url: Option<String>,
}

/// Remote review API.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    /// Bearer token. Prefer `REVIEW_SYNC_TOKEN` over writing it to a file.
    pub token: Option<String>,
    /// Project synced when `--project` is not given.
    pub project_id: Option<String>,
    /// Proactive request rate; 0 disables the limiter.
    pub requests_per_second: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            project_id: None,
            requests_per_second: rate_limits::DEFAULT_RPS,
        }
    }
}

/// Engine tuning: an optional preset with per-field overrides on top.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub preset: Option<String>,
    #[serde(flatten)]
    pub overrides: SyncOverrides,
}

/// Fields set here replace the preset's value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncOverrides {
    pub max_concurrent: Option<usize>,
    pub batch_size: Option<usize>,
    pub page_size: Option<usize>,
    pub enable_cache: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_max_size: Option<usize>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_timeout_secs: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_backoff_factor: Option<f32>,
    pub call_timeout_secs: Option<u64>,
}

impl SyncOverrides {
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { config.$field = v; })*
            };
        }
        set!(
            max_concurrent,
            batch_size,
            page_size,
            enable_cache,
            cache_ttl_secs,
            cache_max_size,
            circuit_breaker_threshold,
            circuit_breaker_timeout_secs,
            max_retries,
            retry_backoff_factor,
            call_timeout_secs,
        );
        config
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/review-sync/config.toml)
    /// 3. Local config file (./review-sync.toml)
    /// 4. Environment variables with the REVIEW_SYNC_ prefix
    /// 5. Shortcut environment variables
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!("Loading config from {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from("review-sync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./review-sync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., REVIEW_SYNC_SYNC__BATCH_SIZE -> sync.batch_size
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, var) in [
            ("database.url", "REVIEW_SYNC_DATABASE_URL"),
            ("api.token", "REVIEW_SYNC_TOKEN"),
            ("api.base_url", "REVIEW_SYNC_BASE_URL"),
            ("api.project_id", "REVIEW_SYNC_PROJECT_ID"),
        ] {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = match builder.set_override_option(key, value) {
                Ok(builder) => builder,
                Err(e) => {
                    tracing::warn!("Ignoring {}: {}", var, e);
                    return Config::default();
                }
            };
        }

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Engine config: the preset (flag, then file, else defaults) with file
    /// overrides applied.
    pub fn sync_config(&self, preset: Option<Preset>) -> Result<SyncConfig, String> {
        let preset = match (preset, self.sync.preset.as_deref()) {
            (Some(preset), _) => Some(preset),
            (None, Some(name)) => Some(name.parse::<Preset>()?),
            (None, None) => None,
        };
        let base = preset.map(SyncConfig::preset).unwrap_or_default();
        Ok(self.sync.overrides.apply(base))
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("review-sync.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// On Linux, `$XDG_STATE_HOME/review-sync` or `~/.local/state/review-sync`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.url.is_none());
        assert!(config.api.token.is_none());
        assert_eq!(config.api.requests_per_second, rate_limits::DEFAULT_RPS);
        assert_eq!(config.sync_config(None).unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_full_config_parsing() {
        let config = parse(
            r#"
            [database]
            url = "sqlite:///tmp/test.db"

            [api]
            base_url = "https://api.example.com/v1"
            token = "secret"
            project_id = "p-1"
            requests_per_second = 5

            [sync]
            max_concurrent = 7
            enable_cache = false
        "#,
        );

        assert_eq!(config.database.url.as_deref(), Some("sqlite:///tmp/test.db"));
        assert_eq!(config.api.project_id.as_deref(), Some("p-1"));
        assert_eq!(config.api.requests_per_second, 5);

        let sync = config.sync_config(None).unwrap();
        assert_eq!(sync.max_concurrent, 7);
        assert!(!sync.enable_cache);
        assert_eq!(sync.batch_size, SyncConfig::default().batch_size);
    }

    #[test]
    fn test_preset_from_file_with_override() {
        let config = parse(
            r#"
            [sync]
            preset = "production"
            batch_size = 150
        "#,
        );

        let sync = config.sync_config(None).unwrap();
        assert_eq!(sync.max_concurrent, SyncConfig::production().max_concurrent);
        assert_eq!(sync.batch_size, 150);
    }

    #[test]
    fn test_flag_preset_wins_over_file_preset() {
        let config = parse(
            r#"
            [sync]
            preset = "production"
        "#,
        );
        let sync = config.sync_config(Some(Preset::Testing)).unwrap();
        assert_eq!(sync, SyncConfig::testing());
    }

    #[test]
    fn test_unknown_preset_is_an_error() {
        let config = parse(
            r#"
            [sync]
            preset = "turbo"
        "#,
        );
        assert!(config.sync_config(None).is_err());
    }

    #[test]
    fn test_database_url_defaults_to_state_dir() {
        let url = Config::default().database_url().unwrap();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("review-sync.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let config = parse(
            r#"
            [sync]
            page_size = 25
            unknown_field = "should be ignored"
        "#,
        );
        assert_eq!(config.sync_config(None).unwrap().page_size, 25);
    }
}
