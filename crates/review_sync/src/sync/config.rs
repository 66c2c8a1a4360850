//! Tuning knobs for a sync run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheLayer, DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL};
use crate::circuit_breaker::BreakerConfig;
use crate::retry::{DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES, RetryConfig};

use super::types::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT, DEFAULT_PAGE_SIZE};

/// Default per-call timeout in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

/// Engine configuration. Every field has a default, so partial config files
/// deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reviews whose details are fetched concurrently.
    pub max_concurrent: usize,
    /// Reviews written per chunk (and rows per insert statement).
    pub batch_size: usize,
    pub page_size: usize,
    pub enable_cache: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_size: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_backoff_factor: f32,
    pub call_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            enable_cache: true,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            circuit_breaker_threshold: BreakerConfig::default().threshold,
            circuit_breaker_timeout_secs: BreakerConfig::default().timeout.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_factor: DEFAULT_BACKOFF_FACTOR,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

/// Named configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Development,
    Production,
    Testing,
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Preset::Development),
            "production" | "prod" => Ok(Preset::Production),
            "testing" | "test" => Ok(Preset::Testing),
            other => Err(format!("unknown preset '{other}'")),
        }
    }
}

impl SyncConfig {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Development => Self::development(),
            Preset::Production => Self::production(),
            Preset::Testing => Self::testing(),
        }
    }

    /// Small batches, no cache, breaker trips early.
    pub fn development() -> Self {
        Self {
            max_concurrent: 5,
            batch_size: 50,
            enable_cache: false,
            circuit_breaker_threshold: 3,
            max_retries: 2,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            max_concurrent: 20,
            batch_size: 200,
            enable_cache: true,
            cache_ttl_secs: 7200,
            cache_max_size: 5000,
            circuit_breaker_threshold: 10,
            max_retries: 5,
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            max_concurrent: 3,
            batch_size: 10,
            enable_cache: false,
            circuit_breaker_threshold: 2,
            max_retries: 1,
            ..Self::default()
        }
    }

    /// Clamp values that would stall a run (zero concurrency, zero batch).
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.max(1);
        self.batch_size = self.batch_size.max(1);
        self.page_size = self.page_size.max(1);
        self.cache_max_size = self.cache_max_size.max(1);
        self.circuit_breaker_threshold = self.circuit_breaker_threshold.max(1);
        self
    }

    #[inline]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn cache(&self) -> CacheLayer {
        if self.enable_cache {
            CacheLayer::new(Duration::from_secs(self.cache_ttl_secs), self.cache_max_size)
        } else {
            CacheLayer::disabled()
        }
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.circuit_breaker_threshold,
            timeout: Duration::from_secs(self.circuit_breaker_timeout_secs),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            ..RetryConfig::default()
        }
        .with_factor(self.retry_backoff_factor)
    }
}
