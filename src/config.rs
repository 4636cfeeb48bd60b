// src/config.rs
//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `QUIRE__SECTION__KEY` environment variables. Relative paths in a config
//! file are resolved against the directory that file lives in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Names an explicit config file when no path is passed on the command line.
pub const CONFIG_ENV: &str = "QUIRE_CONFIG";
const ENV_PREFIX: &str = "QUIRE";
const DEFAULT_FILE: &str = "quire";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub renderer: RendererConfig,
    pub selector: SelectorConfig,
    pub storage: StorageConfig,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: usize,
    pub ttl_secs: u64,
    pub purge_interval_secs: u64,
    /// Where rendered PDFs are written.
    pub output_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1000,
            ttl_secs: 7 * 24 * 60 * 60,
            purge_interval_secs: 60 * 60,
            output_dir: PathBuf::from("data/pdf"),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub worker_count: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Job starts allowed per `rate_limit_window_secs`.
    pub rate_limit_starts: u32,
    pub rate_limit_window_secs: u64,
    pub stall_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub completed_retention_secs: u64,
    pub failed_retention_secs: u64,
    /// Concurrent renders allowed on the synchronous path.
    pub sync_max_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_attempts: 3,
            base_delay_ms: 2000,
            rate_limit_starts: 10,
            rate_limit_window_secs: 60,
            stall_timeout_secs: 90,
            heartbeat_interval_secs: 10,
            completed_retention_secs: 24 * 60 * 60,
            failed_retention_secs: 7 * 24 * 60 * 60,
            sync_max_concurrency: 2,
        }
    }
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn failed_retention(&self) -> Duration {
        Duration::from_secs(self.failed_retention_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub timeout_secs: u64,
    pub browser_pool_size: usize,
    pub chromium_path: PathBuf,
    /// Extra Chromium flags, e.g. `--no-sandbox` in containers.
    pub chromium_args: Vec<String>,
    pub soffice_path: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            browser_pool_size: 2,
            chromium_path: PathBuf::from("chromium"),
            chromium_args: Vec::new(),
            soffice_path: PathBuf::from("soffice"),
        }
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Proposals with more sections than this go to the browser renderer.
    pub section_threshold: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            section_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The sled database holding the cache index and job tables.
    pub path: PathBuf,
    /// Directory of `<proposal_id>.json` records.
    pub content_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/quire.db"),
            content_dir: PathBuf::from("data/proposals"),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from `path`, or from `$QUIRE_CONFIG`, or from
    /// `./quire.toml` if present, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));

        let mut builder = config::Config::builder();
        let base_dir = match &explicit {
            Some(file) => {
                builder = builder.add_source(config::File::from(file.as_path()).required(true));
                file.parent().map(Path::to_path_buf)
            }
            None => {
                builder = builder.add_source(config::File::with_name(DEFAULT_FILE).required(false));
                None
            }
        };

        // Always layer environment variables on top
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;
        if let Some(base) = base_dir {
            config.resolve_paths(&base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.cache.output_dir,
            &mut self.storage.path,
            &mut self.storage.content_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.cache.max_capacity == 0, "cache.max_capacity must be at least 1"),
            (self.cache.ttl_secs == 0, "cache.ttl_secs must be at least 1"),
            (self.cache.purge_interval_secs == 0, "cache.purge_interval_secs must be at least 1"),
            (self.queue.worker_count == 0, "queue.worker_count must be at least 1"),
            (self.queue.max_attempts == 0, "queue.max_attempts must be at least 1"),
            (self.queue.rate_limit_starts == 0, "queue.rate_limit_starts must be at least 1"),
            (self.queue.rate_limit_window_secs == 0, "queue.rate_limit_window_secs must be at least 1"),
            (self.queue.sync_max_concurrency == 0, "queue.sync_max_concurrency must be at least 1"),
            (
                self.queue.heartbeat_interval_secs == 0,
                "queue.heartbeat_interval_secs must be at least 1",
            ),
            (
                self.queue.stall_timeout_secs <= self.queue.heartbeat_interval_secs,
                "queue.stall_timeout_secs must exceed queue.heartbeat_interval_secs",
            ),
            (self.renderer.timeout_secs == 0, "renderer.timeout_secs must be at least 1"),
            (self.renderer.browser_pool_size == 0, "renderer.browser_pool_size must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}
