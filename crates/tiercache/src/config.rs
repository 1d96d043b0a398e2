use serde::{Deserialize, Serialize};
use tiercache_core::{CacheDeclarations, CacheDescriptor, DEFAULT_CHANNEL, LocalTierSettings};
use tiercache_redis::RedisConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Cache validations
        if self.cache.channel.trim().is_empty() {
            return Err("cache.channel must not be empty".into());
        }
        if self.cache.local_max_entries == 0 || self.cache.local_max_entries < -1 {
            return Err("cache.local_max_entries must be > 0, or -1 for unbounded".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Redis validation
        self.redis.validate()?;
        Ok(())
    }
}

/// Cache declarations and local tier sizing.
///
/// Individual descriptors are validated when registered; an invalid one is
/// logged and skipped rather than failing the whole configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Pub/sub channel for invalidation messages
    #[serde(default = "default_cache_channel")]
    pub channel: String,

    /// Entry bound per local tier (-1 = unbounded)
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: i64,

    /// Local-only caches
    #[serde(default)]
    pub local: Vec<CacheDescriptor>,

    /// Remote-only caches
    #[serde(default)]
    pub remote: Vec<CacheDescriptor>,

    /// Local tier in front of the remote tier
    #[serde(default)]
    pub tiered: Vec<CacheDescriptor>,
}

fn default_cache_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_local_max_entries() -> i64 {
    -1
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            channel: default_cache_channel(),
            local_max_entries: default_local_max_entries(),
            local: Vec::new(),
            remote: Vec::new(),
            tiered: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn declarations(&self) -> CacheDeclarations {
        CacheDeclarations {
            local: self.local.clone(),
            remote: self.remote.clone(),
            tiered: self.tiered.clone(),
        }
    }

    pub fn local_tier_settings(&self) -> LocalTierSettings {
        LocalTierSettings {
            max_entries: u64::try_from(self.local_max_entries)
                .ok()
                .filter(|max| *max > 0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Load `.env` if present. A missing file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv()
        && !matches!(
            e,
            dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound
        )
    {
        tracing::warn!(error = %e, "Failed to load .env file");
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "tiercache.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        // Environment variable overrides, e.g., TIERCACHE__REDIS__ENABLED=true
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
