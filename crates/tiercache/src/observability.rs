// Tracing initialization with a configurable and reloadable cache log level.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

/// Crates whose events follow the configured level. Everything else logs at `warn`.
const CACHE_TARGETS: [&str; 3] = ["tiercache", "tiercache_core", "tiercache_redis"];

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Filter directives applying `level` to the cache crates.
pub fn cache_filter(level: &str) -> String {
    let mut directives = String::from("warn");
    for target in CACHE_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

pub fn init_tracing(config: &LoggingConfig) -> bool {
    init_tracing_with_level(&config.level)
}

/// Install the global subscriber. Returns `false` if one was already installed,
/// in which case the level cannot be changed at runtime through this module.
pub fn init_tracing_with_level(level: &str) -> bool {
    // RUST_LOG wins over the configured level.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .or_else(|| EnvFilter::try_new(cache_filter(level)).ok())
        .unwrap_or_else(|| EnvFilter::new(cache_filter("info")));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        let _ = LOG_RELOAD_HANDLE.set(handle);
    }
    installed
}

/// Whether [`apply_logging_level`] can take effect.
pub fn is_reloadable() -> bool {
    LOG_RELOAD_HANDLE.get().is_some()
}

/// Change the cache log level at runtime.
pub fn apply_logging_level(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_new(cache_filter(level))
        .map_err(|e| format!("invalid log level '{level}': {e}"))?;
    let handle = LOG_RELOAD_HANDLE
        .get()
        .ok_or_else(|| "tracing was not initialized by tiercache".to_string())?;
    handle
        .modify(|f| *f = filter)
        .map_err(|e| format!("failed to reload log filter: {e}"))?;
    tracing::info!(level, "cache log level changed");
    Ok(())
}
