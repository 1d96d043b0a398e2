use std::{env, fs};

use tiercache::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("tiercache.toml");

    let toml_content = r#"
[cache]
channel = "app:invalidate"
local_max_entries = 1000

[[cache.local]]
name = "sessions"
ttl_seconds = 120

[[cache.tiered]]
name = "users"
ttl_seconds = 600
refresh_trigger_seconds = 360
refresher_sleep_seconds = 30

[[cache.tiered]]
name = "catalog"
enabled_auto_refresh = false

[redis]
enabled = false
url = "redis://cache:6379"

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.cache.channel, "app:invalidate");
    assert_eq!(cfg.cache.local_tier_settings().max_entries, Some(1000));
    assert_eq!(cfg.cache.local.len(), 1);
    assert_eq!(cfg.cache.local[0].ttl_seconds, 120);
    assert_eq!(cfg.cache.tiered.len(), 2);
    assert_eq!(cfg.cache.tiered[0].name, "users");
    assert_eq!(cfg.cache.tiered[0].refresh_trigger_seconds, 360);
    assert_eq!(cfg.cache.tiered[1].ttl_seconds, 300);
    assert!(!cfg.cache.tiered[1].enabled_auto_refresh);
    assert!(cfg.cache.remote.is_empty());
    assert_eq!(cfg.redis.url, "redis://cache:6379");
    assert_eq!(cfg.redis.pool_size, 10);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("TIERCACHE__REDIS__POOL_SIZE", "32");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.redis.pool_size, 32);
    // cleanup env var
    unsafe {
        env::remove_var("TIERCACHE__REDIS__POOL_SIZE");
    }

    // 3) Invalid values fail validation
    let invalid = toml_content.replace("level = \"debug\"", "level = \"chatty\"");
    fs::write(&path, invalid).expect("write toml");
    let err = load_config(path.to_str()).expect_err("should fail validation");
    assert!(err.contains("logging.level"), "unexpected error: {err}");

    // 4) Redis settings are only checked when enabled
    let invalid = toml_content
        .replace("enabled = false", "enabled = true")
        .replace("redis://cache:6379", "http://cache:6379");
    fs::write(&path, invalid).expect("write toml");
    let err = load_config(path.to_str()).expect_err("should fail validation");
    assert!(err.contains("redis.url"), "unexpected error: {err}");
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults");
    assert_eq!(cfg.cache.channel, "tiercache:invalidation");
    assert!(cfg.cache.tiered.is_empty());
    assert!(!cfg.redis.enabled);
}
