//! Per-cache configuration and its validation rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

pub const DEFAULT_TTL_SECONDS: i64 = 300;
pub const DEFAULT_REFRESH_TRIGGER_SECONDS: i64 = -1;
pub const DEFAULT_REFRESHER_SLEEP_SECONDS: i64 = 5;

/// Longest accepted TTL (1000 years, the local tier's upper bound).
pub const MAX_TTL_SECONDS: i64 = 1000 * 365 * 24 * 3600;

/// Separator between a cache namespace and an entry key in the remote tier.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Immutable configuration for one named cache.
///
/// Relations between the timing fields:
///
/// ```text
/// refresh_trigger_seconds >= 2 * refresher_sleep_seconds   (validated)
/// ttl_seconds             >= 4 * refresher_sleep_seconds   (validated)
/// ttl_seconds >= refresh_trigger_seconds > ttl_seconds / 2 (refresh admission only)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    /// Cache name, case-insensitive key into the registry
    pub name: String,

    /// Entry time-to-live in both tiers
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,

    /// Elapsed time after which a refresher recomputes an entry (<= 0 disables)
    #[serde(default = "default_refresh_trigger_seconds")]
    pub refresh_trigger_seconds: i64,

    /// Poll granularity of the refresh loop
    #[serde(default = "default_refresher_sleep_seconds")]
    pub refresher_sleep_seconds: i64,

    /// Allow refresh tasks to be registered for this cache
    #[serde(default = "default_enabled_auto_refresh")]
    pub enabled_auto_refresh: bool,
}

fn default_ttl_seconds() -> i64 {
    DEFAULT_TTL_SECONDS
}

fn default_refresh_trigger_seconds() -> i64 {
    DEFAULT_REFRESH_TRIGGER_SECONDS
}

fn default_refresher_sleep_seconds() -> i64 {
    DEFAULT_REFRESHER_SLEEP_SECONDS
}

fn default_enabled_auto_refresh() -> bool {
    true
}

impl CacheDescriptor {
    /// Create a descriptor with default timings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl_seconds: default_ttl_seconds(),
            refresh_trigger_seconds: default_refresh_trigger_seconds(),
            refresher_sleep_seconds: default_refresher_sleep_seconds(),
            enabled_auto_refresh: default_enabled_auto_refresh(),
        }
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_refresh(mut self, trigger_seconds: i64, sleep_seconds: i64) -> Self {
        self.refresh_trigger_seconds = trigger_seconds;
        self.refresher_sleep_seconds = sleep_seconds;
        self
    }

    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.enabled_auto_refresh = enabled;
        self
    }

    /// Check the descriptor invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::configuration("cache name is blank"));
        }
        // a namespace must never be a prefix of another cache's namespace
        if self.name.contains(NAMESPACE_SEPARATOR) || self.name.ends_with(':') {
            return Err(CacheError::configuration(format!(
                "cache '{}': name must not contain '{NAMESPACE_SEPARATOR}' or end with ':'",
                self.name
            )));
        }
        if self.ttl_seconds <= 0 {
            return Err(CacheError::configuration(format!(
                "cache '{}': ttl_seconds must be > 0",
                self.name
            )));
        }
        if self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(CacheError::configuration(format!(
                "cache '{}': ttl_seconds must be <= {MAX_TTL_SECONDS}",
                self.name
            )));
        }
        if self.refresh_trigger_seconds > 0 {
            if self.ttl_seconds < self.refresher_sleep_seconds.saturating_mul(4) {
                return Err(CacheError::configuration(format!(
                    "cache '{}': ttl_seconds must be >= 4 * refresher_sleep_seconds",
                    self.name
                )));
            }
            if self.refresh_trigger_seconds < self.refresher_sleep_seconds.saturating_mul(2) {
                return Err(CacheError::configuration(format!(
                    "cache '{}': refresh_trigger_seconds must be >= 2 * refresher_sleep_seconds",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Consume the descriptor, returning it only if it is valid.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Whether a refresh loop may be started for entries of this cache.
    ///
    /// Besides the validation rules this requires the refresh to happen in
    /// the second half of the TTL window, leaving at least two sleep
    /// intervals before expiry.
    pub fn is_refresh_eligible(&self) -> bool {
        self.validate().is_ok()
            && self.enabled_auto_refresh
            && self.refresh_trigger_seconds > 0
            && self.refresher_sleep_seconds > 0
            && self.refresh_trigger_seconds >= self.ttl_seconds / 2
            && self.ttl_seconds - self.refresh_trigger_seconds
                >= self.refresher_sleep_seconds.saturating_mul(2)
    }

    pub fn ttl(&self) -> Duration {
        secs(self.ttl_seconds)
    }

    pub fn refresh_trigger(&self) -> Duration {
        secs(self.refresh_trigger_seconds)
    }

    pub fn refresher_sleep(&self) -> Duration {
        secs(self.refresher_sleep_seconds)
    }
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let d = CacheDescriptor::new("users");
        assert_eq!(d.ttl_seconds, 300);
        assert_eq!(d.refresh_trigger_seconds, -1);
        assert_eq!(d.refresher_sleep_seconds, 5);
        assert!(d.enabled_auto_refresh);
        assert!(d.validate().is_ok());
        assert_eq!(d.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_non_positive_ttl_is_rejected() {
        for ttl in [0, -1, -300] {
            let d = CacheDescriptor::new("users").with_ttl_seconds(ttl);
            assert!(
                matches!(d.validate(), Err(CacheError::Configuration(_))),
                "ttl {ttl} should be rejected"
            );
        }
    }

    #[test]
    fn test_ttl_upper_bound() {
        let d = CacheDescriptor::new("users").with_ttl_seconds(MAX_TTL_SECONDS);
        assert!(d.validate().is_ok());

        for ttl in [MAX_TTL_SECONDS + 1, 99_999_999_999, i64::MAX] {
            let d = CacheDescriptor::new("users").with_ttl_seconds(ttl);
            assert!(
                matches!(d.validate(), Err(CacheError::Configuration(_))),
                "ttl {ttl} should be rejected"
            );
        }
    }

    #[test]
    fn test_namespace_separator_in_name_is_rejected() {
        assert!(CacheDescriptor::new("a::b").validate().is_err());
        assert!(CacheDescriptor::new("a:").validate().is_err());
        assert!(CacheDescriptor::new("a:b").validate().is_ok());
    }

    #[test]
    fn test_blank_name_is_rejected() {
        assert!(CacheDescriptor::new("  ").validate().is_err());
    }

    #[test]
    fn test_refresh_bounds() {
        // ttl < 4 * sleep
        let d = CacheDescriptor::new("a").with_ttl_seconds(19).with_refresh(10, 5);
        assert!(d.validate().is_err());

        // trigger < 2 * sleep
        let d = CacheDescriptor::new("a").with_ttl_seconds(60).with_refresh(9, 5);
        assert!(d.validate().is_err());

        // boundaries are inclusive
        let d = CacheDescriptor::new("a").with_ttl_seconds(20).with_refresh(10, 5);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_refresh_bounds_ignored_when_refresh_disabled() {
        let d = CacheDescriptor::new("a").with_ttl_seconds(1).with_refresh(0, 100);
        assert!(d.validate().is_ok());
        let d = CacheDescriptor::new("a").with_ttl_seconds(1).with_refresh(-1, 100);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_validation_grid() {
        for ttl in -2..=40 {
            for trigger in -2..=25 {
                for sleep in 1..=6 {
                    let d = CacheDescriptor::new("grid")
                        .with_ttl_seconds(ttl)
                        .with_refresh(trigger, sleep);
                    let expected =
                        ttl > 0 && (trigger <= 0 || (ttl >= 4 * sleep && trigger >= 2 * sleep));
                    assert_eq!(
                        d.validate().is_ok(),
                        expected,
                        "ttl={ttl} trigger={trigger} sleep={sleep}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_refresh_eligibility() {
        let d = CacheDescriptor::new("a").with_ttl_seconds(40).with_refresh(20, 5);
        assert!(d.is_refresh_eligible());

        // valid, but refresh would fire in the first half of the TTL
        let d = CacheDescriptor::new("a").with_ttl_seconds(100).with_refresh(20, 5);
        assert!(d.validate().is_ok());
        assert!(!d.is_refresh_eligible());

        // valid, but less than two sleeps left before expiry
        let d = CacheDescriptor::new("a").with_ttl_seconds(40).with_refresh(35, 5);
        assert!(d.validate().is_ok());
        assert!(!d.is_refresh_eligible());

        let d = CacheDescriptor::new("a")
            .with_ttl_seconds(40)
            .with_refresh(20, 5)
            .with_auto_refresh(false);
        assert!(!d.is_refresh_eligible());

        assert!(!CacheDescriptor::new("a").is_refresh_eligible());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let d: CacheDescriptor = serde_json::from_str(r#"{"name": "orders", "ttl_seconds": 60}"#)
            .expect("descriptor");
        assert_eq!(d.name, "orders");
        assert_eq!(d.ttl_seconds, 60);
        assert_eq!(d.refresher_sleep_seconds, DEFAULT_REFRESHER_SLEEP_SECONDS);
        assert_eq!(d.refresh_trigger_seconds, DEFAULT_REFRESH_TRIGGER_SECONDS);
    }
}
