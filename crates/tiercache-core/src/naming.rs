//! Encoded cache names.
//!
//! A cache that was never declared can be materialized on first use when its
//! name carries its own configuration:
//!
//! ```text
//! <base>[_<ttl>[_<refreshTrigger>[_<refresherSleep>]]]<suffix>
//!
//! suffix  "#l"   local tier only
//!         "#r"   remote tier only
//!         "#lr"  local + remote
//! ```
//!
//! `orders_60_30_10#lr` is a tiered cache with a 60s TTL refreshed after 30s,
//! polled every 10s. Missing or non-numeric fields fall back to the
//! [`CacheDescriptor`] defaults. The full encoded name is the cache name.

use crate::descriptor::CacheDescriptor;

pub const LOCAL_SUFFIX: &str = "#l";
pub const REMOTE_SUFFIX: &str = "#r";
pub const TIERED_SUFFIX: &str = "#lr";

const FIELD_SEPARATOR: char = '_';

/// Which tiers a cache is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierLayout {
    Local,
    Remote,
    Tiered,
}

impl TierLayout {
    /// Detect the layout from the suffix of an encoded name.
    pub fn from_encoded_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(TIERED_SUFFIX) {
            Some(Self::Tiered)
        } else if lower.ends_with(REMOTE_SUFFIX) {
            Some(Self::Remote)
        } else if lower.ends_with(LOCAL_SUFFIX) {
            Some(Self::Local)
        } else {
            None
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Local => LOCAL_SUFFIX,
            Self::Remote => REMOTE_SUFFIX,
            Self::Tiered => TIERED_SUFFIX,
        }
    }

    pub fn uses_local(&self) -> bool {
        matches!(self, Self::Local | Self::Tiered)
    }

    pub fn uses_remote(&self) -> bool {
        matches!(self, Self::Remote | Self::Tiered)
    }
}

impl std::fmt::Display for TierLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Tiered => write!(f, "tiered"),
        }
    }
}

/// Decode an encoded cache name into its layout and an unvalidated descriptor.
///
/// Returns `None` when the name carries no recognized suffix.
pub fn decode(name: &str) -> Option<(TierLayout, CacheDescriptor)> {
    let layout = TierLayout::from_encoded_name(name)?;
    let body = &name[..name.len() - layout.suffix().len()];

    let mut descriptor = CacheDescriptor::new(name);
    let mut fields = body.split(FIELD_SEPARATOR).skip(1);

    if let Some(ttl) = fields.next() {
        descriptor.ttl_seconds = parse_or(ttl, descriptor.ttl_seconds);
    }
    if let Some(trigger) = fields.next() {
        descriptor.refresh_trigger_seconds = parse_or(trigger, descriptor.refresh_trigger_seconds);
    }
    if let Some(sleep) = fields.next() {
        descriptor.refresher_sleep_seconds = parse_or(sleep, descriptor.refresher_sleep_seconds);
    }

    Some((layout, descriptor))
}

/// Build an encoded name from its parts.
pub fn encode(base: &str, layout: TierLayout, timings: &[i64]) -> String {
    let mut name = base.to_string();
    for value in timings.iter().take(3) {
        name.push(FIELD_SEPARATOR);
        name.push_str(&value.to_string());
    }
    name.push_str(layout.suffix());
    name
}

fn parse_or(field: &str, fallback: i64) -> i64 {
    field.trim().parse().unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DEFAULT_REFRESHER_SLEEP_SECONDS, DEFAULT_TTL_SECONDS};

    #[test]
    fn test_layout_detection() {
        assert_eq!(TierLayout::from_encoded_name("a#l"), Some(TierLayout::Local));
        assert_eq!(TierLayout::from_encoded_name("a#r"), Some(TierLayout::Remote));
        assert_eq!(TierLayout::from_encoded_name("a#lr"), Some(TierLayout::Tiered));
        assert_eq!(TierLayout::from_encoded_name("A_60#LR"), Some(TierLayout::Tiered));
        assert_eq!(TierLayout::from_encoded_name("plain"), None);
        assert_eq!(TierLayout::from_encoded_name("a#x"), None);
    }

    #[test]
    fn test_decode_all_fields() {
        let (layout, d) = decode("demo_60_30_10#lr").expect("decodes");
        assert_eq!(layout, TierLayout::Tiered);
        assert_eq!(d.name, "demo_60_30_10#lr");
        assert_eq!(d.ttl_seconds, 60);
        assert_eq!(d.refresh_trigger_seconds, 30);
        assert_eq!(d.refresher_sleep_seconds, 10);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_decode_trailing_fields_optional() {
        let (layout, d) = decode("sessions_120#r").expect("decodes");
        assert_eq!(layout, TierLayout::Remote);
        assert_eq!(d.ttl_seconds, 120);
        assert_eq!(d.refresh_trigger_seconds, -1);
        assert_eq!(d.refresher_sleep_seconds, DEFAULT_REFRESHER_SLEEP_SECONDS);

        let (_, d) = decode("bare#l").expect("decodes");
        assert_eq!(d.ttl_seconds, DEFAULT_TTL_SECONDS);
    }

    #[test]
    fn test_decode_non_numeric_fields_fall_back() {
        let (_, d) = decode("user_profile_90#lr").expect("decodes");
        assert_eq!(d.ttl_seconds, DEFAULT_TTL_SECONDS);
        assert_eq!(d.refresh_trigger_seconds, 90);
    }

    #[test]
    fn test_decode_keeps_invalid_values_for_validation() {
        let (_, d) = decode("broken_0#l").expect("decodes");
        assert_eq!(d.ttl_seconds, 0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_encode_matches_decode() {
        let name = encode("demo", TierLayout::Tiered, &[60, 30, 10]);
        assert_eq!(name, "demo_60_30_10#lr");
        assert!(decode(&name).is_some());
        assert_eq!(encode("x", TierLayout::Local, &[]), "x#l");
    }
}
