//! Human-readable durations for config files ("500ms", "5s", "2m", "1h").

use std::time::Duration;

/// Parse a duration string. A bare number is read as seconds.
///
/// Returns `None` for anything that isn't a non-negative finite value
/// with a known suffix.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, scale) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1e6)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1e9)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60e9)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600e9)
    } else {
        (s, 1e9)
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((value * scale).round() as u64))
}

/// Format a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "0s".to_string()
    } else if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

/// Format an elapsed run time as `HHh MMm SSs`.
pub fn format_elapsed(d: Duration) -> String {
    let total = d.as_secs_f64().round() as u64;
    let (m, s) = (total / 60, total % 60);
    let (h, m) = (m / 60, m % 60);
    format!("{h:02}h {m:02}m {s:02}s")
}

/// `#[serde(with = "...")]` adapter storing a `Duration` as a string.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}")))
    }

    /// Same adapter for `Option<Duration>`.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&crate::duration::format_duration(*d)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|raw| {
                crate::duration::parse_duration(&raw)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}")))
            })
            .transpose()
        }
    }
}
