//! Duration codec for the config file.
//!
//! Accepts either a bare number (interpreted as nanoseconds) or a duration
//! literal such as `"15s"`, and always serializes back to the literal string
//! form, so a round trip through the config file is lossless.

use std::fmt;
use std::ops::Deref;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(pub std::time::Duration);

impl Duration {
    pub fn from_secs(secs: u64) -> Self {
        Duration(std::time::Duration::from_secs(secs))
    }

    pub fn as_std(self) -> std::time::Duration {
        self.0
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Duration(value)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        humantime::format_duration(self.0).fmt(f)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(self.0))
    }
}

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string like \"15s\" or a number of nanoseconds")
    }

    fn visit_u64<E: de::Error>(self, nanos: u64) -> Result<Duration, E> {
        Ok(Duration(std::time::Duration::from_nanos(nanos)))
    }

    fn visit_i64<E: de::Error>(self, nanos: i64) -> Result<Duration, E> {
        if nanos < 0 {
            return Err(E::custom("duration must not be negative"));
        }
        Ok(Duration(std::time::Duration::from_nanos(nanos as u64)))
    }

    fn visit_f64<E: de::Error>(self, nanos: f64) -> Result<Duration, E> {
        if !nanos.is_finite() || nanos < 0.0 {
            return Err(E::custom("duration must be a non-negative number"));
        }
        Ok(Duration(std::time::Duration::from_nanos(nanos as u64)))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        humantime::parse_duration(value)
            .map(Duration)
            .map_err(|err| E::custom(format!("invalid duration {value:?}: {err}")))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_strings() {
        let d: Duration = serde_json::from_str("\"15s\"").unwrap();
        assert_eq!(d, Duration::from_secs(15));

        let d: Duration = serde_json::from_str("\"2m 30s\"").unwrap();
        assert_eq!(d, Duration::from_secs(150));
    }

    #[test]
    fn parses_numbers_as_nanoseconds() {
        let d: Duration = serde_json::from_str("15000000000").unwrap();
        assert_eq!(d, Duration::from_secs(15));
    }

    #[test]
    fn serializes_to_string_form() {
        let json = serde_json::to_string(&Duration::from_secs(15)).unwrap();
        assert_eq!(json, "\"15s\"");
    }

    #[test]
    fn round_trips_both_encodings() {
        for encoded in ["\"15s\"", "15000000000"] {
            let d: Duration = serde_json::from_str(encoded).unwrap();
            let reencoded = serde_json::to_string(&d).unwrap();
            let again: Duration = serde_json::from_str(&reencoded).unwrap();
            assert_eq!(d, again);
            assert_eq!(d.as_std().as_secs(), 15);
        }
    }

    #[test]
    fn rejects_negative_durations() {
        assert!(serde_json::from_str::<Duration>("-5").is_err());
        assert!(serde_json::from_str::<Duration>("\"soon\"").is_err());
    }
}
