//! Gateway timestamps.
//!
//! deCONZ reports times as ISO-8601 strings without an offset
//! (`2023-01-01T00:00:00` or `2023-01-01T00:00:00.123`), sometimes with a
//! trailing `Z`, and uses the literal `"none"` for "never".

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A possibly-unset gateway timestamp, normalised to UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Option<NaiveDateTime>);

impl Timestamp {
    /// The unset timestamp; renders as `none`.
    pub const UNSET: Timestamp = Timestamp(None);

    /// Wrap an already-parsed time.
    pub fn new(time: NaiveDateTime) -> Self {
        Self(Some(time))
    }

    /// Parse a gateway timestamp. Anything unrecognised becomes [`Timestamp::UNSET`].
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return Self::UNSET;
        }

        if let Ok(time) = raw.parse::<NaiveDateTime>() {
            return Self(Some(time));
        }

        DateTime::parse_from_rfc3339(raw)
            .map(|time| Self(Some(time.naive_utc())))
            .unwrap_or(Self::UNSET)
    }

    /// Whether the gateway supplied a usable time.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// The underlying time, if set.
    pub fn as_naive(&self) -> Option<NaiveDateTime> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(time) = self.0 else {
            return f.write_str("none");
        };

        write!(f, "{}", time.format("%Y-%m-%dT%H:%M:%S"))?;
        // Leap seconds carry an extra 1e9 nanoseconds.
        let millis = time.nanosecond() / 1_000_000 % 1000;
        if millis != 0 {
            write!(f, ".{:03}", millis)?;
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Timestamp::parse).unwrap_or_default())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_iso() {
        let ts = Timestamp::parse("2023-01-01T00:00:00");
        assert!(ts.is_set());
        assert_eq!(ts.to_string(), "2023-01-01T00:00:00");
    }

    #[test]
    fn test_parse_milliseconds() {
        let ts = Timestamp::parse("2024-03-05T17:41:09.250");
        assert_eq!(ts.to_string(), "2024-03-05T17:41:09.250");
    }

    #[test]
    fn test_sub_millisecond_fraction_is_dropped() {
        let ts = Timestamp::parse("2023-01-01T00:00:00.000500");
        assert_eq!(ts.to_string(), "2023-01-01T00:00:00");
    }

    #[test]
    fn test_leap_second_milliseconds() {
        let day = chrono::NaiveDate::from_ymd_opt(2016, 12, 31).unwrap();

        let ts = Timestamp::new(day.and_hms_milli_opt(23, 59, 59, 1_500).unwrap());
        let rendered = ts.to_string();
        assert!(rendered.ends_with(".500"), "{}", rendered);

        let ts = Timestamp::new(day.and_hms_milli_opt(23, 59, 59, 1_000).unwrap());
        assert!(!ts.to_string().contains('.'));
    }

    #[test]
    fn test_parse_utc_suffix_and_offset() {
        assert_eq!(
            Timestamp::parse("2023-06-01T12:30:00Z").to_string(),
            "2023-06-01T12:30:00"
        );
        assert_eq!(
            Timestamp::parse("2023-06-01T14:30:00+02:00").to_string(),
            "2023-06-01T12:30:00"
        );
    }

    #[test]
    fn test_none_and_garbage_are_unset() {
        assert_eq!(Timestamp::parse("none"), Timestamp::UNSET);
        assert_eq!(Timestamp::parse(""), Timestamp::UNSET);
        assert_eq!(Timestamp::parse("yesterday"), Timestamp::UNSET);
        assert_eq!(Timestamp::UNSET.to_string(), "none");
    }

    #[test]
    fn test_deserialize_null_and_missing() {
        let ts: Timestamp = serde_json::from_str("null").unwrap();
        assert!(!ts.is_set());

        let ts: Timestamp = serde_json::from_str("\"2023-01-01T00:00:00\"").unwrap();
        assert!(ts.is_set());
    }

    #[test]
    fn test_serialize_uses_canonical_form() {
        let ts = Timestamp::parse("2023-01-01T08:00:00");
        assert_eq!(
            serde_json::to_string(&ts).unwrap(),
            "\"2023-01-01T08:00:00\""
        );
    }
}
