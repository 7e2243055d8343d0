//! Time utilities: local wall-clock parsing and the persisted datetime format.

use chrono::{Local, NaiveDateTime, Timelike};

use crate::error::ValidationError;

/// Persisted datetime format (local wall clock, second precision).
pub const WALL_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Day-first is the form users type; ISO forms come from files and scripts.
const INPUT_FORMATS: [&str; 6] = [
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a due instant like "25/12/2026 14:30" or "2026-12-25 14:30".
pub fn parse_due(input: &str) -> Result<NaiveDateTime, ValidationError> {
    let trimmed = input.trim();
    INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ValidationError::MalformedDateTime {
            input: trimmed.to_string(),
        })
}

pub fn format_wall_clock(dt: NaiveDateTime) -> String {
    dt.format(WALL_CLOCK_FORMAT).to_string()
}

/// Short form for listings: "25/12/2026 14:30".
pub fn format_short(dt: NaiveDateTime) -> String {
    dt.format("%d/%m/%Y %H:%M").to_string()
}

pub fn truncate_to_second(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Current local wall-clock time, second precision.
pub fn local_now() -> NaiveDateTime {
    truncate_to_second(Local::now().naive_local())
}

/// serde adapter for `NaiveDateTime` in [`WALL_CLOCK_FORMAT`].
pub mod wall_clock {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::WALL_CLOCK_FORMAT;

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(WALL_CLOCK_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, WALL_CLOCK_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for `Option<NaiveDateTime>`; `null` and missing both map to `None`.
pub mod wall_clock_opt {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::WALL_CLOCK_FORMAT;

    pub fn serialize<S: Serializer>(dt: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&dt.format(WALL_CLOCK_FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => NaiveDateTime::parse_from_str(s, WALL_CLOCK_FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_day_first_and_iso() {
        let expected = NaiveDate::from_ymd_opt(2026, 12, 25)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(parse_due("25/12/2026 14:30").unwrap(), expected);
        assert_eq!(parse_due(" 2026-12-25 14:30 ").unwrap(), expected);
        assert_eq!(parse_due("2026-12-25 14:30:00").unwrap(), expected);
        assert_eq!(parse_due("2026-12-25T14:30").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_due("tomorrow"),
            Err(ValidationError::MalformedDateTime { .. })
        ));
        assert!(parse_due("25/13/2026 14:30").is_err());
        assert!(parse_due("25/12/2026 24:30").is_err());
    }

    #[test]
    fn test_wall_clock_format() {
        let dt = NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(format_wall_clock(dt), "2026-01-02 03:04:05");
        assert_eq!(format_short(dt), "02/01/2026 03:04");
    }
}
