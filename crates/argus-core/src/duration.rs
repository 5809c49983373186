//! Duration grammar used in configuration and alert annotations.
//!
//! The accepted format is `^[0-9]+[smhd]$` (case-insensitive): a whole
//! number followed by exactly one unit suffix. Plain numbers without a unit
//! are rejected so that a bare `30` can never be silently misread as either
//! seconds or milliseconds.

use std::time::Duration;

/// Seconds per unit suffix.
const UNIT_SECONDS: &[(char, u64)] = &[('s', 1), ('m', 60), ('h', 3600), ('d', 86_400)];

/// Error returned when a duration string does not match the grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{input}': expected <number><s|m|h|d>")]
pub struct DurationParseError {
    /// The rejected input.
    pub input: String,
}

/// Parse a duration string such as `30s`, `10m`, `2h` or `1d`.
///
/// # Errors
///
/// Returns [`DurationParseError`] if the input is empty, has no unit suffix,
/// or the numeric part is not a whole number.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let reject = || DurationParseError {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    let mut chars = trimmed.chars();
    let unit = chars.next_back().ok_or_else(reject)?;
    let digits = chars.as_str();

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(reject());
    }

    let multiplier = UNIT_SECONDS
        .iter()
        .find(|(u, _)| *u == unit.to_ascii_lowercase())
        .map(|(_, secs)| *secs)
        .ok_or_else(reject)?;

    let value: u64 = digits.parse().map_err(|_| reject())?;
    let seconds = value.checked_mul(multiplier).ok_or_else(reject)?;

    Ok(Duration::from_secs(seconds))
}

/// Format a duration in the largest unit that divides it evenly.
///
/// `120s` formats as `2m`, `90s` stays `90s`. Sub-second precision is
/// truncated; the zero duration formats as `0s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds == 0 {
        return "0s".to_string();
    }

    for (unit, unit_seconds) in UNIT_SECONDS.iter().rev() {
        if seconds % unit_seconds == 0 {
            return format!("{}{unit}", seconds / unit_seconds);
        }
    }

    // seconds % 1 == 0 always holds, so the loop cannot fall through.
    unreachable!("seconds unit divides every whole-second duration")
}

/// Serde adapter encoding `Duration` as a grammar string.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as its grammar string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    /// Deserialize a duration from its grammar string.
    ///
    /// # Errors
    ///
    /// Fails when the string does not match the grammar.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter encoding `Option<Duration>` as an optional grammar string.
pub mod serde_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize an optional duration as its grammar string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional duration from its grammar string.
    ///
    /// # Errors
    ///
    /// Fails when a present string does not match the grammar.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
