//! Go-style duration strings ("30s", "1h30m", "500ms").

use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Parse a duration string made of one or more `<number><unit>` segments.
///
/// Supported units: `ms`, `s`, `m`, `h`. Segments accumulate, so `"1h30m"`
/// is ninety minutes. Fractional values are accepted per segment (`"1.5h"`).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ConfigError::validation("duration string is empty"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| ConfigError::validation(format!("duration '{input}' is missing a unit")))?;
        if digits_end == 0 {
            return Err(ConfigError::validation(format!(
                "duration '{input}' has a unit without a value"
            )));
        }

        let value: f64 = rest[..digits_end].parse().map_err(|_| {
            ConfigError::validation(format!("duration '{input}' has an invalid number"))
        })?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let unit = &rest[digits_end..unit_end];

        let millis = match unit {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            "h" => value * 3_600_000.0,
            other => {
                return Err(ConfigError::validation(format!(
                    "duration '{input}' has an unknown unit '{other}'"
                )))
            }
        };
        if !millis.is_finite() || millis < 0.0 {
            return Err(ConfigError::validation(format!(
                "duration '{input}' is out of range"
            )));
        }

        total += Duration::from_millis(millis.round() as u64);
        rest = &rest[unit_end..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parses_fractional_values() {
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("12").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("ten seconds").is_err());
    }
}
