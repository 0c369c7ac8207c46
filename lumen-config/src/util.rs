use std::time::Duration;

use crate::loader::ConfigLoadError;

/// Parse a humantime duration such as `"30s"` or `"1m 30s"`.
pub fn parse_duration(
    field: &'static str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| {
        ConfigLoadError::InvalidDuration {
            field,
            value: raw.to_string(),
            source,
        }
    })
}

/// [`parse_duration`] for an optional field.
pub fn parse_optional_duration(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|value| parse_duration(field, value)).transpose()
}

/// Inverse of [`parse_duration`] for display.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_humantime_forms() {
        assert_eq!(parse_duration("t", "30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("t", " 1m 5s ").unwrap(), Duration::from_secs(65));
        assert_eq!(
            parse_duration("t", "250ms").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn rejects_bare_numbers() {
        let err = parse_duration("http.timeout", "30").unwrap_err();
        assert!(err.to_string().contains("http.timeout"), "{err}");
    }

    #[test]
    fn formats_round_values() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
    }
}
