//! Typed environment lookups
//!
//! Unset and blank variables fall back to the supplied default. A variable
//! that is set but does not parse is an error rather than a silent fallback,
//! so a typo in a deployment manifest surfaces at startup.

use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read a variable, treating blank values as unset.
pub fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a string variable with a default.
pub fn string_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

/// Parse a variable into `T`, or return `default` when unset.
pub fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match var(key) {
        Some(raw) => raw.parse().map_err(|_| CommonError::invalid(key, raw)),
        None => Ok(default),
    }
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag(key: &str, default: bool) -> Result<bool> {
    match var(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(CommonError::invalid(key, raw)),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_or_default_when_unset() {
        std::env::remove_var("GEOLOAD_TEST_NUMBER");
        assert_eq!(parse_or("GEOLOAD_TEST_NUMBER", 7u32).unwrap(), 7);
    }

    #[test]
    #[serial]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("GEOLOAD_TEST_NUMBER", "seven");
        let err = parse_or("GEOLOAD_TEST_NUMBER", 7u32).unwrap_err();
        assert!(err.to_string().contains("GEOLOAD_TEST_NUMBER"));
        std::env::remove_var("GEOLOAD_TEST_NUMBER");
    }

    #[test]
    #[serial]
    fn test_flag_variants() {
        std::env::set_var("GEOLOAD_TEST_FLAG", "Yes");
        assert!(flag("GEOLOAD_TEST_FLAG", false).unwrap());
        std::env::set_var("GEOLOAD_TEST_FLAG", "0");
        assert!(!flag("GEOLOAD_TEST_FLAG", true).unwrap());
        std::env::set_var("GEOLOAD_TEST_FLAG", "maybe");
        assert!(flag("GEOLOAD_TEST_FLAG", true).is_err());
        std::env::remove_var("GEOLOAD_TEST_FLAG");
    }

    #[test]
    #[serial]
    fn test_blank_is_unset() {
        std::env::set_var("GEOLOAD_TEST_BLANK", "   ");
        assert_eq!(var("GEOLOAD_TEST_BLANK"), None);
        assert_eq!(string_or("GEOLOAD_TEST_BLANK", "fallback"), "fallback");
        std::env::remove_var("GEOLOAD_TEST_BLANK");
    }
}
