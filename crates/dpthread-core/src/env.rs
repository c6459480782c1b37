//! Environment variable utilities
//!
//! Typed readers used by `SchedulerConfig::from_env()` and the logging
//! setup. Unset or unparsable variables fall back to the given default.
//!
//! ```ignore
//! use dpthread_core::env::{env_get, env_get_bool, env_get_us};
//!
//! let cores: usize = env_get("DPT_NUM_CORES", 4);
//! let pin = env_get_bool("DPT_PIN_CORES", false);
//! let poll = env_get_us("DPT_MIN_POLL_US", 10);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// "1", "true", "yes", "on" are true and "0", "false", "no", "off" are
/// false (case-insensitive). Anything else, including unset, is `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a microsecond count as a `Duration`
#[inline]
pub fn env_get_us(key: &str, default_us: u64) -> Duration {
    Duration::from_micros(env_get(key, default_us))
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__DPT_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<usize>("__DPT_TEST_UNSET__").is_none());
        assert_eq!(env_get_str("__DPT_TEST_UNSET__", "hello"), "hello");
        assert!(!env_is_set("__DPT_TEST_UNSET__"));
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__DPT_TEST_NUM__", " 123 ");
        let val: usize = env_get("__DPT_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__DPT_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        for (raw, expect) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("off", false)] {
            std::env::set_var("__DPT_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__DPT_TEST_BOOL__", !expect), expect, "{}", raw);
        }

        std::env::set_var("__DPT_TEST_BOOL__", "garbage");
        assert!(env_get_bool("__DPT_TEST_BOOL__", true));
        assert!(!env_get_bool("__DPT_TEST_BOOL__", false));
        std::env::remove_var("__DPT_TEST_BOOL__");
    }

    #[test]
    fn test_env_get_us() {
        std::env::set_var("__DPT_TEST_US__", "250");
        assert_eq!(env_get_us("__DPT_TEST_US__", 1), Duration::from_micros(250));
        std::env::remove_var("__DPT_TEST_US__");
        assert_eq!(env_get_us("__DPT_TEST_US__", 10), Duration::from_micros(10));
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__DPT_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__DPT_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__DPT_TEST_INVALID__");
    }
}
