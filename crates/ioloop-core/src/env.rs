//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `ReactorConfig::from_env()` and
//! `SocketConfig::from_env()`.
//!
//! ```ignore
//! use ioloop_core::env::{env_get, env_get_bool, env_get_size};
//!
//! let max_events: usize = env_get("IOLOOP_MAX_EVENTS", 64);
//! let precise = env_get_bool("IOLOOP_PRECISE_TIMER", false);
//! let send_buf = env_get_size("IOLOOP_SEND_BUFFER_SIZE", 512 * 1024);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as `T`, or return `default`.
///
/// Parse failures fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// "1", "true", "yes", "on" are true and "0", "false", "no", "off" are
/// false (case-insensitive). Anything else, including unset, returns
/// `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Tri-state boolean parse shared with the logging settings.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    const TRUE: [&str; 4] = ["1", "true", "yes", "on"];
    const FALSE: [&str; 4] = ["0", "false", "no", "off"];
    let s = s.trim();
    if TRUE.iter().any(|t| t.eq_ignore_ascii_case(s)) {
        Some(true)
    } else if FALSE.iter().any(|f| f.eq_ignore_ascii_case(s)) {
        Some(false)
    } else {
        None
    }
}

/// `Some(T)` if the variable is set and parses, `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get a byte size. Accepts a plain number or a `K`/`M`/`G` suffix
/// (binary multiples), e.g. `4096`, `512K`, `1m`.
pub fn env_get_size(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_size(&v))
        .unwrap_or(default)
}

fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 10),
        'm' | 'M' => (&s[..s.len() - 1], 20),
        'g' | 'G' => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let n: usize = digits.trim().parse().ok()?;
    n.checked_mul(1usize << shift)
}
