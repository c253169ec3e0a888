use std::time::Duration;

use crate::utils::error::{Result, SentinelError};

/// Parses a human period string into a `Duration`.
///
/// Accepted forms: bare seconds (`"300"`), or a number with a unit suffix —
/// `s`, `m`, `h`, `d` (`"90s"`, `"5m"`, `"2h"`, `"1d"`). Whitespace around
/// the value is ignored; zero is rejected.
pub fn parse_period(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SentinelError::validation("empty period"));
    }

    let (number, multiplier) = match trimmed.chars().last() {
        Some('s') | Some('S') => (&trimmed[..trimmed.len() - 1], 1u64),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 60),
        Some('h') | Some('H') => (&trimmed[..trimmed.len() - 1], 3600),
        Some('d') | Some('D') => (&trimmed[..trimmed.len() - 1], 86400),
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        _ => {
            return Err(SentinelError::validation(format!(
                "unrecognized period: {trimmed}"
            )))
        }
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| SentinelError::validation(format!("unrecognized period: {trimmed}")))?;
    if value == 0 {
        return Err(SentinelError::validation("period must be positive"));
    }

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| SentinelError::validation(format!("period overflows: {trimmed}")))
}
