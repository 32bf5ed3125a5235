//! Duration strings such as `72h`, `1h30m` or `7d`.

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {input:?}: {reason}")]
pub struct ParseDurationError {
    input: String,
    reason: &'static str,
}

impl ParseDurationError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

fn unit_nanos(unit: &str) -> Option<f64> {
    let nanos = match unit {
        "ns" => 1.0,
        "us" | "µs" => 1_000.0,
        "ms" => 1_000_000.0,
        "s" => NANOS_PER_SECOND,
        "m" => 60.0 * NANOS_PER_SECOND,
        "h" => 3_600.0 * NANOS_PER_SECOND,
        "d" => 86_400.0 * NANOS_PER_SECOND,
        "w" => 604_800.0 * NANOS_PER_SECOND,
        _ => return None,
    };
    Some(nanos)
}

/// Parse a sequence of `<number><unit>` terms.
///
/// Units are `ns`, `us`, `ms`, `s`, `m`, `h`, `d` and `w`; numbers may be
/// fractional. A bare `0` is accepted. Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseDurationError::new(input, "empty duration"));
    }
    if trimmed == "0" {
        return Ok(Duration::zero());
    }
    if trimmed.starts_with('-') {
        return Err(ParseDurationError::new(input, "duration must not be negative"));
    }

    let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut total_nanos = 0.0_f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(ParseDurationError::new(input, "expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| ParseDurationError::new(input, "malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(ParseDurationError::new(input, "missing unit"));
        }
        let nanos = unit_nanos(&rest[..unit_len])
            .ok_or_else(|| ParseDurationError::new(input, "unknown unit"))?;
        rest = &rest[unit_len..];

        total_nanos += value * nanos;
    }

    if !total_nanos.is_finite() || total_nanos > i64::MAX as f64 {
        return Err(ParseDurationError::new(input, "duration out of range"));
    }

    Ok(Duration::nanoseconds(total_nanos.round() as i64))
}
