//! Go-style duration strings (`5m`, `1h30m`, `90s`, `1.5h`).
//!
//! Timeouts on `Build` and `IntegrationPlatform` resources are written in the
//! same notation the `kamel` tooling has always used, so they are parsed here
//! rather than stored as bare seconds.

use std::time::Duration;
use thiserror::Error;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid duration {input:?}: {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: &'static str,
}

impl DurationError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Parse a duration such as `300ms`, `5m` or `1h2m3.5s`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::new(input, "empty string"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(DurationError::new(input, "expected a number"));
        }
        let (number, tail) = rest.split_at(number_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, remaining) = tail.split_at(unit_end);

        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3_600 * NANOS_PER_SECOND,
            "" => return Err(DurationError::new(input, "missing unit")),
            _ => return Err(DurationError::new(input, "unknown unit")),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(DurationError::new(input, "expected a number"));
        }
        if fraction.len() > 18 || fraction.contains('.') {
            return Err(DurationError::new(input, "malformed fraction"));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| DurationError::new(input, "malformed number"))?
        };
        let mut value = whole
            .checked_mul(scale)
            .ok_or_else(|| DurationError::new(input, "overflow"))?;

        if !fraction.is_empty() {
            let digits: u128 = fraction
                .parse()
                .map_err(|_| DurationError::new(input, "malformed fraction"))?;
            let exponent = u32::try_from(fraction.len())
                .map_err(|_| DurationError::new(input, "malformed fraction"))?;
            value += digits * scale / 10u128.pow(exponent);
        }

        total = total
            .checked_add(value)
            .ok_or_else(|| DurationError::new(input, "overflow"))?;
        rest = remaining;
    }

    let seconds =
        u64::try_from(total / NANOS_PER_SECOND).map_err(|_| DurationError::new(input, "overflow"))?;
    // remainder is always below one billion
    let nanos = u32::try_from(total % NANOS_PER_SECOND).unwrap_or(0);
    Ok(Duration::new(seconds, nanos))
}

/// Render a duration in the same notation, e.g. `1h2m3s` or `250ms`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let total_secs = duration.as_secs();
    let nanos = duration.subsec_nanos();

    if total_secs == 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}µs", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if nanos == 0 {
        out.push_str(&format!("{seconds}s"));
    } else {
        let fraction = format!("{nanos:09}");
        out.push_str(&format!("{seconds}.{}s", fraction.trim_end_matches('0')));
    }
    out
}

/// Drop everything below one second.
#[must_use]
pub fn truncate_to_seconds(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}
