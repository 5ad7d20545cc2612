//! ISO-8601 style duration parsing for delay steps.
//!
//! Accepts the `P[nD][T[nH][nM][nS]]` subset: whole-number day, hour, minute
//! and second components, in that order, each at most once. Weeks, months,
//! years and fractions are rejected, as is anything longer than
//! [`MAX_DURATION_MS`].

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Longest accepted delay: ten 365-day years.
pub const MAX_DURATION_MS: u64 = 3_650 * DAY_MS;

/// Errors from duration parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("invalid duration '{0}'")]
    Invalid(String),

    #[error("duration '{0}' is zero")]
    Zero(String),

    #[error("duration '{0}' overflows")]
    Overflow(String),

    #[error("duration '{0}' exceeds the maximum of 3650 days")]
    TooLong(String),
}

/// Parse a duration like `PT5M` or `P1DT2H` into milliseconds.
///
/// Zero-length durations are an error.
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    let raw = input.trim();
    let invalid = || DurationError::Invalid(input.to_string());

    let rest = raw
        .strip_prefix('P')
        .or_else(|| raw.strip_prefix('p'))
        .ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match rest.find(['T', 't']) {
        Some(idx) => {
            let time = &rest[idx + 1..];
            if time.is_empty() {
                return Err(invalid());
            }
            (&rest[..idx], Some(time))
        }
        None => (rest, None),
    };

    let mut total: u64 = 0;
    let mut add = |value: u64, unit_ms: u64| -> Result<(), DurationError> {
        total = value
            .checked_mul(unit_ms)
            .and_then(|ms| total.checked_add(ms))
            .ok_or_else(|| DurationError::Overflow(input.to_string()))?;
        Ok(())
    };

    match components(date_part).ok_or_else(invalid)?.as_slice() {
        [] => {}
        [(value, 'D')] => add(*value, DAY_MS)?,
        _ => return Err(invalid()),
    }

    if let Some(time) = time_part {
        // Units must appear in H, M, S order, each at most once.
        let mut last_rank = 0;
        for (value, unit) in components(time).ok_or_else(invalid)? {
            let (rank, unit_ms) = match unit {
                'H' => (1, HOUR_MS),
                'M' => (2, MINUTE_MS),
                'S' => (3, SECOND_MS),
                _ => return Err(invalid()),
            };
            if rank <= last_rank {
                return Err(invalid());
            }
            last_rank = rank;
            add(value, unit_ms)?;
        }
    }

    if total == 0 {
        return Err(DurationError::Zero(input.to_string()));
    }
    if total > MAX_DURATION_MS {
        return Err(DurationError::TooLong(input.to_string()));
    }
    Ok(total)
}

/// Split `1D` / `2H30M` into `(number, unit)` pairs. `None` on malformed input.
fn components(part: &str) -> Option<Vec<(u64, char)>> {
    let mut out = Vec::new();
    let mut digits = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if digits.is_empty() {
                return None;
            }
            let value = digits.parse::<u64>().ok()?;
            out.push((value, c.to_ascii_uppercase()));
            digits.clear();
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes() {
        assert_eq!(parse_duration("PT5M"), Ok(300_000));
    }

    #[test]
    fn test_day_and_hours() {
        assert_eq!(parse_duration("P1DT2H"), Ok(93_600_000));
    }

    #[test]
    fn test_all_components() {
        assert_eq!(
            parse_duration("P1DT2H30M15S"),
            Ok(DAY_MS + 2 * HOUR_MS + 30 * MINUTE_MS + 15 * SECOND_MS)
        );
        assert_eq!(parse_duration("P2D"), Ok(2 * DAY_MS));
        assert_eq!(parse_duration("PT45S"), Ok(45_000));
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        assert_eq!(parse_duration(" pt1h "), Ok(HOUR_MS));
    }

    #[test]
    fn test_zero_is_rejected() {
        assert!(matches!(parse_duration("PT0M"), Err(DurationError::Zero(_))));
        assert!(matches!(parse_duration("P0D"), Err(DurationError::Zero(_))));
    }

    #[test]
    fn test_invalid_inputs() {
        for input in ["", "P", "PT", "5M", "PT5", "PTM", "P1W", "P1Y", "PT1.5H", "PT5M1H", "PT1H1H", "P1H", "P1D1D", "P1D2DT1H"] {
            assert!(
                matches!(parse_duration(input), Err(DurationError::Invalid(_))),
                "expected '{input}' to be invalid"
            );
        }
    }

    #[test]
    fn test_upper_bound() {
        assert_eq!(parse_duration("P3650D"), Ok(MAX_DURATION_MS));
        assert!(matches!(parse_duration("P3650DT1S"), Err(DurationError::TooLong(_))));
        assert!(matches!(parse_duration("P100000000D"), Err(DurationError::TooLong(_))));
    }

    #[test]
    fn test_overflow() {
        assert!(matches!(
            parse_duration("P99999999999999999D"),
            Err(DurationError::Overflow(_))
        ));
    }
}
