//! Textual scalar parsing shared by parameter decoding and configuration.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("invalid duration `{0}`")]
    Invalid(String),
    #[error("missing unit in duration `{0}`")]
    MissingUnit(String),
    #[error("unknown unit `{unit}` in duration `{input}`")]
    UnknownUnit { unit: String, input: String },
    #[error("negative duration `{0}`")]
    Negative(String),
    #[error("duration `{0}` overflows")]
    Overflow(String),
}

/// Parses a duration such as `"300ms"`, `"1h30m"` or `"1.5h"`.
///
/// Accepted units are `ns`, `us` (also `µs`/`μs`), `ms`, `s`, `m` and `h`.
/// A bare `"0"` is the only unitless value allowed.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_owned());

    let mut rest = input;
    let mut negative = false;
    if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('-') {
        rest = stripped;
        negative = true;
    }

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after) = rest.split_at(int_len);
        rest = after;

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let (unit, after) = rest.split_at(unit_len);
        rest = after;

        let scale: u128 = match unit {
            "" => return Err(DurationError::MissingUnit(input.to_owned())),
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            other => {
                return Err(DurationError::UnknownUnit {
                    unit: other.to_owned(),
                    input: input.to_owned(),
                });
            }
        };

        let overflow = || DurationError::Overflow(input.to_owned());
        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(overflow)?;

        // Fractional digits past nanosecond precision are dropped.
        let mut divisor: u128 = 1;
        let mut frac: u128 = 0;
        for digit in frac_part.bytes() {
            if divisor >= scale {
                break;
            }
            frac = frac * 10 + u128::from(digit - b'0');
            divisor *= 10;
        }
        nanos = nanos
            .checked_add(frac * scale / divisor)
            .ok_or_else(overflow)?;
        total = total.checked_add(nanos).ok_or_else(overflow)?;
    }

    if negative && total != 0 {
        return Err(DurationError::Negative(input.to_owned()));
    }

    let secs = u64::try_from(total / 1_000_000_000)
        .map_err(|_| DurationError::Overflow(input.to_owned()))?;
    let subsec = (total % 1_000_000_000) as u32;
    Ok(Duration::new(secs, subsec))
}

/// Parses the boolean spellings `1 t T TRUE true True` and
/// `0 f F FALSE false False`.
pub fn parse_bool(input: &str) -> Option<bool> {
    match input {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
