use regex::Regex;
use std::sync::LazyLock;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;
const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([0-9]+)y)?(([0-9]+)w)?(([0-9]+)d)?(([0-9]+)h)?(([0-9]+)m)?(([0-9]+)s)?(([0-9]+)ms)?$")
        .expect("duration regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration string: {0:?}")]
    InvalidDuration(String),
}

/// Format a millisecond duration as a PromQL duration string.
///
/// Years and weeks are only used when they divide the duration exactly, so
/// 90 days renders as `90d` rather than `12w6d`.
pub fn format_duration(ms: u64) -> String {
    if ms == 0 {
        return "0s".to_string();
    }

    let mut rest = ms;
    let mut out = String::new();
    let units: [(&str, u64, bool); 7] = [
        ("y", MS_PER_YEAR, true),
        ("w", MS_PER_WEEK, true),
        ("d", MS_PER_DAY, false),
        ("h", MS_PER_HOUR, false),
        ("m", MS_PER_MINUTE, false),
        ("s", MS_PER_SECOND, false),
        ("ms", 1, false),
    ];

    for (unit, mult, exact) in units {
        if exact && rest % mult != 0 {
            continue;
        }
        let v = rest / mult;
        if v > 0 {
            out.push_str(&format!("{v}{unit}"));
            rest -= v * mult;
        }
    }

    out
}

/// Parse a PromQL duration string (`1h30m`, `5m`, `250ms`, ...) into milliseconds.
///
/// Units must appear in descending order. `"0"` is the only unit-less value accepted.
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    if input == "0" {
        return Ok(0);
    }

    let invalid = || DurationError::InvalidDuration(input.to_string());
    let caps = DURATION_RE.captures(input).ok_or_else(invalid)?;

    // (capture group index, unit multiplier)
    let groups = [
        (2, MS_PER_YEAR),
        (4, MS_PER_WEEK),
        (6, MS_PER_DAY),
        (8, MS_PER_HOUR),
        (10, MS_PER_MINUTE),
        (12, MS_PER_SECOND),
        (14, 1),
    ];

    let mut total: u64 = 0;
    let mut matched = false;
    for (idx, mult) in groups {
        let Some(m) = caps.get(idx) else { continue };
        matched = true;
        let n: u64 = m.as_str().parse().map_err(|_| invalid())?;
        total = n
            .checked_mul(mult)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
    }

    if !matched {
        return Err(invalid());
    }
    Ok(total)
}

/// Parse a sample value as sent by the Prometheus HTTP API.
///
/// Unparsable input yields `NaN`, matching how such values behave in arithmetic.
pub fn parse_prometheus_float(s: &str) -> f64 {
    match s {
        "+Inf" | "Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        _ => s.parse().unwrap_or(f64::NAN),
    }
}

/// Format a sample value the way the Prometheus HTTP API does.
pub fn format_prometheus_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}
