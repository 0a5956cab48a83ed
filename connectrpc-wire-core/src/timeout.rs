//! Deadline propagation headers.
//!
//! Connect sends `connect-timeout-ms` as decimal milliseconds (at most 10
//! digits). gRPC sends `grpc-timeout` as up to 8 digits followed by a unit.

use std::time::Duration;

/// Largest value `connect-timeout-ms` may carry.
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 9_999_999_999;

const MAX_GRPC_TIMEOUT_VALUE: u64 = 99_999_999;

/// Parse `connect-timeout-ms`. Zero, malformed and over-long values mean no deadline.
pub fn parse_connect_timeout(value: &str) -> Option<Duration> {
    if value.is_empty() || value.len() > 10 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ms: u64 = value.parse().ok()?;
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Encode a deadline as `connect-timeout-ms`. Values that do not fit yield `None`.
pub fn encode_connect_timeout(timeout: Duration) -> Option<String> {
    let ms = u64::try_from(timeout.as_millis()).ok()?;
    (ms > 0 && ms <= MAX_CONNECT_TIMEOUT_MS).then(|| ms.to_string())
}

/// Encode a deadline as `grpc-timeout`, choosing the finest unit that fits
/// in eight digits.
pub fn encode_grpc_timeout(timeout: Duration) -> Option<String> {
    if timeout.is_zero() {
        return None;
    }
    let nanos = timeout.as_nanos();
    let units: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60_000_000_000, 'M'),
        (3_600_000_000_000, 'H'),
    ];
    units.iter().find_map(|&(per_unit, unit)| {
        let value = nanos.div_ceil(per_unit);
        (value <= MAX_GRPC_TIMEOUT_VALUE as u128).then(|| format!("{value}{unit}"))
    })
}

/// Parse `grpc-timeout`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let unit = value.chars().last()?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        'H' => Duration::from_secs(amount * 3600),
        'M' => Duration::from_secs(amount * 60),
        'S' => Duration::from_secs(amount),
        'm' => Duration::from_millis(amount),
        'u' => Duration::from_micros(amount),
        'n' => Duration::from_nanos(amount),
        _ => return None,
    };
    (!duration.is_zero()).then_some(duration)
}

/// The tighter of two optional deadlines.
pub fn effective_timeout(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
