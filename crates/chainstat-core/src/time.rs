//! Duration parsing and time bucketing.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
///
/// Buckets are aligned on this origin so that durations which do not divide a
/// day evenly (e.g. `7h`) still produce stable boundaries.
const ZERO_TIME_OFFSET_SECS: i128 = 62_135_596_800;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Parse a bucket duration such as `6h`, `1m`, `90s` or `1h 30m`.
///
/// Zero durations are rejected since they cannot define a bucket.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value.trim()).map_err(|e| Error::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if duration.is_zero() {
        return Err(Error::InvalidDuration {
            value: value.to_string(),
            reason: "duration must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

/// Round `time` down to a multiple of `duration` since 0001-01-01T00:00:00Z.
///
/// A zero duration returns `time` unchanged.
pub fn truncate_time(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let step = duration.as_nanos() as i128;
    if step == 0 {
        return time;
    }

    let since_zero = (time.timestamp() as i128 + ZERO_TIME_OFFSET_SECS) * NANOS_PER_SEC
        + time.timestamp_subsec_nanos() as i128;
    let truncated = since_zero - since_zero.rem_euclid(step);

    let secs = truncated.div_euclid(NANOS_PER_SEC) - ZERO_TIME_OFFSET_SECS;
    let nanos = truncated.rem_euclid(NANOS_PER_SEC);
    DateTime::from_timestamp(secs as i64, nanos as u32).unwrap_or(time)
}
