//! Freshness decisions and jittered expiry for cached upstream data.
//!
//! Every cached value carries a next-check timestamp. Until it passes the
//! cached value is reused without asking upstream. Expiries are jittered by
//! up to 25% either way so entities cached together do not all expire in the
//! same instant.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

const HOUR: u64 = 60 * 60;

/// How long a user's star list is reused.
pub const STAR_EXPIRY: Duration = Duration::from_secs(24 * HOUR);

/// How long a found release is reused.
pub const RELEASE_EXPIRY: Duration = Duration::from_secs(HOUR);

/// How long a found release is reused for repositories following tags.
pub const TAGS_RELEASE_EXPIRY: Duration = Duration::from_secs(2 * HOUR);

/// How long "no release" is reused.
pub const NIL_RELEASE_EXPIRY: Duration = Duration::from_secs(24 * HOUR);

/// How long repository display metadata is reused.
pub const REPODATA_EXPIRY: Duration = Duration::from_secs(2 * 24 * HOUR);

/// Whether data guarded by `next_check` may still be reused.
pub fn is_fresh(next_check: Option<DateTime<Utc>>) -> bool {
    is_fresh_at(next_check, Utc::now())
}

/// [`is_fresh`] against an explicit clock.
pub fn is_fresh_at(next_check: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    next_check.is_some_and(|t| t > now)
}

/// `base` moved by a uniformly random offset of up to 25% either way.
pub fn jitter(base: Duration) -> Duration {
    jitter_with(base, rand::random::<f64>())
}

/// Deterministic core of [`jitter`]; `sample` is a draw from `[0, 1)`.
pub fn jitter_with(base: Duration, sample: f64) -> Duration {
    let sample = sample.clamp(0.0, 1.0);
    base.mul_f64(1.0 + (sample - 0.5) / 2.0)
}

/// Next-check timestamp for data fetched at `now`.
pub fn next_check_after(now: DateTime<Utc>, base: Duration) -> DateTime<Utc> {
    now + to_time_delta(jitter(base))
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
