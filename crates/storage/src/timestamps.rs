//! Bucket timestamp tracking shared by all backends.
//!
//! Timestamps are normalized to microsecond precision, the resolution of
//! the SQLite columns, so values compare equal across backends.

use chrono::{DateTime, Utc};

/// Creation / last-modification time of a `(visitor, scope)` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketTimestamps {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl BucketTimestamps {
    pub fn new(created: DateTime<Utc>, updated: DateTime<Utc>) -> Self {
        Self { created, updated }
    }

    /// Keep the earliest creation and the latest modification.
    pub fn merge(self, other: Self) -> Self {
        Self {
            created: self.created.min(other.created),
            updated: self.updated.max(other.updated),
        }
    }

    /// Fold an optional accumulator with another bucket's timestamps.
    pub fn merge_opt(acc: Option<Self>, other: Self) -> Option<Self> {
        Some(match acc {
            Some(acc) => acc.merge(other),
            None => other,
        })
    }
}

/// Current time truncated to microseconds.
pub fn now() -> DateTime<Utc> {
    normalize(Utc::now())
}

pub fn normalize(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(to_micros(ts)).unwrap_or(ts)
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_merge_keeps_outer_bounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = BucketTimestamps::new(t0, t0 + Duration::hours(1));
        let b = BucketTimestamps::new(t0 + Duration::minutes(5), t0 + Duration::hours(2));

        let merged = a.merge(b);
        assert_eq!(merged.created, t0);
        assert_eq!(merged.updated, t0 + Duration::hours(2));
        assert_eq!(b.merge(a), merged);
    }

    #[test]
    fn test_normalize_drops_sub_microsecond_precision() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let normalized = normalize(ts);
        assert_eq!(normalized.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(from_micros(to_micros(normalized)), Some(normalized));
    }
}
