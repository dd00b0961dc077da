//! Recency filtering and calendar bucketing.

use crate::models::{
    BucketKey, FlatObservation, GroupedResult, Period, RecencyWindow, StatsError, StatsResult,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// A parsed `effectiveDateTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveTime {
    /// Calendar date as written in the record (in its own offset).
    pub date: NaiveDate,
    /// The same moment in UTC.
    pub instant: DateTime<Utc>,
}

/// Parse a FHIR `dateTime`.
///
/// Accepts full timestamps with an offset, timestamps without one, and
/// the partial forms `YYYY-MM-DD`, `YYYY-MM` and `YYYY`, which resolve to
/// the first instant they cover.
///
/// Anything without an offset is read as UTC, never as the host's local
/// time, so `2024-01-15T08:00:00` is `2024-01-15T08:00:00Z` on every
/// machine.
pub fn parse_effective_date_time(raw: &str) -> Option<EffectiveTime> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(EffectiveTime {
            date: dt.date_naive(),
            instant: dt.with_timezone(&Utc),
        });
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(EffectiveTime {
            date: naive.date(),
            instant: naive.and_utc(),
        });
    }

    let date = match raw.len() {
        10 => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?,
        7 => NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d").ok()?,
        4 if raw.bytes().all(|b| b.is_ascii_digit()) => {
            NaiveDate::parse_from_str(&format!("{}-01-01", raw), "%Y-%m-%d").ok()?
        }
        _ => return None,
    };

    Some(EffectiveTime {
        date,
        instant: date.and_hms_opt(0, 0, 0)?.and_utc(),
    })
}

/// Read and parse a record's `effectiveDateTime`, explaining any failure.
fn effective_time(index: usize, record: &FlatObservation) -> StatsResult<EffectiveTime> {
    let raw = record
        .effective_date_time
        .as_deref()
        .ok_or_else(|| StatsError::MalformedRecord {
            index,
            reason: format!("{} has no effectiveDateTime", record.describe()),
        })?;

    parse_effective_date_time(raw).ok_or_else(|| StatsError::MalformedRecord {
        index,
        reason: format!(
            "{} has an unparsable effectiveDateTime '{}'",
            record.describe(),
            raw
        ),
    })
}

/// Group records by calendar period, relative to the current time.
pub fn bucket(
    flat: Vec<FlatObservation>,
    period: Period,
    window: Option<RecencyWindow>,
) -> StatsResult<GroupedResult> {
    bucket_at(flat, period, window, Utc::now())
}

/// Group records by calendar period, with an explicit reference instant.
///
/// With a window, only records strictly newer than `now - window` are
/// kept. Every record must carry a parsable `effectiveDateTime`, including
/// those the window would drop; the first one that does not fails the
/// whole call.
pub fn bucket_at(
    flat: Vec<FlatObservation>,
    period: Period,
    window: Option<RecencyWindow>,
    now: DateTime<Utc>,
) -> StatsResult<GroupedResult> {
    let cutoff = window.map(|w| w.cutoff(now)).transpose()?;

    let total = flat.len();
    let mut buckets: BTreeMap<BucketKey, Vec<FlatObservation>> = BTreeMap::new();
    let mut all = Vec::with_capacity(total);

    for (index, record) in flat.into_iter().enumerate() {
        let effective = effective_time(index, &record)?;

        if let Some(cutoff) = cutoff {
            if effective.instant <= cutoff {
                debug!("Dropping {} (older than {})", record.describe(), cutoff);
                continue;
            }
        }

        let key = BucketKey::containing(effective.date, period).ok_or_else(|| {
            StatsError::MalformedRecord {
                index,
                reason: format!("{} is dated outside the supported range", record.describe()),
            }
        })?;

        buckets.entry(key).or_default().push(record.clone());
        all.push(record);
    }

    debug!(
        "Bucketed {} of {} records into {} {} buckets",
        all.len(),
        total,
        buckets.len(),
        period
    );

    Ok(GroupedResult {
        period,
        window,
        buckets,
        all,
    })
}
