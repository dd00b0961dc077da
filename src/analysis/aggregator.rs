//! Period and whole-series statistics.
//!
//! This module turns grouped observations into the numbers a report
//! shows: a mean per calendar period, and the best value, threshold
//! markers and mean across the whole series.

use crate::models::{
    AllTimeStat, FlatObservation, GroupedResult, MeanPolicy, PeriodStat, SortOrder, StatsError,
    StatsResult, EIGHTY_PERCENT, FIFTY_PERCENT,
};
use tracing::debug;

/// Mean of the records' values under the given policy.
///
/// Returns `None` when the divisor would be zero: an empty slice, or no
/// valued record under `MeanPolicy::IgnoreMissing`.
pub fn mean_value(records: &[FlatObservation], policy: MeanPolicy) -> Option<f64> {
    let (sum, valued) = records
        .iter()
        .filter_map(FlatObservation::value)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));

    let divisor = match policy {
        MeanPolicy::TreatAsZero => records.len(),
        MeanPolicy::IgnoreMissing => valued,
    };

    if divisor == 0 {
        None
    } else {
        Some(sum / divisor as f64)
    }
}

/// Largest value among records that carry one.
pub fn best_value(records: &[FlatObservation]) -> Option<f64> {
    records
        .iter()
        .filter_map(FlatObservation::value)
        .reduce(f64::max)
}

/// Compute one statistic per bucket, ordered by period.
///
/// Only buckets that hold records appear; no empty periods are filled in.
pub fn stats_for_period(
    grouped: &GroupedResult,
    order: SortOrder,
    policy: MeanPolicy,
) -> Vec<PeriodStat> {
    // Buckets iterate oldest first.
    let mut stats: Vec<PeriodStat> = grouped
        .buckets
        .iter()
        .map(|(key, records)| PeriodStat {
            label: key.label(),
            sort_key: key.sort_key(),
            mean: mean_value(records, policy),
            count: records.len(),
        })
        .collect();

    if order == SortOrder::Desc {
        stats.reverse();
    }

    debug!("Computed {} period stats ({})", stats.len(), order);
    stats
}

/// Compute best value, threshold markers and mean over the whole series.
///
/// An empty series yields `Ok(None)`. A non-empty series in which no record
/// carries a value has no maximum and fails with
/// `StatsError::EmptySeriesMaximum`.
pub fn stats_all_time(
    flat: &[FlatObservation],
    policy: MeanPolicy,
) -> StatsResult<Option<AllTimeStat>> {
    if flat.is_empty() {
        return Ok(None);
    }

    let best = best_value(flat).ok_or(StatsError::EmptySeriesMaximum)?;
    let mean = mean_value(flat, policy).ok_or(StatsError::EmptySeriesMaximum)?;

    Ok(Some(AllTimeStat {
        best,
        eighty_percent: best * EIGHTY_PERCENT,
        fifty_percent: best * FIFTY_PERCENT,
        mean,
        count: flat.len(),
    }))
}

/// Number of records that carry no value.
pub fn missing_values(records: &[FlatObservation]) -> usize {
    records.iter().filter(|r| r.value().is_none()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bucket;
    use crate::models::{Period, Quantity};

    const EPSILON: f64 = 1e-9;

    fn record(date: &str, value: Option<f64>) -> FlatObservation {
        FlatObservation {
            effective_date_time: Some(date.to_string()),
            value_quantity: value.map(|v| Quantity {
                value: Some(v),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scenario_a() -> Vec<FlatObservation> {
        vec![
            record("2024-01-15", Some(100.0)),
            record("2024-01-20", Some(120.0)),
            record("2024-02-02", Some(90.0)),
        ]
    }

    #[test]
    fn test_monthly_means_most_recent_first() {
        let grouped = bucket(scenario_a(), Period::Month, None).unwrap();

        let stats = stats_for_period(&grouped, SortOrder::Desc, MeanPolicy::TreatAsZero);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].label, "February 2024");
        assert_eq!(stats[0].mean, Some(90.0));
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[1].label, "January 2024");
        assert_eq!(stats[1].mean, Some(110.0));
        assert_eq!(stats[1].sort_key, "2024-01-01");
    }

    #[test]
    fn test_ascending_is_reverse_of_descending() {
        let mut flat = scenario_a();
        flat.push(record("2023-11-30", Some(80.0)));
        flat.push(record("2024-03-01", None));
        let grouped = bucket(flat, Period::Week, None).unwrap();

        let mut asc = stats_for_period(&grouped, SortOrder::Asc, MeanPolicy::TreatAsZero);
        let desc = stats_for_period(&grouped, SortOrder::Desc, MeanPolicy::TreatAsZero);

        assert!(asc.windows(2).all(|w| w[0].sort_key < w[1].sort_key));
        asc.reverse();
        assert_eq!(asc, desc);
    }

    #[test]
    fn test_single_record_mean_is_its_value() {
        let grouped = bucket(vec![record("2024-05-05", Some(412.5))], Period::Week, None).unwrap();

        let stats = stats_for_period(&grouped, SortOrder::Desc, MeanPolicy::TreatAsZero);

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].mean, Some(412.5));
        assert_eq!(stats[0].label, "Week 18 2024");
    }

    #[test]
    fn test_mean_policies() {
        let records = vec![
            record("2024-01-01", Some(100.0)),
            record("2024-01-02", None),
        ];

        assert_eq!(mean_value(&records, MeanPolicy::TreatAsZero), Some(50.0));
        assert_eq!(mean_value(&records, MeanPolicy::IgnoreMissing), Some(100.0));

        let unvalued = vec![record("2024-01-01", None)];
        assert_eq!(mean_value(&unvalued, MeanPolicy::TreatAsZero), Some(0.0));
        assert_eq!(mean_value(&unvalued, MeanPolicy::IgnoreMissing), None);
        assert_eq!(mean_value(&[], MeanPolicy::TreatAsZero), None);
        assert_eq!(missing_values(&records), 1);
    }

    #[test]
    fn test_all_time_stats() {
        let stat = stats_all_time(&scenario_a(), MeanPolicy::TreatAsZero)
            .unwrap()
            .unwrap();

        assert_eq!(stat.best, 120.0);
        assert!((stat.eighty_percent - 96.0).abs() < EPSILON);
        assert!((stat.fifty_percent - 60.0).abs() < EPSILON);
        assert!((stat.mean - 310.0 / 3.0).abs() < EPSILON);
        assert_eq!(stat.count, 3);
    }

    #[test]
    fn test_threshold_ordering() {
        for best in [0.0, 1.0, 37.5, 650.0] {
            let stat = stats_all_time(&[record("2024-01-01", Some(best))], MeanPolicy::TreatAsZero)
                .unwrap()
                .unwrap();
            assert_eq!(stat.eighty_percent, 0.8 * best);
            assert_eq!(stat.fifty_percent, 0.5 * best);
            assert!(stat.fifty_percent <= stat.eighty_percent);
            assert!(stat.eighty_percent <= stat.best);
        }
    }

    #[test]
    fn test_all_time_empty_series_is_no_data() {
        assert_eq!(stats_all_time(&[], MeanPolicy::TreatAsZero), Ok(None));
    }

    #[test]
    fn test_all_time_without_values_fails() {
        let flat = vec![record("2024-01-01", None), record("2024-01-02", None)];

        assert_eq!(
            stats_all_time(&flat, MeanPolicy::TreatAsZero),
            Err(StatsError::EmptySeriesMaximum)
        );
    }

    #[test]
    fn test_all_time_mean_zero_fill_depresses_average() {
        let flat = vec![
            record("2024-01-01", Some(300.0)),
            record("2024-01-02", None),
            record("2024-01-03", Some(600.0)),
        ];

        let zero = stats_all_time(&flat, MeanPolicy::TreatAsZero).unwrap().unwrap();
        let ignore = stats_all_time(&flat, MeanPolicy::IgnoreMissing).unwrap().unwrap();

        assert_eq!(zero.mean, 300.0);
        assert_eq!(ignore.mean, 450.0);
        assert_eq!(zero.best, ignore.best);
    }
}
