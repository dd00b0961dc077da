//! Data models for observation statistics.
//!
//! This module contains the records flowing through the pipeline
//! (raw and flattened observations), the period/order/policy settings
//! that steer it, and the statistics it produces.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fraction of the best value used for the upper threshold marker.
pub const EIGHTY_PERCENT: f64 = 0.8;

/// Fraction of the best value used for the lower threshold marker.
pub const FIFTY_PERCENT: f64 = 0.5;

/// Errors raised by the statistics pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    /// A record has no usable `effectiveDateTime`.
    #[error("malformed record #{index}: {reason}")]
    MalformedRecord { index: usize, reason: String },

    /// A maximum was requested over a series where no record carries a value.
    #[error("no record in the series carries a value; the maximum is undefined")]
    EmptySeriesMaximum,

    /// An unknown period, unit, order or policy value.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type StatsResult<T> = std::result::Result<T, StatsError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A measured amount (FHIR `Quantity`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A raw observation as delivered by the data source.
///
/// Only the fields the pipeline reads are typed; everything else is kept
/// in `extra` so it survives flattening untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
    /// Additional measurements taken at the same instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Vec<Component>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Observation {
    /// Returns true if the record carries at least one component.
    pub fn has_components(&self) -> bool {
        self.component.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// One entry of an observation's `component` list.
///
/// Shaped like a partial observation: any field it sets overrides the
/// parent's field when flattened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An observation with its components resolved away.
///
/// There is no `component` field: a flat record never needs further
/// expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlatObservation {
    /// The measured value, if the record carries one.
    pub fn value(&self) -> Option<f64> {
        self.value_quantity.as_ref().and_then(|q| q.value)
    }

    /// Short description used in log and error messages.
    pub fn describe(&self) -> String {
        match self.id {
            Some(ref id) => format!("Observation/{}", id),
            None => "Observation (no id)".to_string(),
        }
    }
}

impl From<Observation> for FlatObservation {
    fn from(observation: Observation) -> Self {
        Self {
            id: observation.id,
            code: observation.code,
            effective_date_time: observation.effective_date_time,
            value_quantity: observation.value_quantity,
            extra: observation.extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Calendar granularity used for bucketing (and for recency windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Period {
    /// Calendar month.
    #[default]
    Month,
    /// ISO 8601 week (Monday to Sunday).
    Week,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Month => write!(f, "month"),
            Period::Week => write!(f, "week"),
        }
    }
}

impl FromStr for Period {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "month" | "months" | "monthly" | "m" => Ok(Period::Month),
            "week" | "weeks" | "weekly" | "w" => Ok(Period::Week),
            other => Err(StatsError::Configuration(format!(
                "unknown period '{}' (expected 'month' or 'week')",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = StatsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Order of the per-period statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SortOrder {
    /// Oldest period first.
    Asc,
    /// Most recent period first.
    #[default]
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            other => Err(StatsError::Configuration(format!(
                "unknown sort order '{}' (expected 'asc' or 'desc')",
                other
            ))),
        }
    }
}

impl TryFrom<String> for SortOrder {
    type Error = StatsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How records without a value take part in a mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum MeanPolicy {
    /// Missing values count as 0 and still count in the divisor.
    #[default]
    TreatAsZero,
    /// Only records carrying a value take part.
    IgnoreMissing,
}

impl fmt::Display for MeanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeanPolicy::TreatAsZero => write!(f, "treat-as-zero"),
            MeanPolicy::IgnoreMissing => write!(f, "ignore-missing"),
        }
    }
}

impl FromStr for MeanPolicy {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "treat-as-zero" | "zero" => Ok(MeanPolicy::TreatAsZero),
            "ignore-missing" | "ignore" => Ok(MeanPolicy::IgnoreMissing),
            other => Err(StatsError::Configuration(format!(
                "unknown mean policy '{}' (expected 'treat-as-zero' or 'ignore-missing')",
                other
            ))),
        }
    }
}

impl TryFrom<String> for MeanPolicy {
    type Error = StatsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Keep only records newer than `count` units before now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecencyWindow {
    pub count: u32,
    pub unit: Period,
}

impl RecencyWindow {
    pub fn new(count: u32, unit: Period) -> StatsResult<Self> {
        if count == 0 {
            return Err(StatsError::Configuration(
                "recency window must span at least one period".to_string(),
            ));
        }
        Ok(Self { count, unit })
    }

    /// The instant records must be strictly newer than.
    pub fn cutoff(&self, now: DateTime<Utc>) -> StatsResult<DateTime<Utc>> {
        let cutoff = match self.unit {
            Period::Month => now.checked_sub_months(Months::new(self.count)),
            Period::Week => Duration::try_weeks(i64::from(self.count))
                .and_then(|span| now.checked_sub_signed(span)),
        };

        cutoff.ok_or_else(|| {
            StatsError::Configuration(format!("recency window '{}' is out of range", self))
        })
    }
}

impl fmt::Display for RecencyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.count == 1 { "" } else { "s" };
        write!(f, "{} {}{}", self.count, self.unit, plural)
    }
}

/// Parses "3m", "3 months", "6w", "1 week", "2weeks".
impl FromStr for RecencyWindow {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        let count: u32 = digits.parse().map_err(|_| {
            StatsError::Configuration(format!(
                "invalid recency window '{}' (expected e.g. '3m' or '6 weeks')",
                s
            ))
        })?;

        if unit.trim().is_empty() {
            return Err(StatsError::Configuration(format!(
                "recency window '{}' is missing a unit (month or week)",
                s
            )));
        }

        Self::new(count, unit.parse()?)
    }
}

impl TryFrom<String> for RecencyWindow {
    type Error = StatsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecencyWindow> for String {
    fn from(window: RecencyWindow) -> Self {
        window.to_string()
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// One calendar period instance, identified by its first day.
///
/// Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    start: NaiveDate,
    period: Period,
}

impl BucketKey {
    /// The bucket containing `date`, or `None` at the edge of the
    /// representable calendar.
    pub fn containing(date: NaiveDate, period: Period) -> Option<Self> {
        let offset = match period {
            Period::Month => date.day0(),
            Period::Week => date.weekday().num_days_from_monday(),
        };
        let start = date.checked_sub_days(Days::new(u64::from(offset)))?;
        Some(Self { start, period })
    }

    /// Human label, e.g. "March 2024" or "Week 11 2024".
    pub fn label(&self) -> String {
        match self.period {
            Period::Month => self.start.format("%B %Y").to_string(),
            Period::Week => {
                let week = self.start.iso_week();
                format!("Week {} {}", week.week(), week.year())
            }
        }
    }

    /// ISO date of the first day; sorts lexically in calendar order.
    pub fn sort_key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

/// Compact key: "MM_YYYY" for months, "WW_YYYY" (ISO week-year) for weeks.
impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Period::Month => write!(f, "{:02}_{:04}", self.start.month(), self.start.year()),
            Period::Week => {
                let week = self.start.iso_week();
                write!(f, "{:02}_{:04}", week.week(), week.year())
            }
        }
    }
}

/// Flattened records grouped by calendar period.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedResult {
    /// Granularity of the buckets.
    pub period: Period,
    /// Window applied before grouping, if any.
    pub window: Option<RecencyWindow>,
    /// Records per bucket, in encounter order. Iterates oldest bucket first.
    pub buckets: BTreeMap<BucketKey, Vec<FlatObservation>>,
    /// Every record that survived filtering, in input order.
    pub all: Vec<FlatObservation>,
}

impl GroupedResult {
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Summary of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStat {
    /// "March 2024" or "Week 11 2024".
    pub label: String,
    /// ISO date of the period's first day.
    pub sort_key: String,
    /// `None` only under `MeanPolicy::IgnoreMissing` when no record has a value.
    pub mean: Option<f64>,
    /// Number of records in the bucket.
    pub count: usize,
}

/// Summary of the whole series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllTimeStat {
    pub best: f64,
    pub eighty_percent: f64,
    pub fifty_percent: f64,
    pub mean: f64,
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Metadata about a statistics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// Where the observations came from (file path or patient/server).
    pub source: String,
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    pub period: Period,
    pub order: SortOrder,
    pub mean_policy: MeanPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<RecencyWindow>,
    /// Observations received from the source.
    pub observations: usize,
    /// Records after flattening components.
    pub records: usize,
    /// Records left after the recency window.
    pub records_in_window: usize,
    /// Records in the window without a value.
    pub missing_values: usize,
}

/// The complete statistics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub metadata: ReportMetadata,
    pub period_stats: Vec<PeriodStat>,
    /// `None` when there is no data for the whole series.
    pub all_time: Option<AllTimeStat>,
}
