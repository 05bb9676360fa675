//! Aggregates over stored metrics rows for the metrics endpoint.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::cost::round_to;
use super::TelemetryError;
use super::record::MetricsRow;
use super::store::TelemetryStore;

/// How far back to look.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    LastHour,
    #[default]
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    /// Parse `1h|24h|7d|30d|all`; anything else is the last 24 hours.
    pub fn parse(value: &str) -> Self {
        match value {
            "1h" => Self::LastHour,
            "7d" => Self::LastWeek,
            "30d" => Self::LastMonth,
            "all" => Self::All,
            _ => Self::LastDay,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastHour => "1h",
            Self::LastDay => "24h",
            Self::LastWeek => "7d",
            Self::LastMonth => "30d",
            Self::All => "all",
        }
    }

    /// Earliest timestamp included, or `None` for everything.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let span = match self {
            Self::LastHour => Duration::hours(1),
            Self::LastDay => Duration::hours(24),
            Self::LastWeek => Duration::days(7),
            Self::LastMonth => Duration::days(30),
            Self::All => return None,
        };
        Some(now - span)
    }
}

/// Time series bucket width.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Hour,
    Day,
    /// Weeks start on Sunday.
    Week,
}

impl GroupBy {
    /// Parse `hour|day|week`; anything else groups by hour.
    pub fn parse(value: &str) -> Self {
        match value {
            "day" => Self::Day,
            "week" => Self::Week,
            _ => Self::Hour,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }

    /// Start of the bucket containing `t`, in UTC.
    pub fn bucket_start(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let start = match self {
            Self::Hour => date.and_time(
                NaiveTime::from_hms_opt(t.hour(), 0, 0).unwrap_or(NaiveTime::MIN),
            ),
            Self::Day => date.and_time(NaiveTime::MIN),
            Self::Week => {
                let back = i64::from(t.weekday().num_days_from_sunday());
                (date - Duration::days(back)).and_time(NaiveTime::MIN)
            }
        };
        Utc.from_utc_datetime(&start)
    }

    /// Bucket key, e.g. `2024-05-01T10:00:00Z`.
    pub fn bucket_key(self, t: DateTime<Utc>) -> String {
        self.bucket_start(t).format("%Y-%m-%dT%H:00:00Z").to_string()
    }
}

/// Mean stage durations in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AvgPerformance {
    pub stt: f64,
    pub rag: f64,
    pub llm: f64,
    pub tts: f64,
    pub total: f64,
}

/// A percentile of total duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentilePerformance {
    pub total: u64,
}

/// Mean quality counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AvgQuality {
    pub response_length: f64,
    pub response_sentences: f64,
    pub citations_removed: f64,
    pub fillers_added: f64,
    pub documents_used: f64,
}

/// One point of the time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub timestamp: String,
    pub count: usize,
    pub avg_duration: f64,
    pub error_count: usize,
}

/// Aggregated statistics over a set of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsStats {
    pub total: usize,
    pub avg_performance: AvgPerformance,
    pub p50_performance: PercentilePerformance,
    pub p95_performance: PercentilePerformance,
    pub avg_quality: AvgQuality,
    /// Dollars, 4 decimals.
    pub total_cost: f64,
    /// Dollars, 6 decimals.
    pub avg_cost_per_session: f64,
    /// Fraction of rows with an error, 4 decimals.
    pub error_rate: f64,
    pub by_time: Vec<TimeBucket>,
}

/// Mean rounded to 2 decimals, 0 for no values.
fn avg(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        return 0.0;
    }
    round_to(sum / n as f64, 2)
}

/// Value at index `ceil(n * p) - 1` of an ascending slice, 0 when empty.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
    sorted[index.min(sorted.len() - 1)]
}

/// Group rows into time buckets, oldest first.
pub fn group_by_time(rows: &[MetricsRow], group_by: GroupBy) -> Vec<TimeBucket> {
    let mut groups: BTreeMap<String, Vec<&MetricsRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(group_by.bucket_key(row.timestamp))
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .map(|(timestamp, members)| TimeBucket {
            timestamp,
            count: members.len(),
            avg_duration: avg(members.iter().map(|r| r.total_duration as f64)),
            error_count: members.iter().filter(|r| r.has_error).count(),
        })
        .collect()
}

/// Compute statistics for `rows`. Empty input yields all-zero stats.
pub fn calculate_stats(rows: &[MetricsRow], group_by: GroupBy) -> MetricsStats {
    if rows.is_empty() {
        return MetricsStats::default();
    }
    let n = rows.len() as f64;

    let mut totals: Vec<u64> = rows.iter().map(|r| r.total_duration).collect();
    totals.sort_unstable();

    let total_cost: f64 = rows.iter().map(|r| r.cost_total).sum();
    let errors = rows.iter().filter(|r| r.has_error).count();

    MetricsStats {
        total: rows.len(),
        avg_performance: AvgPerformance {
            stt: avg(rows.iter().map(|r| r.stt_duration as f64)),
            rag: avg(rows.iter().map(|r| r.rag_search_duration as f64)),
            llm: avg(rows.iter().map(|r| r.llm_duration as f64)),
            tts: avg(rows.iter().map(|r| r.tts_duration as f64)),
            total: avg(rows.iter().map(|r| r.total_duration as f64)),
        },
        p50_performance: PercentilePerformance {
            total: percentile(&totals, 0.5),
        },
        p95_performance: PercentilePerformance {
            total: percentile(&totals, 0.95),
        },
        avg_quality: AvgQuality {
            response_length: avg(rows.iter().map(|r| r.response_length as f64)),
            response_sentences: avg(rows.iter().map(|r| r.response_sentences as f64)),
            citations_removed: avg(rows.iter().map(|r| r.citations_removed as f64)),
            fillers_added: avg(rows.iter().map(|r| r.fillers_added as f64)),
            documents_used: avg(rows.iter().map(|r| r.documents_used as f64)),
        },
        total_cost: round_to(total_cost, 4),
        avg_cost_per_session: round_to(total_cost / n, 6),
        error_rate: round_to(errors as f64 / n, 4),
        by_time: group_by_time(rows, group_by),
    }
}

/// Rows and statistics returned by the metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub data: Vec<MetricsRow>,
    pub stats: MetricsStats,
    pub time_range: TimeRange,
    pub group_by: GroupBy,
    pub count: usize,
}

/// Load recent rows from `store` and aggregate them.
pub async fn load_report(
    store: &dyn TelemetryStore,
    range: TimeRange,
    group_by: GroupBy,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<MetricsReport, TelemetryError> {
    let data = store.recent(range.since(now), limit).await?;
    let stats = calculate_stats(&data, group_by);
    Ok(MetricsReport {
        count: data.len(),
        data,
        stats,
        time_range: range,
        group_by,
    })
}
