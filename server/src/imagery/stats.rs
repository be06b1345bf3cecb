//! NDVI time series through the Sentinel Hub Statistical API
//!
//! A date range is split into buckets (semi-monthly by default, matching the
//! chart labels the dashboard has always shown). Each bucket becomes one
//! Statistical API request whose mean NDVI is computed over valid, cloud-free
//! pixels only. One token is obtained per call and reused for every bucket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::auth::TokenProvider;
use super::evalscript::ndvi_statistics_script;
use super::process::{Bounds, DataFilter, DataSource, TimeRange};
use super::types::{ImageryError, StatInterval};
use crate::config::{SentinelConfig, StatsConfig};
use crate::geo::{AreaOfInterest, DATE_FORMAT, DateRange};

/// Collection identifier used by the Statistical API
const STATS_COLLECTION: &str = "sentinel-2-l2a";

/// Metres per degree of latitude, used to express resolution in EPSG:4326 units
const METRES_PER_DEGREE: f64 = 111_320.0;

/// How a date range is split into chart intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketSize {
    /// Days 1-15 and 16-end of each month
    SemiMonthly,
    /// Consecutive windows of `n` days; the last one may be shorter
    FixedDays(u32),
}

/// Inclusive `(start, end)` day pairs covering `range`, in order
///
/// Fails as soon as more than `max` buckets would be needed.
pub fn buckets(
    range: DateRange,
    size: BucketSize,
    max: usize,
) -> Result<Vec<(NaiveDate, NaiveDate)>, ImageryError> {
    let mut out = Vec::new();
    let mut cursor = range.from;

    while cursor <= range.to {
        if out.len() == max {
            return Err(ImageryError::TooManyIntervals { max });
        }
        let natural_end = match size {
            BucketSize::SemiMonthly => half_month_end(cursor),
            BucketSize::FixedDays(n) => cursor
                .checked_add_days(Days::new(u64::from(n.max(1)) - 1))
                .unwrap_or(range.to),
        };
        let end = natural_end.min(range.to);
        out.push((cursor, end));

        match end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }

    Ok(out)
}

fn half_month_end(day: NaiveDate) -> NaiveDate {
    if day.day() <= 15 {
        return day.with_day(15).unwrap_or(day);
    }
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(day)
}

/// `"YYYY-MM-DD - YYYY-MM-DD"`
pub fn interval_label(start: NaiveDate, end: NaiveDate) -> String {
    format!("{} - {}", start.format(DATE_FORMAT), end.format(DATE_FORMAT))
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsRequest {
    pub input: StatisticsInput,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsInput {
    pub bounds: Bounds,
    pub data: Vec<DataSource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub time_range: TimeRange,
    pub aggregation_interval: AggregationInterval,
    pub last_interval_behavior: String,
    pub evalscript: String,
    pub resx: f64,
    pub resy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationInterval {
    /// ISO-8601 duration, e.g. `P15D`
    pub of: String,
}

impl StatisticsRequest {
    /// One aggregation interval spanning exactly `start..=end`
    pub fn for_bucket(
        area: &AreaOfInterest,
        start: NaiveDate,
        end: NaiveDate,
        resolution_m: f64,
    ) -> Self {
        let days = (end - start).num_days() + 1;
        let until = end.succ_opt().unwrap_or(end);
        let res = resolution_m / METRES_PER_DEGREE;

        Self {
            input: StatisticsInput {
                bounds: Bounds::wgs84(area),
                data: vec![DataSource {
                    kind: STATS_COLLECTION.to_string(),
                    data_filter: DataFilter {
                        time_range: None,
                        mosaicking_order: Some("leastCC".to_string()),
                    },
                }],
            },
            aggregation: Aggregation {
                time_range: TimeRange {
                    from: format!("{}T00:00:00Z", start.format(DATE_FORMAT)),
                    to: format!("{}T00:00:00Z", until.format(DATE_FORMAT)),
                },
                aggregation_interval: AggregationInterval {
                    of: format!("P{}D", days),
                },
                last_interval_behavior: "SHORTEN".to_string(),
                evalscript: ndvi_statistics_script(),
                resx: res,
                resy: res,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatisticsResponse {
    #[serde(default)]
    data: Vec<Value>,
}

/// Mean NDVI of the first interval in a Statistical API response
///
/// A missing path, `null`, `"NaN"` or any non-finite number means the bucket
/// had no valid pixels.
fn parse_mean(entry: &Value) -> Option<f64> {
    let mean = entry.pointer("/outputs/ndvi/bands/B0/stats/mean")?;
    match mean {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Source of NDVI time series
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(
        &self,
        area: &AreaOfInterest,
        range: DateRange,
    ) -> Result<Vec<StatInterval>, ImageryError>;
}

/// Per-bucket mean NDVI from the Statistical API
pub struct StatsAggregator {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    statistics_url: String,
    timeout: Duration,
    bucket: BucketSize,
    resolution_m: f64,
    max_buckets: usize,
}

impl StatsAggregator {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        sentinel: &SentinelConfig,
        stats: &StatsConfig,
    ) -> Self {
        Self {
            client,
            tokens,
            statistics_url: sentinel.statistics_url.clone(),
            timeout: sentinel.request_timeout,
            bucket: stats.bucket,
            resolution_m: stats.resolution_m,
            max_buckets: stats.max_buckets,
        }
    }

    async fn fetch_bucket(
        &self,
        token: &str,
        area: &AreaOfInterest,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<f64>, ImageryError> {
        let body = StatisticsRequest::for_bucket(area, start, end, self.resolution_m);

        let response = self
            .client
            .post(&self.statistics_url)
            .bearer_auth(token)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ImageryError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Statistical API returned {}: {}", status, text);
            return Err(ImageryError::from_status(status.as_u16(), text));
        }

        let parsed: StatisticsResponse = response
            .json()
            .await
            .map_err(|e| ImageryError::InvalidResponse(e.to_string()))?;

        Ok(parsed.data.first().and_then(parse_mean))
    }
}

#[async_trait]
impl StatsSource for StatsAggregator {
    #[instrument(skip(self, area), fields(from = %range.from, to = %range.to))]
    async fn fetch_stats(
        &self,
        area: &AreaOfInterest,
        range: DateRange,
    ) -> Result<Vec<StatInterval>, ImageryError> {
        let start = Instant::now();
        counter!("fieldwatch_stats_requests_total").increment(1);
        let windows = buckets(range, self.bucket, self.max_buckets).inspect_err(|e| {
            warn!("Rejected NDVI series request: {}", e);
        })?;

        let token = self.tokens.fetch_token().await?;
        debug!("Fetching NDVI statistics for {} buckets", windows.len());

        let mut series = Vec::with_capacity(windows.len());
        for (from, to) in windows {
            let mean = self.fetch_bucket(token.secret(), area, from, to).await?;
            if mean.is_none() {
                counter!("fieldwatch_stats_empty_buckets_total").increment(1);
            }
            series.push(StatInterval {
                interval: interval_label(from, to),
                mean,
            });
        }

        histogram!("fieldwatch_stats_request_duration_seconds").record(start.elapsed());
        info!(
            "NDVI series ready: {} intervals, {} with data",
            series.len(),
            series.iter().filter(|s| s.mean.is_some()).count()
        );

        Ok(series)
    }
}
