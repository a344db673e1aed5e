/// Fixed-width calendar bucket aggregation (hourly by default).
///
/// Buckets are left-closed `[start, start + width)` and anchored at midnight
/// of the first day in each site's series, so hourly buckets start at the
/// top of the hour and 15-minute buckets at :00/:15/:30/:45. Every bucket
/// between a site's first and last reading is emitted, including empty
/// ones, to keep the grid dense for the plotting stage.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::analysis::groupings::{
    check_strictly_increasing, map_sites, merge_sites, partition_by_site, sort_site_rows,
};
use crate::model::{BucketMetric, PipelineError, RollingRow};

/// Percentile reported as `LAeq_p95`.
pub const P95: f64 = 0.95;

// ---------------------------------------------------------------------------
// Bucket width
// ---------------------------------------------------------------------------

/// Width of an aggregation bucket, written as a duration token such as
/// `"1h"`, `"15min"` or `"1d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct BucketWidth {
    seconds: i64,
}

impl BucketWidth {
    pub fn from_seconds(seconds: i64) -> Result<Self, PipelineError> {
        if seconds <= 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "bucket width must be positive, got {} s",
                seconds
            )));
        }
        Ok(BucketWidth { seconds })
    }

    /// Parses `<n>s`, `<n>min`, `<n>m`, `<n>h` or `<n>d`.
    pub fn parse(token: &str) -> Result<Self, PipelineError> {
        let trimmed = token.trim().to_ascii_lowercase();
        let invalid = || {
            PipelineError::InvalidParameter(format!(
                "bucket width '{}' is not a duration like \"1h\", \"15min\" or \"1d\"",
                token
            ))
        };

        let (number, unit_seconds) = if let Some(n) = trimmed.strip_suffix("min") {
            (n, 60)
        } else if let Some(n) = trimmed.strip_suffix('m') {
            (n, 60)
        } else if let Some(n) = trimmed.strip_suffix('h') {
            (n, 3_600)
        } else if let Some(n) = trimmed.strip_suffix('d') {
            (n, 86_400)
        } else if let Some(n) = trimmed.strip_suffix('s') {
            (n, 1)
        } else {
            return Err(invalid());
        };

        let count: i64 = number.trim().parse().map_err(|_| invalid())?;
        Self::from_seconds(count.checked_mul(unit_seconds).ok_or_else(invalid)?)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Short label used in output file names, e.g. `noise_metrics_1h.csv`.
    pub fn label(&self) -> String {
        let s = self.seconds;
        if s % 86_400 == 0 {
            format!("{}d", s / 86_400)
        } else if s % 3_600 == 0 {
            format!("{}h", s / 3_600)
        } else if s % 60 == 0 {
            format!("{}min", s / 60)
        } else {
            format!("{}s", s)
        }
    }
}

impl Default for BucketWidth {
    fn default() -> Self {
        BucketWidth { seconds: 3_600 }
    }
}

impl TryFrom<String> for BucketWidth {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BucketWidth::parse(&value)
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Quantile of already-sorted values, interpolating linearly between the
/// two nearest order statistics. `None` for an empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Samples collected for one bucket.
#[derive(Debug, Default)]
struct BucketSamples {
    levels: Vec<f64>,
    peak: Option<f64>,
}

impl BucketSamples {
    fn add(&mut self, row: &RollingRow) {
        if let Some(level) = row.reading.level.filter(|v| !v.is_nan()) {
            self.levels.push(level);
        }
        if let Some(level_max) = row.reading.level_max.filter(|v| !v.is_nan()) {
            self.peak = Some(self.peak.map_or(level_max, |p| p.max(level_max)));
        }
    }

    fn into_metric(mut self, site: &str, bucket_start: NaiveDateTime) -> BucketMetric {
        let sample_count = self.levels.len();
        let mean_level = if sample_count > 0 {
            Some(self.levels.iter().sum::<f64>() / sample_count as f64)
        } else {
            None
        };
        self.levels.sort_by(f64::total_cmp);

        BucketMetric {
            site: site.to_string(),
            bucket_start,
            mean_level,
            p95_level: quantile_sorted(&self.levels, P95),
            max_peak_level: self.peak,
            sample_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Aggregates one site's rows into a dense run of buckets.
pub fn buckets_for_site(site: &str, rows: &[RollingRow], width: BucketWidth) -> Vec<BucketMetric> {
    let Some(first) = rows.iter().map(|r| r.reading.timestamp).min() else {
        return Vec::new();
    };
    let origin = first.date().and_time(NaiveTime::MIN);
    let width_secs = width.seconds();
    let index_of = |t: NaiveDateTime| (t - origin).num_seconds().div_euclid(width_secs);

    let mut samples: BTreeMap<i64, BucketSamples> = BTreeMap::new();
    for row in rows {
        samples.entry(index_of(row.reading.timestamp)).or_default().add(row);
    }

    let first_index = index_of(first);
    let last_index = samples.keys().next_back().copied().unwrap_or(first_index);

    (first_index..=last_index)
        .map(|index| {
            let bucket_start = origin + Duration::seconds(index * width_secs);
            samples
                .remove(&index)
                .unwrap_or_default()
                .into_metric(site, bucket_start)
        })
        .collect()
}

/// Builds the bucket metric table for every site, ordered by
/// (site, bucket_start).
///
/// `mean_level` and `p95_level` use the present `level` values,
/// `max_peak_level` the present `level_max` values and `sample_count` counts
/// present levels. Buckets without any present level keep `sample_count = 0`
/// and no mean or percentile.
///
/// # Errors
/// - `PipelineError::EmptyInput` — no rows at all.
/// - `PipelineError::Schema` — a row without a site identifier.
/// - `PipelineError::Ordering` — duplicate timestamps within a site.
pub fn aggregate_by_bucket(
    rows: Vec<RollingRow>,
    width: BucketWidth,
    workers: usize,
) -> Result<Vec<BucketMetric>, PipelineError> {
    if rows.is_empty() {
        return Err(PipelineError::EmptyInput(
            "no rows to aggregate into buckets".to_string(),
        ));
    }

    let partitions = partition_by_site(rows)?;
    let per_site = map_sites(partitions, workers, move |site, mut rows| {
        if sort_site_rows(&mut rows) {
            warn!("site {}: rolling rows were not in timestamp order, re-sorted", site);
        }
        check_strictly_increasing(site, &rows)?;

        let buckets = buckets_for_site(site, &rows, width);
        debug!(
            "site {}: {} rows into {} bucket(s) of {}",
            site,
            rows.len(),
            buckets.len(),
            width
        );
        Ok(buckets)
    })?;

    let metrics = merge_sites(per_site);
    info!("aggregated {} bucket(s) of {}", metrics.len(), width);
    Ok(metrics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
