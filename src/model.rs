/// Shared data types for the noise monitoring pipeline.
///
/// Every entity here is a value produced by one stage and consumed read-only
/// by the next:
///
/// ```text
/// Reading ──compute_rolling──▶ RollingRow ──aggregate_by_bucket──▶ BucketMetric
///                                   │
///                                   └──detect_events──▶ NoiseEvent
/// ```

use chrono::NaiveDateTime;
use std::fmt;

// ---------------------------------------------------------------------------
// Column names (the compatibility contract with the cleaning and plotting stages)
// ---------------------------------------------------------------------------

pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_SITE: &str = "site";
pub const COL_LEVEL: &str = "LAeq_dB";
pub const COL_LEVEL_MAX: &str = "LAmax_dB";

pub const COL_BUCKET_MEAN: &str = "LAeq_mean";
pub const COL_BUCKET_P95: &str = "LAeq_p95";
pub const COL_BUCKET_MAX: &str = "LAmax_max";
pub const COL_BUCKET_COUNT: &str = "n_samples";

pub const COL_EVENT_START: &str = "start_time";
pub const COL_EVENT_END: &str = "end_time";
pub const COL_EVENT_DURATION: &str = "duration_min";
pub const COL_EVENT_PEAK: &str = "LAeq_peak";
pub const COL_EVENT_MEAN: &str = "LAeq_mean";

/// Rolling mean column for a window of `window_min` samples,
/// e.g. `LAeq_roll_mean_15min`.
pub fn roll_mean_column(window_min: usize) -> String {
    format!("LAeq_roll_mean_{}min", window_min)
}

/// Rolling standard deviation column, e.g. `LAeq_roll_std_15min`.
pub fn roll_std_column(window_min: usize) -> String {
    format!("LAeq_roll_std_{}min", window_min)
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One per-minute measurement at a monitoring site.
///
/// `extra` carries the values of any pass-through columns (quality flags and
/// the like) in the order the table header lists them.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub site: String,
    pub timestamp: NaiveDateTime,
    pub level: Option<f64>,
    pub level_max: Option<f64>,
    pub extra: Vec<String>,
}

impl Reading {
    pub fn new(
        site: &str,
        timestamp: NaiveDateTime,
        level: Option<f64>,
        level_max: Option<f64>,
    ) -> Self {
        Reading {
            site: site.to_string(),
            timestamp,
            level,
            level_max,
            extra: Vec::new(),
        }
    }
}

/// A reading augmented with trailing-window statistics of `level`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingRow {
    pub reading: Reading,
    pub roll_mean: Option<f64>,
    pub roll_std: Option<f64>,
}

/// Aggregate statistics for one site over one calendar bucket.
///
/// Empty buckets are kept with `sample_count == 0` and no statistics so that
/// consumers always see a dense grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketMetric {
    pub site: String,
    pub bucket_start: NaiveDateTime,
    pub mean_level: Option<f64>,
    pub p95_level: Option<f64>,
    pub max_peak_level: Option<f64>,
    pub sample_count: usize,
}

/// A contiguous span of over-threshold samples that survived the
/// minimum-duration filter.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseEvent {
    pub site: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    /// Inclusive of both endpoint samples.
    pub duration_minutes: i64,
    pub peak_level: f64,
    pub mean_level: f64,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Order in which the measurement columns are written when a table was
/// built in code rather than read from a file: the four measurement
/// columns, then the pass-through columns.
pub fn canonical_columns(extra_columns: &[String]) -> Vec<String> {
    [COL_TIMESTAMP, COL_SITE, COL_LEVEL, COL_LEVEL_MAX]
        .iter()
        .map(|c| c.to_string())
        .chain(extra_columns.iter().cloned())
        .collect()
}

/// Readings plus the names of the pass-through columns their `extra`
/// values belong to.
///
/// `columns` is the full input column order (measurement and pass-through
/// columns interleaved as the source header had them), so the rolling
/// series can be written back in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingTable {
    pub columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub rows: Vec<Reading>,
}

impl ReadingTable {
    pub fn new(extra_columns: Vec<String>, rows: Vec<Reading>) -> Self {
        ReadingTable {
            columns: canonical_columns(&extra_columns),
            extra_columns,
            rows,
        }
    }
}

/// Output of the window-statistics stage, same column layout as the
/// `ReadingTable` it was computed from. The roll columns are not part of
/// `columns`; they always come last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollingTable {
    pub columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub window_min: usize,
    pub rows: Vec<RollingRow>,
}

impl RollingTable {
    pub fn new(extra_columns: Vec<String>, window_min: usize, rows: Vec<RollingRow>) -> Self {
        RollingTable {
            columns: canonical_columns(&extra_columns),
            extra_columns,
            window_min,
            rows,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every failure the pipeline can report. All of them end the run: the
/// computation is deterministic, so the caller fixes the input and re-runs.
#[derive(Debug)]
pub enum PipelineError {
    /// Missing or mis-typed required column, or an unusable site identifier.
    Schema(String),
    /// Timestamps not strictly increasing within a site.
    Ordering {
        site: String,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
    /// No rows at all, or no rows for a site the run requires.
    EmptyInput(String),
    /// Window, threshold or bucket parameter outside its valid range.
    InvalidParameter(String),
    /// Configuration file could not be read or parsed.
    Config(String),
    /// A per-site worker thread died before reporting a result.
    Worker(String),
    Io(std::io::Error),
    Csv(csv::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Schema(msg) => write!(f, "Schema error: {}", msg),
            PipelineError::Ordering { site, previous, current } => {
                write!(
                    f,
                    "Ordering error at site '{}': timestamp {} does not follow {}.\n\n",
                    site, current, previous
                )?;
                write!(f, "  Timestamps must be strictly increasing within a site.\n")?;
                write!(f, "  Re-run the cleaning stage to sort and de-duplicate the series.")
            }
            PipelineError::EmptyInput(msg) => write!(f, "Empty input: {}", msg),
            PipelineError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::Worker(msg) => write!(f, "Worker failure: {}", msg),
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
            PipelineError::Csv(e) => write!(f, "CSV error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(e) => Some(e),
            PipelineError::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e)
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Csv(e)
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(e: toml::de::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}
