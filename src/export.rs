/// CSV writers for the three pipeline outputs.
///
/// Column names and layouts are the contract with the plotting stage:
///
/// | file                     | columns                                                          |
/// |--------------------------|------------------------------------------------------------------|
/// | rolling series           | input columns…, `LAeq_roll_mean_<W>min`, `LAeq_roll_std_<W>min`  |
/// | bucket metrics           | `timestamp`, `site`, `LAeq_mean`, `LAeq_p95`, `LAmax_max`, `n_samples` |
/// | detected events          | `site`, `start_time`, `end_time`, `duration_min`, `LAeq_peak`, `LAeq_mean` |
///
/// Missing values are written as empty cells. Timestamps are ISO-8601
/// without offset.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::Writer;

use crate::model::{
    roll_mean_column, roll_std_column, BucketMetric, NoiseEvent, PipelineError, RollingTable,
    COL_BUCKET_COUNT, COL_BUCKET_MAX, COL_BUCKET_MEAN, COL_BUCKET_P95, COL_EVENT_DURATION,
    COL_EVENT_END, COL_EVENT_MEAN, COL_EVENT_PEAK, COL_EVENT_START, COL_LEVEL, COL_LEVEL_MAX,
    COL_SITE, COL_TIMESTAMP,
};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Opens `path` for writing, creating parent directories as needed.
fn create_file(path: &Path) -> Result<File, PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(File::create(path)?)
}

// ---------------------------------------------------------------------------
// Rolling series
// ---------------------------------------------------------------------------

/// Where a rolling-series cell comes from.
enum Cell {
    Timestamp,
    Site,
    Level,
    LevelMax,
    Extra(usize),
}

/// Maps the table's column order onto row fields.
fn rolling_cells(table: &RollingTable) -> Result<Vec<Cell>, PipelineError> {
    table
        .columns
        .iter()
        .map(|name| match name.as_str() {
            COL_TIMESTAMP => Ok(Cell::Timestamp),
            COL_SITE => Ok(Cell::Site),
            COL_LEVEL => Ok(Cell::Level),
            COL_LEVEL_MAX => Ok(Cell::LevelMax),
            other => table
                .extra_columns
                .iter()
                .position(|c| c == other)
                .map(Cell::Extra)
                .ok_or_else(|| {
                    PipelineError::Schema(format!("column '{}' has no values to write", other))
                }),
        })
        .collect()
}

/// Writes the rolling series: the input columns in the order they were
/// read, then the two roll columns.
pub fn write_rolling<W: Write>(output: W, table: &RollingTable) -> Result<(), PipelineError> {
    let cells = rolling_cells(table)?;
    let mut writer = Writer::from_writer(output);

    let mut header = table.columns.clone();
    header.push(roll_mean_column(table.window_min));
    header.push(roll_std_column(table.window_min));
    writer.write_record(&header)?;

    for row in &table.rows {
        let reading = &row.reading;
        let mut record: Vec<String> = cells
            .iter()
            .map(|cell| match cell {
                Cell::Timestamp => format_timestamp(reading.timestamp),
                Cell::Site => reading.site.clone(),
                Cell::Level => format_value(reading.level),
                Cell::LevelMax => format_value(reading.level_max),
                Cell::Extra(i) => reading.extra.get(*i).cloned().unwrap_or_default(),
            })
            .collect();
        record.push(format_value(row.roll_mean));
        record.push(format_value(row.roll_std));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_rolling_file(path: &Path, table: &RollingTable) -> Result<(), PipelineError> {
    write_rolling(create_file(path)?, table)
}

// ---------------------------------------------------------------------------
// Bucket metrics
// ---------------------------------------------------------------------------

pub fn write_metrics<W: Write>(output: W, metrics: &[BucketMetric]) -> Result<(), PipelineError> {
    let mut writer = Writer::from_writer(output);
    writer.write_record([
        COL_TIMESTAMP,
        COL_SITE,
        COL_BUCKET_MEAN,
        COL_BUCKET_P95,
        COL_BUCKET_MAX,
        COL_BUCKET_COUNT,
    ])?;

    for m in metrics {
        writer.write_record([
            format_timestamp(m.bucket_start),
            m.site.clone(),
            format_value(m.mean_level),
            format_value(m.p95_level),
            format_value(m.max_peak_level),
            m.sample_count.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_metrics_file(path: &Path, metrics: &[BucketMetric]) -> Result<(), PipelineError> {
    write_metrics(create_file(path)?, metrics)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub fn write_events<W: Write>(output: W, events: &[NoiseEvent]) -> Result<(), PipelineError> {
    let mut writer = Writer::from_writer(output);
    writer.write_record([
        COL_SITE,
        COL_EVENT_START,
        COL_EVENT_END,
        COL_EVENT_DURATION,
        COL_EVENT_PEAK,
        COL_EVENT_MEAN,
    ])?;

    for e in events {
        writer.write_record([
            e.site.clone(),
            format_timestamp(e.start_time),
            format_timestamp(e.end_time),
            e.duration_minutes.to_string(),
            e.peak_level.to_string(),
            e.mean_level.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_events_file(path: &Path, events: &[NoiseEvent]) -> Result<(), PipelineError> {
    write_events(create_file(path)?, events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
