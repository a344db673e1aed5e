/// CSV readers for the clean per-minute series and the rolling-augmented
/// series.
///
/// Required columns are located by header name, so column order is free.
/// Every other column is carried through untouched as a pass-through value
/// (quality flags written by the cleaning stage, mostly). Numeric cells that
/// are blank or spell NaN/NA are missing values; anything else that does not
/// parse as a number is a schema error naming the line and column.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::model::{
    roll_mean_column, roll_std_column, PipelineError, Reading, ReadingTable, RollingRow,
    RollingTable, COL_LEVEL, COL_LEVEL_MAX, COL_SITE, COL_TIMESTAMP,
};

/// Accepted naive timestamp layouts, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parses an ISO-8601 timestamp. Naive forms are taken as-is; RFC 3339
/// values with an offset are converted to UTC.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// Parses a numeric cell; blank/NaN/NA mean "missing".
fn parse_optional_f64(value: &str) -> Option<Result<f64, ()>> {
    let value = value.trim();
    if value.is_empty()
        || value.eq_ignore_ascii_case("nan")
        || value.eq_ignore_ascii_case("na")
        || value.eq_ignore_ascii_case("<na>")
    {
        return None;
    }
    Some(value.parse::<f64>().map_err(|_| ()))
}

// ---------------------------------------------------------------------------
// Header layout
// ---------------------------------------------------------------------------

/// Column positions resolved from a header row.
struct Layout {
    timestamp: usize,
    site: usize,
    level: usize,
    level_max: usize,
    roll: Option<(usize, usize)>,
    extra: Vec<usize>,
    extra_names: Vec<String>,
    /// Header order without the roll columns.
    columns: Vec<String>,
}

impl Layout {
    fn resolve(
        headers: &StringRecord,
        roll_columns: Option<(&str, &str)>,
    ) -> Result<Self, PipelineError> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let mut required = vec![COL_TIMESTAMP, COL_SITE, COL_LEVEL, COL_LEVEL_MAX];
        if let Some((mean, std)) = roll_columns {
            required.push(mean);
            required.push(std);
        }
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|&c| find(c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema(format!(
                "missing required column(s): {} (found: {})",
                missing.join(", "),
                headers.iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let index = |name: &str| find(name).unwrap_or_default();
        let roll = roll_columns.map(|(mean, std)| (index(mean), index(std)));
        let extra: Vec<usize> = (0..headers.len())
            .filter(|i| !required.iter().any(|c| headers.get(*i) == Some(*c)))
            .collect();
        let extra_names = extra
            .iter()
            .filter_map(|i| headers.get(*i))
            .map(str::to_string)
            .collect();
        let is_roll = |h: &str| roll_columns.is_some_and(|(mean, std)| h == mean || h == std);
        let columns = headers
            .iter()
            .filter(|&h| !is_roll(h))
            .map(str::to_string)
            .collect();

        Ok(Layout {
            timestamp: index(COL_TIMESTAMP),
            site: index(COL_SITE),
            level: index(COL_LEVEL),
            level_max: index(COL_LEVEL_MAX),
            roll,
            extra,
            extra_names,
            columns,
        })
    }
}

/// One data record plus its line number, for error messages.
struct Row<'r> {
    record: &'r StringRecord,
    line: u64,
}

impl<'r> Row<'r> {
    fn cell(&self, index: usize) -> &'r str {
        self.record.get(index).unwrap_or("")
    }

    fn number(&self, index: usize, column: &str) -> Result<Option<f64>, PipelineError> {
        let raw = self.cell(index);
        match parse_optional_f64(raw) {
            None => Ok(None),
            Some(Ok(v)) => Ok(Some(v)),
            Some(Err(())) => Err(PipelineError::Schema(format!(
                "line {}: column '{}' value '{}' is not a number",
                self.line, column, raw
            ))),
        }
    }

    fn reading(&self, layout: &Layout) -> Result<Reading, PipelineError> {
        let raw_ts = self.cell(layout.timestamp);
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
            PipelineError::Schema(format!(
                "line {}: column '{}' value '{}' is not an ISO-8601 timestamp",
                self.line, COL_TIMESTAMP, raw_ts
            ))
        })?;

        let site = self.cell(layout.site).trim();
        if site.is_empty() {
            return Err(PipelineError::Schema(format!(
                "line {}: column '{}' is empty",
                self.line, COL_SITE
            )));
        }

        Ok(Reading {
            site: site.to_string(),
            timestamp,
            level: self.number(layout.level, COL_LEVEL)?,
            level_max: self.number(layout.level_max, COL_LEVEL_MAX)?,
            extra: layout.extra.iter().map(|i| self.cell(*i).to_string()).collect(),
        })
    }
}

fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new().trim(Trim::Headers).from_reader(input)
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Reads the clean readings table (`timestamp`, `site`, `LAeq_dB`,
/// `LAmax_dB`, plus pass-through columns).
///
/// # Errors
/// - `PipelineError::Schema` — a required column is absent, or a cell is
///   mis-typed.
/// - `PipelineError::EmptyInput` — the table has a header but no rows.
/// - `PipelineError::Csv` — the file is not well-formed CSV.
pub fn read_readings<R: Read>(input: R) -> Result<ReadingTable, PipelineError> {
    let mut reader = csv_reader(input);
    let layout = Layout::resolve(reader.headers()?, None)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        rows.push(Row { record: &record, line }.reading(&layout)?);
    }

    if rows.is_empty() {
        return Err(PipelineError::EmptyInput("readings table has no rows".to_string()));
    }

    Ok(ReadingTable {
        columns: layout.columns,
        extra_columns: layout.extra_names,
        rows,
    })
}

/// Reads a rolling-augmented series written for a `window_min`-sample
/// window, i.e. with `LAeq_roll_mean_<W>min` and `LAeq_roll_std_<W>min`
/// columns.
///
/// # Errors
/// Same as [`read_readings`]; the two roll columns are required.
pub fn read_rolling<R: Read>(input: R, window_min: usize) -> Result<RollingTable, PipelineError> {
    let mean_column = roll_mean_column(window_min);
    let std_column = roll_std_column(window_min);

    let mut reader = csv_reader(input);
    let layout = Layout::resolve(reader.headers()?, Some((&mean_column, &std_column)))?;
    let (mean_index, std_index) = layout.roll.unwrap_or_default();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let row = Row { record: &record, line };
        rows.push(RollingRow {
            reading: row.reading(&layout)?,
            roll_mean: row.number(mean_index, &mean_column)?,
            roll_std: row.number(std_index, &std_column)?,
        });
    }

    if rows.is_empty() {
        return Err(PipelineError::EmptyInput("rolling table has no rows".to_string()));
    }

    Ok(RollingTable {
        columns: layout.columns,
        extra_columns: layout.extra_names,
        window_min,
        rows,
    })
}

pub fn read_readings_file(path: &Path) -> Result<ReadingTable, PipelineError> {
    read_readings(File::open(path)?)
}

pub fn read_rolling_file(path: &Path, window_min: usize) -> Result<RollingTable, PipelineError> {
    read_rolling(File::open(path)?, window_min)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
