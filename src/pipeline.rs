/// End-to-end batch run: clean readings → rolling series → bucket metrics
/// → noise events, each written to its own CSV file.
///
/// The stage functions can also be run on their own, reading the previous
/// stage's output from disk, the same way the individual stages of the
/// reference pipeline are runnable in isolation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::analysis::buckets::aggregate_by_bucket;
use crate::analysis::groupings::SiteRow;
use crate::analysis::noise_events::detect_events;
use crate::analysis::rolling::compute_rolling;
use crate::config::PipelineConfig;
use crate::export::{write_events_file, write_metrics_file, write_rolling_file};
use crate::ingest::{read_readings_file, read_rolling_file};
use crate::model::{BucketMetric, NoiseEvent, PipelineError, RollingTable};

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Per-site counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteSummary {
    pub site: String,
    pub rows: usize,
    pub valid_windows: usize,
    pub buckets: usize,
    pub events: usize,
}

/// What a full run produced and where it was written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub rolling_path: PathBuf,
    pub metrics_path: PathBuf,
    pub events_path: PathBuf,
    pub total_rows: usize,
    pub total_buckets: usize,
    pub total_events: usize,
    pub sites: Vec<SiteSummary>,
}

impl RunSummary {
    fn build(
        config: &PipelineConfig,
        rolling: &RollingTable,
        metrics: &[BucketMetric],
        events: &[NoiseEvent],
    ) -> Self {
        let mut sites: BTreeMap<String, SiteSummary> = BTreeMap::new();

        for row in &rolling.rows {
            let summary = site_entry(&mut sites, &row.reading.site);
            summary.rows += 1;
            if row.roll_mean.is_some() {
                summary.valid_windows += 1;
            }
        }
        for metric in metrics {
            site_entry(&mut sites, &metric.site).buckets += 1;
        }
        for event in events {
            site_entry(&mut sites, &event.site).events += 1;
        }

        RunSummary {
            rolling_path: config.rolling_output(),
            metrics_path: config.metrics_output(),
            events_path: config.events_output(),
            total_rows: rolling.rows.len(),
            total_buckets: metrics.len(),
            total_events: events.len(),
            sites: sites.into_values().collect(),
        }
    }
}

fn site_entry<'a>(sites: &'a mut BTreeMap<String, SiteSummary>, site: &str) -> &'a mut SiteSummary {
    sites.entry(site.to_string()).or_insert_with(|| SiteSummary {
        site: site.to_string(),
        ..SiteSummary::default()
    })
}

// ---------------------------------------------------------------------------
// Input checks
// ---------------------------------------------------------------------------

/// Fails when a site the run requires has no rows in the input. Applies to
/// clean readings and rolling rows alike, so every stage can check it.
pub fn check_required_sites<T: SiteRow>(
    rows: &[T],
    required: &[String],
) -> Result<(), PipelineError> {
    let present: BTreeSet<&str> = rows.iter().map(|r| r.site().trim()).collect();
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|site| !present.contains(site))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    Err(PipelineError::EmptyInput(format!(
        "no rows for required site(s): {}",
        missing.join(", ")
    )))
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Reads the clean readings at `input`, computes rolling statistics and
/// writes the rolling series.
pub fn run_rolling(config: &PipelineConfig, input: &Path) -> Result<RollingTable, PipelineError> {
    let table = read_readings_file(input)?;
    info!("read {} readings from {}", table.rows.len(), input.display());
    check_required_sites(&table.rows, &config.run.required_sites)?;

    let rolling = compute_rolling(
        table,
        config.rolling.window_min,
        config.rolling.effective_min_samples(),
        config.run.workers,
    )?;

    let output = config.rolling_output();
    write_rolling_file(&output, &rolling)?;
    info!("wrote {} rolling rows to {}", rolling.rows.len(), output.display());
    Ok(rolling)
}

/// Reads a rolling series from `input` and writes the bucket metrics.
pub fn run_metrics(
    config: &PipelineConfig,
    input: &Path,
) -> Result<Vec<BucketMetric>, PipelineError> {
    let rolling = read_rolling_file(input, config.rolling.window_min)?;
    check_required_sites(&rolling.rows, &config.run.required_sites)?;
    let metrics = aggregate_by_bucket(rolling.rows, config.buckets.width, config.run.workers)?;

    let output = config.metrics_output();
    write_metrics_file(&output, &metrics)?;
    info!("wrote {} bucket rows to {}", metrics.len(), output.display());
    Ok(metrics)
}

/// Reads a rolling series from `input` and writes the detected events.
pub fn run_events(config: &PipelineConfig, input: &Path) -> Result<Vec<NoiseEvent>, PipelineError> {
    let rolling = read_rolling_file(input, config.rolling.window_min)?;
    check_required_sites(&rolling.rows, &config.run.required_sites)?;
    let events = detect_events(rolling.rows, config.event_config(), config.run.workers)?;

    let output = config.events_output();
    write_events_file(&output, &events)?;
    info!("wrote {} events to {}", events.len(), output.display());
    Ok(events)
}

/// Runs every stage in memory, writing the three output files.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    config.validate()?;

    let rolling = run_rolling(config, &config.run.input)?;

    let metrics = aggregate_by_bucket(
        rolling.rows.clone(),
        config.buckets.width,
        config.run.workers,
    )?;
    write_metrics_file(&config.metrics_output(), &metrics)?;
    info!(
        "wrote {} bucket rows to {}",
        metrics.len(),
        config.metrics_output().display()
    );

    let events = detect_events(rolling.rows.clone(), config.event_config(), config.run.workers)?;
    write_events_file(&config.events_output(), &events)?;
    info!("wrote {} events to {}", events.len(), config.events_output().display());

    let summary = RunSummary::build(config, &rolling, &metrics, &events);
    for site in &summary.sites {
        if site.valid_windows == 0 {
            warn!(
                "site {}: no window reached {} valid samples, no events possible",
                site.site,
                config.rolling.effective_min_samples()
            );
        }
    }
    Ok(summary)
}
