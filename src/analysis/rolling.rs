/// Trailing-window statistics over the per-minute `LAeq` channel.
///
/// The window is count-based: `window_width` consecutive rows of a site's
/// regular grid ending at (and including) the current row. Missing levels
/// stay in the window but do not contribute; an estimate is only produced
/// when at least `min_samples` levels are present, which keeps sparse
/// stretches of the series from producing meaningless baselines.

use log::{debug, info, warn};

use crate::analysis::groupings::{
    check_strictly_increasing, map_sites, merge_sites, partition_by_site, sort_site_rows,
};
use crate::model::{PipelineError, Reading, ReadingTable, RollingRow, RollingTable};

/// `max(3, window_width / 3)`, the validity threshold used when none is
/// configured.
pub fn default_min_samples(window_width: usize) -> usize {
    (window_width / 3).max(3)
}

/// Checks that a window configuration can produce estimates at all.
pub fn validate_window(window_width: usize, min_samples: usize) -> Result<(), PipelineError> {
    if window_width == 0 {
        return Err(PipelineError::InvalidParameter(
            "rolling window width must be at least 1 sample".to_string(),
        ));
    }
    if min_samples == 0 || min_samples > window_width {
        return Err(PipelineError::InvalidParameter(format!(
            "min_samples must be between 1 and the window width ({}), got {}",
            window_width, min_samples
        )));
    }
    Ok(())
}

/// Mean and sample standard deviation of the present values in `window`.
/// NaN counts as missing.
///
/// Returns `(None, None)` when fewer than `min_samples` values are present.
/// The standard deviation also needs at least two values.
pub fn window_stats(window: &[Option<f64>], min_samples: usize) -> (Option<f64>, Option<f64>) {
    let values: Vec<f64> = window
        .iter()
        .flatten()
        .copied()
        .filter(|v| !v.is_nan())
        .collect();
    let n = values.len();
    if n == 0 || n < min_samples {
        return (None, None);
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n >= 2 {
        let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        Some((sum_sq / (n - 1) as f64).sqrt())
    } else {
        None
    };

    (Some(mean), std)
}

/// Computes rolling statistics for one site's rows, which must already be
/// in timestamp order.
pub fn rolling_for_site(
    rows: Vec<Reading>,
    window_width: usize,
    min_samples: usize,
) -> Vec<RollingRow> {
    let levels: Vec<Option<f64>> = rows.iter().map(|r| r.level).collect();

    rows.into_iter()
        .enumerate()
        .map(|(i, reading)| {
            let start = (i + 1).saturating_sub(window_width);
            let (roll_mean, roll_std) = window_stats(&levels[start..=i], min_samples);
            RollingRow {
                reading,
                roll_mean,
                roll_std,
            }
        })
        .collect()
}

/// Adds `roll_mean`/`roll_std` to every reading, site by site.
///
/// Each site's rows are re-sorted by timestamp if needed (the cleaning stage
/// should already deliver them sorted), then checked for duplicate
/// timestamps. The output has one row per input row, ordered by
/// (site, timestamp). With `workers > 1` sites are processed on a pool.
///
/// # Errors
/// - `PipelineError::InvalidParameter` — unusable window configuration.
/// - `PipelineError::EmptyInput` — the table has no rows.
/// - `PipelineError::Schema` — a row without a site identifier.
/// - `PipelineError::Ordering` — duplicate timestamps within a site.
pub fn compute_rolling(
    table: ReadingTable,
    window_width: usize,
    min_samples: usize,
    workers: usize,
) -> Result<RollingTable, PipelineError> {
    validate_window(window_width, min_samples)?;

    if table.rows.is_empty() {
        return Err(PipelineError::EmptyInput(
            "no readings to compute rolling statistics from".to_string(),
        ));
    }

    let ReadingTable {
        columns,
        extra_columns,
        rows,
    } = table;
    let partitions = partition_by_site(rows)?;

    let per_site = map_sites(partitions, workers, move |site, mut rows| {
        if sort_site_rows(&mut rows) {
            warn!("site {}: readings were not in timestamp order, re-sorted", site);
        }
        check_strictly_increasing(site, &rows)?;

        let rolled = rolling_for_site(rows, window_width, min_samples);
        let valid = rolled.iter().filter(|r| r.roll_mean.is_some()).count();
        debug!(
            "site {}: {} rows, {} with a valid {}-sample window",
            site,
            rolled.len(),
            valid,
            window_width
        );
        Ok(rolled)
    })?;

    info!(
        "rolling statistics computed for {} site(s), window {} samples, min {} valid",
        per_site.len(),
        window_width,
        min_samples
    );

    Ok(RollingTable {
        columns,
        extra_columns,
        window_min: window_width,
        rows: merge_sites(per_site),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
