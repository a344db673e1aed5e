/// Noise Event Segmentation
///
/// Turns a rolling-augmented series into discrete noise events: spans where
/// `LAeq` stays above an adaptive, locally computed threshold for at least a
/// minimum number of minutes.
///
/// # Segmentation Process
///
/// 1. **Classification**
///    - A row is over-threshold when `level > roll_mean + k_sigma * roll_std`
///    - Rows missing the level or either statistic are never over-threshold
///
/// 2. **Scan** (per site, in timestamp order)
///    - `Idle` → `InEvent` on the first over-threshold row
///    - `InEvent` → `InEvent` while consecutive rows stay over-threshold
///    - `InEvent` → `Idle` on the first row that is not, or at end of series
///
/// 3. **Close**
///    - Duration counts both endpoint samples: `(end - start) + 1` minutes
///    - Candidates shorter than `min_duration_minutes` are discarded
///    - Survivors report peak and mean `LAeq` over the block
///
/// A row with missing statistics inside a loud stretch splits it in two;
/// there is no gap bridging.

use chrono::NaiveDateTime;
use log::{debug, info, trace};

use crate::analysis::groupings::{
    check_strictly_increasing, map_sites, merge_sites, partition_by_site,
};
use crate::model::{NoiseEvent, PipelineError, RollingRow};

/// Segmentation configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventConfig {
    /// Threshold = rolling mean + k_sigma * rolling std
    pub k_sigma: f64,

    /// Shortest event kept, in minutes (inclusive count of samples)
    pub min_duration_minutes: i64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            k_sigma: 2.0,
            min_duration_minutes: 3,
        }
    }
}

impl EventConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.k_sigma.is_finite() {
            return Err(PipelineError::InvalidParameter(format!(
                "k_sigma must be a finite number, got {}",
                self.k_sigma
            )));
        }
        if self.min_duration_minutes < 1 {
            return Err(PipelineError::InvalidParameter(format!(
                "min_duration_min must be at least 1, got {}",
                self.min_duration_minutes
            )));
        }
        Ok(())
    }
}

/// Adaptive threshold for a row, when its statistics are available.
pub fn threshold(row: &RollingRow, k_sigma: f64) -> Option<f64> {
    match (row.roll_mean, row.roll_std) {
        (Some(mean), Some(std)) => Some(mean + k_sigma * std),
        _ => None,
    }
}

/// Strict `>` comparison: a level exactly at the threshold is not over.
pub fn is_over_threshold(row: &RollingRow, k_sigma: f64) -> bool {
    match (row.reading.level, threshold(row, k_sigma)) {
        (Some(level), Some(limit)) => level > limit,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// An open run of over-threshold rows.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    start: NaiveDateTime,
    end: NaiveDateTime,
    peak: f64,
    sum: f64,
    count: usize,
}

impl Candidate {
    fn open(timestamp: NaiveDateTime, level: f64) -> Self {
        Candidate {
            start: timestamp,
            end: timestamp,
            peak: level,
            sum: level,
            count: 1,
        }
    }

    fn extend(&mut self, timestamp: NaiveDateTime, level: f64) {
        self.end = timestamp;
        self.peak = self.peak.max(level);
        self.sum += level;
        self.count += 1;
    }

    fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes() + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScanState {
    Idle,
    InEvent(Candidate),
}

/// Explicit finite-state scan over one site's rows.
///
/// Feed rows in timestamp order with [`EventSegmenter::step`], then call
/// [`EventSegmenter::finish`] to close any open candidate and collect the
/// surviving events.
pub struct EventSegmenter<'a> {
    site: &'a str,
    config: EventConfig,
    state: ScanState,
    events: Vec<NoiseEvent>,
    discarded: usize,
}

impl<'a> EventSegmenter<'a> {
    pub fn new(site: &'a str, config: EventConfig) -> Self {
        Self {
            site,
            config,
            state: ScanState::Idle,
            events: Vec::new(),
            discarded: 0,
        }
    }

    pub fn is_in_event(&self) -> bool {
        matches!(self.state, ScanState::InEvent(_))
    }

    pub fn step(&mut self, row: &RollingRow) {
        let over = is_over_threshold(row, self.config.k_sigma);
        let timestamp = row.reading.timestamp;

        self.state = match (self.state, over, row.reading.level) {
            (ScanState::Idle, true, Some(level)) => {
                ScanState::InEvent(Candidate::open(timestamp, level))
            }
            (ScanState::InEvent(mut candidate), true, Some(level)) => {
                candidate.extend(timestamp, level);
                ScanState::InEvent(candidate)
            }
            (ScanState::InEvent(candidate), _, _) => {
                self.close(candidate);
                ScanState::Idle
            }
            (ScanState::Idle, _, _) => ScanState::Idle,
        };
    }

    /// Closes a still-open candidate at end of series and returns the events
    /// in chronological order.
    pub fn finish(mut self) -> Vec<NoiseEvent> {
        if let ScanState::InEvent(candidate) = self.state {
            self.close(candidate);
            self.state = ScanState::Idle;
        }
        debug!(
            "site {}: {} event(s) kept, {} short candidate(s) discarded",
            self.site,
            self.events.len(),
            self.discarded
        );
        self.events
    }

    fn close(&mut self, candidate: Candidate) {
        let duration_minutes = candidate.duration_minutes();
        if duration_minutes < self.config.min_duration_minutes {
            trace!(
                "site {}: discarding {}-minute candidate at {}",
                self.site,
                duration_minutes,
                candidate.start
            );
            self.discarded += 1;
            return;
        }

        self.events.push(NoiseEvent {
            site: self.site.to_string(),
            start_time: candidate.start,
            end_time: candidate.end,
            duration_minutes,
            peak_level: candidate.peak,
            mean_level: candidate.sum / candidate.count as f64,
        });
    }
}

/// Segments one site's rows, which must be in timestamp order.
pub fn segment_site(site: &str, rows: &[RollingRow], config: EventConfig) -> Vec<NoiseEvent> {
    let mut segmenter = EventSegmenter::new(site, config);
    for row in rows {
        segmenter.step(row);
    }
    segmenter.finish()
}

/// Detects noise events for every site, ordered by (site, start_time).
///
/// Rows are not re-sorted here: the rolling stage already delivers them in
/// order, so a series that is out of order at this point is malformed input.
///
/// # Errors
/// - `PipelineError::InvalidParameter` — non-finite `k_sigma` or a minimum
///   duration below one minute.
/// - `PipelineError::EmptyInput` — no rows at all.
/// - `PipelineError::Schema` — a row without a site identifier.
/// - `PipelineError::Ordering` — timestamps not strictly increasing within a site.
pub fn detect_events(
    rows: Vec<RollingRow>,
    config: EventConfig,
    workers: usize,
) -> Result<Vec<NoiseEvent>, PipelineError> {
    config.validate()?;

    if rows.is_empty() {
        return Err(PipelineError::EmptyInput(
            "no rolling rows to segment into events".to_string(),
        ));
    }

    let partitions = partition_by_site(rows)?;
    let per_site = map_sites(partitions, workers, move |site, rows| {
        check_strictly_increasing(site, &rows)?;
        Ok(segment_site(site, &rows, config))
    })?;

    let events = merge_sites(per_site);
    info!(
        "detected {} event(s) (k_sigma = {}, min duration = {} min)",
        events.len(),
        config.k_sigma,
        config.min_duration_minutes
    );
    Ok(events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
