/// Test fixtures: representative CSV payloads and row builders.
///
/// The CSV strings mirror what the cleaning stage writes: one row per site
/// per minute, gaps present as rows with blank or `NaN` levels, and the
/// cleaning stage's own quality columns trailing the measurements.
///
/// All builder timestamps are minutes after 2024-01-01 00:00.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::model::{Reading, RollingRow};

/// 2024-01-01 00:00 + `m` minutes.
pub(crate) fn minute(m: i64) -> NaiveDateTime {
    at(0, 0) + Duration::minutes(m)
}

/// 2024-01-01 at `hour:min`.
pub(crate) fn at(hour: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(hour, min, 0))
        .expect("fixture time is valid")
}

/// Readings at minutes 0, 1, 2, … with `LAmax_dB` 8 dB above `LAeq_dB`.
pub(crate) fn series(site: &str, levels: &[Option<f64>]) -> Vec<Reading> {
    levels
        .iter()
        .enumerate()
        .map(|(i, level)| Reading::new(site, minute(i as i64), *level, level.map(|l| l + 8.0)))
        .collect()
}

/// Like [`series`] but already wrapped as rolling rows without statistics.
pub(crate) fn rolling_series(site: &str, levels: &[Option<f64>]) -> Vec<RollingRow> {
    rolling_with_stats(site, levels, None, None)
}

/// Rolling rows that all carry the same statistics.
pub(crate) fn rolling_with_stats(
    site: &str,
    levels: &[Option<f64>],
    roll_mean: Option<f64>,
    roll_std: Option<f64>,
) -> Vec<RollingRow> {
    series(site, levels)
        .into_iter()
        .map(|reading| RollingRow {
            reading,
            roll_mean,
            roll_std,
        })
        .collect()
}

/// Clean readings for two sites. P1's third minute is a gap: blank `LAeq`,
/// `NaN` `LAmax`, flagged by the cleaning stage.
pub(crate) fn fixture_clean_csv() -> &'static str {
    "timestamp,site,LAeq_dB,LAmax_dB,quality_flag,data_quality
2024-01-01 00:00:00,P1,52.3,61.0,OK,OK
2024-01-01 00:01:00,P1,53.1,64.2,OK,OK
2024-01-01 00:02:00,P1,,NaN,MISSING,MISSING_OR_OUTLIER
2024-01-01 00:03:00,P1,51.8,60.4,OK,OK
2024-01-01 00:00:00,P2,47.0,55.5,OK,OK
2024-01-01 00:01:00,P2,48.5,58.0,OK,OK
"
}

/// Rolling series as written for a 15-sample window. The first row has
/// too few samples for an estimate.
pub(crate) fn fixture_rolling_csv() -> &'static str {
    "timestamp,site,LAeq_dB,LAmax_dB,data_quality,LAeq_roll_mean_15min,LAeq_roll_std_15min
2024-01-01T00:00:00,P1,50.0,58.0,OK,,
2024-01-01T00:01:00,P1,50.0,58.0,OK,50.0,1.0
2024-01-01T00:02:00,P1,70.0,78.0,OK,50.0,1.0
2024-01-01T00:03:00,P1,50.0,58.0,OK,50.0,1.0
"
}
