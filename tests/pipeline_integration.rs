/// Integration tests for the batch pipeline
///
/// These tests run the public API end to end on files in a scratch
/// directory:
/// 1. Full run writes the rolling, metrics and events files
/// 2. Stage-by-stage runs reproduce the full run byte for byte
/// 3. Worker-pool runs reproduce the sequential run byte for byte
/// 4. Fatal input problems surface as the matching error variant
///
/// Run with: cargo test --test pipeline_integration

use noise_monitor::config::PipelineConfig;
use noise_monitor::model::PipelineError;
use noise_monitor::pipeline::{run_events, run_metrics, run_pipeline, run_rolling};

use std::fs;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("noise_monitor_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("scratch directory should be creatable");
    dir
}

/// Two sites of cleaned data:
/// - P1: 08:00–08:59, alternating 50/52 dB, a gap at 08:10 and a rising
///   75/76/77 dB burst at 08:30–08:32
/// - P2: 07:30–08:59, alternating 47/48 dB, no events
fn clean_csv() -> String {
    let mut csv = String::from("timestamp,site,LAeq_dB,LAmax_dB,data_quality\n");

    for m in 0..60 {
        let level = match m {
            10 => None,
            30..=32 => Some(75.0 + (m - 30) as f64),
            _ if m % 2 == 0 => Some(50.0),
            _ => Some(52.0),
        };
        let (laeq, lamax, quality) = match level {
            Some(l) => (l.to_string(), (l + 10.0).to_string(), "OK"),
            None => (String::new(), String::new(), "MISSING_OR_OUTLIER"),
        };
        csv.push_str(&format!(
            "2024-06-01 08:{:02}:00,P1,{},{},{}\n",
            m, laeq, lamax, quality
        ));
    }

    for m in 0..90 {
        let level = if m % 2 == 0 { 47.0 } else { 48.0 };
        let (hour, minute) = (7 + (30 + m) / 60, (30 + m) % 60);
        csv.push_str(&format!(
            "2024-06-01 {:02}:{:02}:00,P2,{},{},OK\n",
            hour,
            minute,
            level,
            level + 6.0
        ));
    }

    csv
}

fn config_for(dir: &Path) -> PipelineConfig {
    let input = dir.join("noise_clean.csv");
    fs::write(&input, clean_csv()).expect("input should be writable");

    let mut config = PipelineConfig::default();
    config.run.input = input;
    config.run.output_dir = dir.join("processed");
    config
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}

// ---------------------------------------------------------------------------
// 1. Full run
// ---------------------------------------------------------------------------

#[test]
fn test_full_run_writes_all_outputs() {
    let dir = scratch_dir("full_run");
    let config = config_for(&dir);

    let summary = run_pipeline(&config).expect("pipeline should succeed");

    assert_eq!(summary.total_rows, 150);
    assert_eq!(summary.total_events, 1);
    assert_eq!(summary.sites.len(), 2);
    assert_eq!(summary.sites[0].site, "P1");
    assert_eq!(summary.sites[0].valid_windows, 56, "first four rows lack 5 samples");
    assert_eq!(summary.sites[1].buckets, 2);

    let events = read(&config.events_output());
    assert_eq!(
        events,
        "site,start_time,end_time,duration_min,LAeq_peak,LAeq_mean\n\
         P1,2024-06-01T08:30:00,2024-06-01T08:32:00,3,77,76\n"
    );

    let metrics = read(&config.metrics_output());
    let lines: Vec<&str> = metrics.lines().collect();
    assert_eq!(lines[0], "timestamp,site,LAeq_mean,LAeq_p95,LAmax_max,n_samples");
    assert_eq!(lines.len(), 4, "header + 1 P1 bucket + 2 P2 buckets");
    assert!(lines[1].starts_with("2024-06-01T08:00:00,P1,"));
    assert!(lines[1].ends_with(",87,59"), "P1 peak is 77 + 10, 59 levels present: {}", lines[1]);
    assert!(lines[2].starts_with("2024-06-01T07:00:00,P2,47.5,"));
    assert!(lines[2].ends_with(",54,30"), "got {}", lines[2]);
    assert!(lines[3].ends_with(",54,60"), "got {}", lines[3]);

    let p1_mean: f64 = lines[1].split(',').nth(2).unwrap().parse().unwrap();
    assert!((p1_mean - 52.305_084_7).abs() < 1e-6, "got {}", p1_mean);

    let rolling = read(&config.rolling_output());
    let mut rolling_lines = rolling.lines();
    assert_eq!(
        rolling_lines.next(),
        Some(
            "timestamp,site,LAeq_dB,LAmax_dB,data_quality,\
             LAeq_roll_mean_15min,LAeq_roll_std_15min"
        )
    );
    assert_eq!(rolling_lines.next(), Some("2024-06-01T08:00:00,P1,50,60,OK,,"));
    assert_eq!(rolling.lines().count(), 151);
    assert!(
        rolling.contains("2024-06-01T08:10:00,P1,,,MISSING_OR_OUTLIER,"),
        "gap row should pass through with blank levels"
    );

    let _ = fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// 2. Stage-by-stage equivalence
// ---------------------------------------------------------------------------

#[test]
fn test_individual_stages_reproduce_full_run() {
    let full_dir = scratch_dir("stages_full");
    let full = config_for(&full_dir);
    run_pipeline(&full).expect("full run should succeed");

    let staged_dir = scratch_dir("stages_split");
    let staged = config_for(&staged_dir);
    run_rolling(&staged, &staged.run.input).expect("rolling stage");
    run_metrics(&staged, &staged.rolling_output()).expect("metrics stage");
    run_events(&staged, &staged.rolling_output()).expect("events stage");

    assert_eq!(read(&full.rolling_output()), read(&staged.rolling_output()));
    assert_eq!(read(&full.metrics_output()), read(&staged.metrics_output()));
    assert_eq!(read(&full.events_output()), read(&staged.events_output()));

    let _ = fs::remove_dir_all(&full_dir);
    let _ = fs::remove_dir_all(&staged_dir);
}

// ---------------------------------------------------------------------------
// 3. Determinism
// ---------------------------------------------------------------------------

#[test]
fn test_worker_pool_matches_sequential_output() {
    let seq_dir = scratch_dir("sequential");
    let sequential = config_for(&seq_dir);
    run_pipeline(&sequential).unwrap();

    let par_dir = scratch_dir("parallel");
    let mut parallel = config_for(&par_dir);
    parallel.run.workers = 4;
    run_pipeline(&parallel).unwrap();

    assert_eq!(read(&sequential.rolling_output()), read(&parallel.rolling_output()));
    assert_eq!(read(&sequential.metrics_output()), read(&parallel.metrics_output()));
    assert_eq!(read(&sequential.events_output()), read(&parallel.events_output()));

    let _ = fs::remove_dir_all(&seq_dir);
    let _ = fs::remove_dir_all(&par_dir);
}

#[test]
fn test_repeated_runs_are_identical() {
    let dir = scratch_dir("repeat");
    let config = config_for(&dir);

    run_pipeline(&config).unwrap();
    let first = read(&config.rolling_output());
    run_pipeline(&config).unwrap();
    let second = read(&config.rolling_output());

    assert_eq!(first, second);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_bucket_width_changes_metrics_file_name() {
    let dir = scratch_dir("quarter_hour");
    let mut config = config_for(&dir);
    config.buckets.width = noise_monitor::analysis::BucketWidth::parse("15min").unwrap();

    run_pipeline(&config).unwrap();
    let path = config.metrics_output();
    assert!(path.ends_with("noise_metrics_15min.csv"));
    // P1: 4 quarter-hours, P2: 6 quarter-hours.
    assert_eq!(read(&path).lines().count(), 1 + 4 + 6);

    let _ = fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// 4. Failure modes
// ---------------------------------------------------------------------------

#[test]
fn test_missing_required_site_fails_run() {
    let dir = scratch_dir("required_site");
    let mut config = config_for(&dir);
    config.run.required_sites = vec!["P1".to_string(), "P9".to_string()];

    match run_pipeline(&config) {
        Err(PipelineError::EmptyInput(msg)) => assert!(msg.contains("P9"), "got: {}", msg),
        other => panic!("expected EmptyInput, got {:?}", other),
    }
    assert!(!config.events_output().exists(), "no partial output on failure");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_duplicate_timestamp_fails_run() {
    let dir = scratch_dir("duplicate");
    let config = config_for(&dir);
    let mut csv = clean_csv();
    csv.push_str("2024-06-01 08:15:00,P1,51,61,OK\n");
    fs::write(&config.run.input, csv).unwrap();

    assert!(matches!(
        run_pipeline(&config),
        Err(PipelineError::Ordering { .. })
    ));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_column_fails_run() {
    let dir = scratch_dir("schema");
    let config = config_for(&dir);
    fs::write(&config.run.input, "timestamp,site,LAeq_dB\n2024-06-01 08:00:00,P1,50\n").unwrap();

    assert!(matches!(run_pipeline(&config), Err(PipelineError::Schema(_))));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_events_stage_rejects_rolling_file_for_other_window() {
    let dir = scratch_dir("window_mismatch");
    let mut config = config_for(&dir);
    run_rolling(&config, &config.run.input).unwrap();

    config.rolling.window_min = 30;
    let err = run_events(&config, &config.rolling_output()).unwrap_err();
    assert!(matches!(err, PipelineError::Schema(_)), "got {:?}", err);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_standalone_stages_enforce_required_sites() {
    let dir = scratch_dir("stage_required_site");
    let mut config = config_for(&dir);
    run_rolling(&config, &config.run.input).expect("rolling stage without requirements");

    config.run.required_sites = vec!["P9".to_string()];

    match run_events(&config, &config.rolling_output()) {
        Err(PipelineError::EmptyInput(msg)) => assert!(msg.contains("P9"), "got: {}", msg),
        other => panic!("events stage: expected EmptyInput, got {:?}", other),
    }
    assert!(!config.events_output().exists(), "events file should not be written");

    match run_metrics(&config, &config.rolling_output()) {
        Err(PipelineError::EmptyInput(msg)) => assert!(msg.contains("P9"), "got: {}", msg),
        other => panic!("metrics stage: expected EmptyInput, got {:?}", other),
    }
    assert!(!config.metrics_output().exists(), "metrics file should not be written");

    let _ = fs::remove_dir_all(&dir);
}
