//! Noise Monitoring - batch analysis CLI
//!
//! Processes cleaned per-minute noise measurements:
//! 1. Computes rolling mean/std of LAeq per site
//! 2. Aggregates bucket metrics (mean, p95, max, sample count)
//! 3. Detects noise events above an adaptive threshold
//!
//! Usage:
//!   cargo run --release -- run                       # full pipeline with noise.toml / defaults
//!   cargo run --release -- run --json                # machine-readable summary on stdout
//!   cargo run --release -- rolling --input clean.csv # single stage
//!   cargo run --release -- events --k-sigma 2.5
//!
//! Environment:
//!   NOISE_CONFIG - path to the TOML configuration (also read from .env)
//!   RUST_LOG     - log filter (default: info)

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use noise_monitor::analysis::BucketWidth;
use noise_monitor::config::{load_or_default, PipelineConfig};
use noise_monitor::model::PipelineError;
use noise_monitor::pipeline::{run_events, run_metrics, run_pipeline, run_rolling};

#[derive(Parser, Debug)]
#[command(
    name = "noise-monitor",
    version,
    about = "Rolling statistics, bucket metrics and event detection for environmental noise series"
)]
struct Cli {
    /// Configuration file (default: $NOISE_CONFIG, then ./noise.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Rolling window width in samples
    #[arg(long, global = true)]
    window_min: Option<usize>,

    /// Valid samples required for a rolling estimate
    #[arg(long, global = true)]
    min_samples: Option<usize>,

    /// Aggregation bucket width, e.g. 1h, 15min, 1d
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Threshold multiplier on the rolling standard deviation
    #[arg(long, global = true)]
    k_sigma: Option<f64>,

    /// Shortest event kept, in minutes
    #[arg(long, global = true)]
    min_duration_min: Option<i64>,

    /// Directory for output files
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Worker threads for per-site processing
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full pipeline: clean CSV → rolling, metrics and events CSVs
    Run {
        /// Clean readings CSV
        #[arg(long)]
        input: Option<PathBuf>,

        /// Site that must be present in the input (repeatable)
        #[arg(long = "require-site")]
        required_sites: Vec<String>,

        /// Print the run summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Clean CSV → rolling series CSV
    Rolling {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Rolling series CSV → bucket metrics CSV
    Metrics {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Rolling series CSV → detected events CSV
    Events {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn apply_overrides(cli: &Cli, config: &mut PipelineConfig) -> Result<(), PipelineError> {
    if let Some(window) = cli.window_min {
        config.rolling.window_min = window;
    }
    if let Some(min_samples) = cli.min_samples {
        config.rolling.min_samples = Some(min_samples);
    }
    if let Some(token) = &cli.bucket {
        config.buckets.width = BucketWidth::parse(token)?;
    }
    if let Some(k) = cli.k_sigma {
        config.events.k_sigma = k;
    }
    if let Some(minutes) = cli.min_duration_min {
        config.events.min_duration_min = minutes;
    }
    if let Some(dir) = &cli.output_dir {
        config.run.output_dir = dir.clone();
    }
    if let Some(workers) = cli.workers {
        config.run.workers = workers;
    }
    if let Command::Run { input, required_sites, .. } = &cli.command {
        if let Some(input) = input {
            config.run.input = input.clone();
        }
        config.run.required_sites.extend(required_sites.iter().cloned());
    }
    config.validate()
}

fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_or_default(cli.config.as_deref())?;
    apply_overrides(&cli, &mut config)?;

    match &cli.command {
        Command::Run { json: true, .. } => {
            let summary = run_pipeline(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Run { json: false, .. } => {
            println!("🔊 Noise Monitoring Pipeline");
            println!("============================\n");
            println!("⚙️  Configuration:");
            println!(
                "  - Rolling window: {} samples (min {} valid)",
                config.rolling.window_min,
                config.rolling.effective_min_samples()
            );
            println!("  - Bucket width: {}", config.buckets.width);
            println!("  - Threshold: mean + {:.2} × std", config.events.k_sigma);
            println!("  - Minimum event duration: {} min", config.events.min_duration_min);
            println!("  - Workers: {}\n", config.run.workers);

            println!("📥 Processing {}...", config.run.input.display());
            let summary = run_pipeline(&config)?;
            println!("✓ Rolling series:  {}", summary.rolling_path.display());
            println!("✓ Bucket metrics:  {}", summary.metrics_path.display());
            println!("✓ Detected events: {}\n", summary.events_path.display());

            println!("{}", "=".repeat(50));
            println!("Summary:");
            for site in &summary.sites {
                println!(
                    "  {:<10} rows: {:>7}  valid windows: {:>7}  buckets: {:>5}  events: {:>4}",
                    site.site, site.rows, site.valid_windows, site.buckets, site.events
                );
            }
            println!("  Total events: {}", summary.total_events);
            println!("{}", "=".repeat(50));
        }
        Command::Rolling { input } => {
            let input = input.clone().unwrap_or_else(|| config.run.input.clone());
            let rolling = run_rolling(&config, &input)?;
            println!(
                "✓ {} rolling rows → {}",
                rolling.rows.len(),
                config.rolling_output().display()
            );
        }
        Command::Metrics { input } => {
            let input = input.clone().unwrap_or_else(|| config.rolling_output());
            let metrics = run_metrics(&config, &input)?;
            println!("✓ {} bucket rows → {}", metrics.len(), config.metrics_output().display());
        }
        Command::Events { input } => {
            let input = input.clone().unwrap_or_else(|| config.rolling_output());
            let events = run_events(&config, &input)?;
            println!("✓ {} events → {}", events.len(), config.events_output().display());
        }
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli) {
        eprintln!("\n❌ {}\n", e);
        std::process::exit(1);
    }
}
