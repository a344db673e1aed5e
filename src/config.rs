/// Pipeline configuration loader - parses noise.toml
///
/// Keeps the tunable parameters (window width, bucket width, threshold
/// multiplier, minimum event duration) and the run layout out of the code,
/// so a deployment can be re-tuned without recompiling. Every field is
/// optional; anything left out falls back to the defaults below.
///
/// ```toml
/// [rolling]
/// window_min = 15
/// # min_samples = 5          # default: max(3, window_min / 3)
///
/// [buckets]
/// width = "1h"
///
/// [events]
/// k_sigma = 2.0
/// min_duration_min = 3
///
/// [run]
/// input = "data/processed/noise_clean.csv"
/// output_dir = "data/processed"
/// workers = 1
/// required_sites = ["P1"]
/// ```

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::buckets::BucketWidth;
use crate::analysis::noise_events::EventConfig;
use crate::analysis::rolling::{default_min_samples, validate_window};
use crate::model::PipelineError;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "noise.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_ENV_VAR: &str = "NOISE_CONFIG";

/// Rolling window parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollingConfig {
    /// Window width in samples (one sample per minute after cleaning)
    pub window_min: usize,
    /// Valid samples needed for an estimate; `None` means `max(3, window_min / 3)`
    pub min_samples: Option<usize>,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            window_min: 15,
            min_samples: None,
        }
    }
}

impl RollingConfig {
    pub fn effective_min_samples(&self) -> usize {
        self.min_samples
            .unwrap_or_else(|| default_min_samples(self.window_min))
    }
}

/// Bucket aggregation parameters
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketConfig {
    pub width: BucketWidth,
}

/// Event segmentation parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsSection {
    pub k_sigma: f64,
    pub min_duration_min: i64,
}

impl Default for EventsSection {
    fn default() -> Self {
        let defaults = EventConfig::default();
        Self {
            k_sigma: defaults.k_sigma,
            min_duration_min: defaults.min_duration_minutes,
        }
    }
}

/// Where to read from and write to, and how to run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Clean readings CSV produced by the cleaning stage
    pub input: PathBuf,
    /// Directory receiving the rolling, metrics and events files
    pub output_dir: PathBuf,
    /// Worker threads for per-site processing (1 = run inline)
    pub workers: usize,
    /// Sites that must be present in the input
    pub required_sites: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/processed/noise_clean.csv"),
            output_dir: PathBuf::from("data/processed"),
            workers: 1,
            required_sites: Vec::new(),
        }
    }
}

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub rolling: RollingConfig,
    pub buckets: BucketConfig,
    pub events: EventsSection,
    pub run: RunConfig,
}

impl PipelineConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every parameter is inside its valid range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_window(self.rolling.window_min, self.rolling.effective_min_samples())?;
        self.event_config().validate()?;
        if self.run.workers == 0 {
            return Err(PipelineError::InvalidParameter(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn event_config(&self) -> EventConfig {
        EventConfig {
            k_sigma: self.events.k_sigma,
            min_duration_minutes: self.events.min_duration_min,
        }
    }

    pub fn rolling_output(&self) -> PathBuf {
        self.run.output_dir.join("noise_with_rolling.csv")
    }

    pub fn metrics_output(&self) -> PathBuf {
        self.run
            .output_dir
            .join(format!("noise_metrics_{}.csv", self.buckets.width.label()))
    }

    pub fn events_output(&self) -> PathBuf {
        self.run.output_dir.join("detected_events.csv")
    }
}

/// Loads and validates the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<PipelineConfig, PipelineError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    PipelineConfig::from_toml_str(&contents).map_err(|e| match e {
        PipelineError::Config(msg) => {
            PipelineError::Config(format!("failed to parse {}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Picks the configuration file to use: an explicit path, else
/// `$NOISE_CONFIG` (a `.env` file is honoured), else `noise.toml` in the
/// working directory if it exists. `None` means built-in defaults.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    dotenv::dotenv().ok();
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    default.exists().then_some(default)
}

/// Resolves and loads the configuration, falling back to defaults when no
/// file is configured.
pub fn load_or_default(explicit: Option<&Path>) -> Result<PipelineConfig, PipelineError> {
    match resolve_config_path(explicit) {
        Some(path) => {
            log::info!("loading configuration from {}", path.display());
            load_config(&path)
        }
        None => {
            log::info!("no configuration file found, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_pipeline() {
        let config = PipelineConfig::default();
        assert_eq!(config.rolling.window_min, 15);
        assert_eq!(config.rolling.effective_min_samples(), 5);
        assert_eq!(config.buckets.width, BucketWidth::default());
        assert_eq!(config.events.k_sigma, 2.0);
        assert_eq!(config.events.min_duration_min, 3);
        assert_eq!(config.run.workers, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_document_overrides_only_given_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [rolling]
            window_min = 30

            [buckets]
            width = "15min"

            [events]
            k_sigma = 2.5

            [run]
            workers = 4
            required_sites = ["P1", "P2"]
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.rolling.window_min, 30);
        assert_eq!(config.rolling.effective_min_samples(), 10);
        assert_eq!(config.buckets.width.label(), "15min");
        assert_eq!(config.events.k_sigma, 2.5);
        assert_eq!(config.events.min_duration_min, 3, "untouched field keeps default");
        assert_eq!(config.run.workers, 4);
        assert_eq!(config.run.required_sites, vec!["P1", "P2"]);
    }

    #[test]
    fn test_explicit_min_samples_wins() {
        let config =
            PipelineConfig::from_toml_str("[rolling]\nwindow_min = 15\nmin_samples = 8\n")
                .unwrap();
        assert_eq!(config.rolling.effective_min_samples(), 8);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[rolling]\nmin_samples = 20\n"),
            Err(PipelineError::InvalidParameter(_))
        ));
        assert!(PipelineConfig::from_toml_str("[events]\nmin_duration_min = 0\n").is_err());
        assert!(PipelineConfig::from_toml_str("[run]\nworkers = 0\n").is_err());
        assert!(PipelineConfig::from_toml_str("[buckets]\nwidth = \"often\"\n").is_err());
    }

    #[test]
    fn test_unknown_keys_are_config_errors() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[events]\nksigma = 2.0\n"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_output_paths_follow_naming_convention() {
        let mut config = PipelineConfig::default();
        config.run.output_dir = PathBuf::from("out");
        assert_eq!(config.rolling_output(), PathBuf::from("out/noise_with_rolling.csv"));
        assert_eq!(config.metrics_output(), PathBuf::from("out/noise_metrics_1h.csv"));
        assert_eq!(config.events_output(), PathBuf::from("out/detected_events.csv"));
    }

    #[test]
    fn test_explicit_path_takes_precedence() {
        let path = Path::new("/tmp/custom-noise.toml");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/noise.toml")).unwrap_err();
        match err {
            PipelineError::Config(msg) => assert!(msg.contains("/nonexistent/noise.toml")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
