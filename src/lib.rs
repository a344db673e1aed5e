/// noise_monitor: environmental noise analysis for per-minute sound-level
/// monitoring sites.
///
/// # Module structure
///
/// ```text
/// noise_monitor
/// ├── model       — shared data types (Reading, RollingRow, BucketMetric, NoiseEvent, PipelineError)
/// ├── config      — pipeline configuration loader (noise.toml)
/// ├── ingest
/// │   ├── tables  — clean readings / rolling series CSV parsing
/// │   └── fixtures (test only) — representative CSV payloads
/// ├── analysis
/// │   ├── groupings    — per-site partitioning and parallel execution
/// │   ├── rolling      — sliding-window mean/std
/// │   ├── buckets      — hourly (or other width) aggregate metrics
/// │   └── noise_events — adaptive-threshold event segmentation
/// ├── export      — CSV writers for the three outputs
/// └── pipeline    — stage runners and full batch run
/// ```

/// Public modules
pub mod analysis;
pub mod config;
pub mod export;
pub mod ingest;
pub mod model;
pub mod pipeline;
