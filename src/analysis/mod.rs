/// Signal analysis for the noise monitoring pipeline.
///
/// Submodules:
/// - `groupings`    — per-site partitioning, worker-pool execution, merge.
/// - `rolling`      — trailing-window mean/std of LAeq.
/// - `buckets`      — calendar bucket metrics (mean, p95, max, count).
/// - `noise_events` — adaptive-threshold event segmentation.

pub mod buckets;
pub mod groupings;
pub mod noise_events;
pub mod rolling;

pub use buckets::{aggregate_by_bucket, BucketWidth};
pub use noise_events::{detect_events, EventConfig, EventSegmenter};
pub use rolling::{compute_rolling, default_min_samples};
