/// Tabular inputs produced by the external cleaning stage.
///
/// - `tables`   — CSV parsing for the clean readings and the rolling series
/// - `fixtures` (test only) — representative CSV payloads and row builders

pub mod tables;

#[cfg(test)]
pub mod fixtures;

pub use tables::{
    parse_timestamp, read_readings, read_readings_file, read_rolling, read_rolling_file,
};
