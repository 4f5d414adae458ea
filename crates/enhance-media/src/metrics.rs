//! Metrics emitted by the inference pipeline.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const TILES_PROCESSED_TOTAL: &str = "enhance_tiles_processed_total";
    pub const TILES_FAILED_TOTAL: &str = "enhance_tiles_failed_total";
    pub const MODEL_LOAD_SECONDS: &str = "enhance_model_load_seconds";
}

/// Record a successfully stitched tile.
pub fn record_tile(model: &str) {
    counter!(names::TILES_PROCESSED_TOTAL, "model" => model.to_string()).increment(1);
}

/// Record a tile whose inference failed.
pub fn record_tile_failure(model: &str) {
    counter!(names::TILES_FAILED_TOTAL, "model" => model.to_string()).increment(1);
}

/// Record how long a model took to load.
pub fn record_model_load(model: &str, duration_secs: f64) {
    histogram!(names::MODEL_LOAD_SECONDS, "model" => model.to_string()).record(duration_secs);
}
