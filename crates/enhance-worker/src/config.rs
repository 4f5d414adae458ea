//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use enhance_media::{EnhanceConfig, TileFailurePolicy};
use enhance_models::ModelName;
use tracing::warn;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding `<model>.onnx` weight files
    pub models_dir: PathBuf,
    /// Tile edge in input pixels (0 disables tiling)
    pub tile_size: usize,
    /// Context pixels around each tile
    pub tile_pad: usize,
    /// Reflect padding added before tiling
    pub pre_pad: usize,
    /// What to do when a single tile fails
    pub failure_policy: TileFailurePolicy,
    /// How long one consume call blocks waiting for a job
    pub block_time: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often a running job checks for a cancellation request
    pub cancel_poll_interval: Duration,
    /// Models loaded at startup instead of on first use
    pub preload_models: Vec<ModelName>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus exporter, if enabled
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            tile_size: 400,
            tile_pad: 10,
            pre_pad: 10,
            failure_policy: TileFailurePolicy::Abort,
            block_time: Duration::from_millis(1000),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            cancel_poll_interval: Duration::from_millis(500),
            preload_models: Vec::new(),
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            models_dir: std::env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            tile_size: std::env::var("TILE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(400),
            tile_pad: std::env::var("TILE_PAD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            pre_pad: std::env::var("PRE_PAD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            failure_policy: std::env::var("TILE_FAILURE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            block_time: Duration::from_millis(
                std::env::var("WORKER_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000u64)
                    .max(1),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            cancel_poll_interval: Duration::from_millis(
                std::env::var("WORKER_CANCEL_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            preload_models: std::env::var("WORKER_PRELOAD_MODELS")
                .map(|s| parse_model_list(&s))
                .unwrap_or_default(),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Tiling and padding parameters for the enhancement pipeline.
    pub fn enhance_config(&self) -> EnhanceConfig {
        EnhanceConfig {
            tile_size: self.tile_size,
            tile_pad: self.tile_pad,
            pre_pad: self.pre_pad,
            failure_policy: self.failure_policy,
        }
    }
}

/// Parse a comma separated list of model names, skipping unknown entries.
pub fn parse_model_list(value: &str) -> Vec<ModelName> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<ModelName>() {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Ignoring preload entry: {}", e);
                None
            }
        })
        .collect()
}
