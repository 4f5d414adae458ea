//! Image enhancement worker.
//!
//! This crate provides:
//! - A single-consumer executor that processes one job at a time
//! - Crash recovery by claiming jobs abandoned by dead workers
//! - A per-worker cache of loaded transforms
//! - Cooperative cancellation at tile boundaries
//! - Structured job logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use models::{OnnxLoader, TransformLoader, TransformRegistry};
pub use processor::JobProcessor;
