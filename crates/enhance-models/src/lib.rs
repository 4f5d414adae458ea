//! Shared data models for the image enhancement service.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and lifecycle states
//! - The model registry (scale, divisibility and window requirements)
//! - Operation selectors submitted by front ends
//! - Result record outcomes and their wire encoding

pub mod job;
pub mod model;
pub mod outcome;
pub mod selector;

// Re-export common types
pub use job::{JobId, JobState};
pub use model::{ModelDescriptor, ModelError, ModelName, Task};
pub use outcome::{ResultOutcome, FAILURE_SENTINEL};
pub use selector::Selector;
