//! Job dispatch for image enhancement.
//!
//! This crate provides:
//! - Job enqueueing and competing-consumer delivery via Redis Streams
//! - Crash recovery by claiming messages left pending by dead consumers
//! - A write-once, read-once result store keyed by job id
//! - In-memory implementations of both for tests and local runs

pub mod error;
pub mod job;
pub mod memory;
pub mod queue;
pub mod result_store;

pub use error::{QueueError, QueueResult};
pub use job::{Delivery, EnhanceJob, JobMetadata};
pub use memory::{InMemoryQueue, InMemoryResultStore};
pub use queue::{JobQueue, QueueConfig, RedisJobQueue};
pub use result_store::{RedisResultStore, ResultStore};
