//! Client side of the enhancement job protocol.
//!
//! Submits images to the job queue and polls the result store until the
//! worker has recorded an outcome.

pub mod config;
pub mod dispatcher;
pub mod error;

pub use config::ClientConfig;
pub use dispatcher::Dispatcher;
pub use error::{ClientError, ClientResult};
