//! Meeting recording worker.
//!
//! This crate provides:
//! - The single-flight `JobStore` with linear retry backoff
//! - The queue consumer admitting join requests from Redis
//! - The recording job: external recorder → staging file → upload
//! - Graceful shutdown

pub mod config;
pub mod consumer;
pub mod error;
pub mod job_store;
pub mod logging;
pub mod metrics;
pub mod recording_job;
pub mod source;

#[cfg(test)]
mod testing;

pub use config::{JobStoreConfig, RecorderConfig, UploadBackendKind, WorkerConfig};
pub use consumer::{Delivery, QueueConsumer};
pub use error::{ErrorClass, WorkerError, WorkerResult};
pub use job_store::{Job, JobStore};
pub use logging::JobLogger;
pub use recording_job::{JobFactory, RecordingJob, UploadRoute};
pub use source::{CommandSource, RecordingSource};
