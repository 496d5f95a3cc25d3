//! Redis list job queue.
//!
//! This crate provides:
//! - The `MessageQueue` transport contract used by the queue consumer
//! - A Redis implementation (BLPOP to take, LPUSH to return to the head)

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{MessageQueue, QueueConfig, RedisQueue};
