//! Shared data models for the MeetBot recording worker.
//!
//! This crate provides Serde-serializable types for:
//! - Join requests carried on the job queue
//! - Meeting providers and recording content types
//! - Staging file identifiers
//! - Admission results and stored file records
//! - Recording names

pub mod admission;
pub mod file;
pub mod job;
pub mod media;
pub mod naming;
pub mod provider;

pub use admission::Admission;
pub use file::RecordedFile;
pub use job::{CorrelationId, JoinRequest, TempFileId};
pub use media::ContentType;
pub use naming::recording_name;
pub use provider::MeetingProvider;
