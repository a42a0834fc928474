//! Core domain types for the harvester.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and Command for crawl units
//! - ResumeState for per-job cursors
//! - Area, Credential and Incident records
//! - Collection and Owner for output partitioning

mod area;
mod collection;
mod credential;
mod incident;
mod job;
mod resume;

pub use area::{Area, AreaType};
pub use collection::{Collection, Owner};
pub use credential::{Credential, CredentialId, CredentialState};
pub use incident::Incident;
pub use job::{Command, Job, JobId, JobKey, JobOwner, JobProgress, JobStatus};
pub use resume::{Checkpoint, Cursor, GLOBAL_SCOPE, ResumeKey, ResumeState};

/// Errors raised when parsing domain values.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown job status: {0}")]
    UnknownStatus(String),
    #[error("unknown area type: {0}")]
    UnknownAreaType(String),
    #[error("invalid resume key: {0}")]
    InvalidResumeKey(String),
}
