//! Repository implementations for database operations.

mod area_repo;
mod credential_repo;
mod incident_repo;
mod job_repo;

pub use area_repo::AreaRepository;
pub use credential_repo::CredentialRepository;
pub use incident_repo::IncidentRepository;
pub use job_repo::{JobFilter, JobRepository};
