//! Error type for scheduler and runner operations.

use db::DbError;

pub type ActorResult<T> = Result<T, ActorError>;

#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
