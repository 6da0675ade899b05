// ABOUTME: Error types for database container management.
// ABOUTME: Distinguishes missing records, missing containers, and runtime failures.

use crate::runtime::{ContainerError, ImageError, LogError};
use crate::store::RepositoryError;
use crate::types::DatabaseId;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database not found: {0}")]
    NotFound(DatabaseId),

    /// No container holds the database's deterministic name.
    #[error("container {0} not found")]
    ContainerNotFound(String),

    #[error("a database named {0} already exists in this environment")]
    AlreadyExists(String),

    #[error("unsupported database type: {0}")]
    UnknownKind(String),

    #[error("invalid database configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Logs(#[from] LogError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl DatabaseError {
    pub fn is_container_missing(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_) | Self::Container(ContainerError::NotFound(_))
        )
    }
}
