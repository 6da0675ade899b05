// ABOUTME: Shared error type for the persistence ports.
// ABOUTME: Repositories report missing rows, stale writes, and backend failures.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// The caller's copy was older than the stored one.
    #[error("record {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Attempts made by read-modify-write helpers before giving up on conflicts.
pub(crate) const MAX_WRITE_ATTEMPTS: usize = 8;
