//! Registry errors.

use thiserror::Error;

/// Errors raised by the version registry.
///
/// Callers at a request boundary map [`RegistryError::is_not_found`] to a
/// not-found response and [`RegistryError::is_bad_request`] to a rejected
/// request; everything else is an internal failure.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Missing package, version, parent version or backing file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate version string or package name.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing delta linkage or contradictory request.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Disk failure while reading or deleting a package file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite failure.
    #[error("SQLite error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A previous holder of the store lock panicked.
    #[error("Database lock poisoned")]
    Lock,
}

impl RegistryError {
    /// True if the request named something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True if the request itself was invalid.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Validation(_))
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
