//! Errors raised while building, verifying or applying packages.

use drk_schema::FormatError;
use thiserror::Error;

/// Errors that can occur in package operations.
#[derive(Error, Debug)]
pub enum PackageError {
    /// Disk failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, truncated header, unparsable manifest or invalid layout.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Hash or signature mismatch.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// The request itself is invalid (e.g. an unsafe source path).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Malformed key material. The message never contains the key itself.
    #[error("Invalid key: {0}")]
    Key(String),
}

impl PackageError {
    /// True for failures caused by the package contents rather than the disk.
    pub fn is_content_error(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// Result alias for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_classification() {
        let io = PackageError::Io(std::io::Error::other("disk"));
        assert!(!io.is_content_error());
        assert!(PackageError::Format(FormatError::BadMagic).is_content_error());
        assert!(PackageError::Integrity("sig".into()).is_content_error());
    }
}
