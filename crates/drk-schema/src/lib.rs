//! Shared types and wire format for DRK document packages.
//!
//! Everything in this crate is pure: no filesystem access beyond
//! [`Sha256Digest::compute_file`], no signing keys, no database.

pub mod container;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod version;

// Re-exports
pub use container::{Container, HEADER_LEN, MAGIC};
pub use error::FormatError;
pub use hash::Sha256Digest;
pub use manifest::{
    FileEntry, ManifestMetadata, PackageManifest, PackageType, validate_relative_path,
};
