//! Build, verify and apply signed DRK document packages.

pub mod applier;
pub mod builder;
pub mod catalog;
pub mod collect;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod paths;
pub mod signing;
pub mod verifier;

pub use applier::{ApplyReport, PackageApplier, latest_backup, restore_backup};
pub use builder::{
    BuildMetadata, BuildSummary, DEFAULT_COMPRESSION_LEVEL, DeltaOutcome, PackageBuilder,
};
pub use catalog::{CatalogStats, PackageListing, list_packages, package_stats};
pub use collect::{DeltaComputer, FileFilter, SourceFile, collect_files, hash_tree};
pub use config::DrkConfig;
pub use error::{PackageError, PackageResult};
pub use paths::*;
pub use signing::{PackageSigner, TrustedKey};
pub use verifier::{PackageVerifier, VerifiedPackage, read_manifest};

