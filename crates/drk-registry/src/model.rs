//! Registry records and request/response types.

use std::path::PathBuf;

use drk_schema::{PackageManifest, PackageType};
use serde::{Deserialize, Serialize};

/// A product whose document set is versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Row id.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Free text.
    pub description: Option<String>,
    /// Grouping used by operators, e.g. `manuals`.
    pub category: String,
    /// Newest full version registered.
    pub current_version: Option<String>,
    /// Newest full version published.
    pub latest_stable_version: Option<String>,
    /// Whether the package is still distributed.
    pub is_active: bool,
    /// Free-form metadata.
    pub metadata: Option<serde_json::Value>,
    /// Responsible person or team.
    pub maintainer: Option<String>,
    /// Labels.
    pub tags: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// Request to register a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPackage {
    /// Unique name.
    pub name: String,
    /// Grouping used by operators.
    pub category: String,
    /// Free text.
    pub description: Option<String>,
    /// Free-form metadata.
    pub metadata: Option<serde_json::Value>,
    /// Responsible person or team.
    pub maintainer: Option<String>,
    /// Labels.
    pub tags: Vec<String>,
}

/// One registered package file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageVersion {
    /// Row id.
    pub id: i64,
    /// Owning package.
    pub package_id: i64,
    /// Version string, unique per package.
    pub version: String,
    /// Full or delta.
    pub package_type: PackageType,
    /// Free text.
    pub description: Option<String>,
    /// Backing package file.
    pub file_path: PathBuf,
    /// Size of the backing file in bytes.
    pub file_size: u64,
    /// SHA-256 of the backing file.
    pub file_hash: String,
    /// Manifest read from the file at registration, if it was readable.
    pub manifest: Option<PackageManifest>,
    /// Operator supplied change log.
    pub change_log: Option<serde_json::Value>,
    /// Released to clients.
    pub is_published: bool,
    /// Scheduled for retention cleanup.
    pub is_deprecated: bool,
    /// Version a delta was built against.
    pub parent_version: Option<String>,
    /// Version a delta brings the client to.
    pub target_version: Option<String>,
    /// Times the file was handed out.
    pub download_count: u64,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl PackageVersion {
    /// The version a client is on after applying this package.
    pub fn resulting_version(&self) -> Option<&str> {
        match self.package_type {
            PackageType::Full => Some(&self.version),
            PackageType::Delta => self.target_version.as_deref(),
        }
    }
}

/// Request to register a package file as a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVersion {
    /// Owning package.
    pub package_id: i64,
    /// Version string.
    pub version: String,
    /// Full or delta.
    pub package_type: PackageType,
    /// Free text.
    pub description: Option<String>,
    /// Package file to register.
    pub file_path: PathBuf,
    /// Required for deltas.
    pub parent_version: Option<String>,
    /// Required for deltas.
    pub target_version: Option<String>,
    /// Operator supplied change log.
    pub change_log: Option<serde_json::Value>,
    /// Publish immediately.
    pub published: bool,
}

impl CreateVersion {
    /// A full version request.
    pub fn full(package_id: i64, version: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            package_id,
            version: version.into(),
            package_type: PackageType::Full,
            description: None,
            file_path: file_path.into(),
            parent_version: None,
            target_version: None,
            change_log: None,
            published: false,
        }
    }

    /// A delta version request.
    pub fn delta(
        package_id: i64,
        version: impl Into<String>,
        file_path: impl Into<PathBuf>,
        parent_version: impl Into<String>,
        target_version: impl Into<String>,
    ) -> Self {
        Self {
            package_type: PackageType::Delta,
            parent_version: Some(parent_version.into()),
            target_version: Some(target_version.into()),
            ..Self::full(package_id, version, file_path)
        }
    }
}

/// Reporting view of one version in a comparison range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    /// Version string.
    pub version: String,
    /// Full or delta.
    pub package_type: PackageType,
    /// File size in bytes.
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Released to clients.
    pub is_published: bool,
    /// Times the file was handed out.
    pub download_count: u64,
    /// Operator supplied change log.
    pub changes: Option<serde_json::Value>,
}

impl From<&PackageVersion> for VersionComparison {
    fn from(v: &PackageVersion) -> Self {
        Self {
            version: v.version.clone(),
            package_type: v.package_type,
            size: v.file_size,
            created_at: v.created_at,
            is_published: v.is_published,
            download_count: v.download_count,
            changes: v.change_log.clone(),
        }
    }
}

/// How an update path gets the client to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    /// Download the target's full package.
    Direct,
    /// Apply a chain of smaller packages.
    Incremental,
}

impl std::fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Incremental => "incremental",
        })
    }
}

/// Packages to apply, in order, to move a client to a target version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePath {
    /// Chosen strategy.
    pub strategy: UpdateStrategy,
    /// Versions to apply in order. Empty when already on the target.
    pub path: Vec<PackageVersion>,
    /// Bytes to transfer.
    pub total_size: u64,
}

/// What happened to one cleanup candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CleanupOutcome {
    /// File and record removed.
    Deleted,
    /// Left in place.
    Skipped {
        /// Why the item could not be removed.
        reason: String,
    },
}

/// One cleanup candidate and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupItem {
    /// Version string.
    pub version: String,
    /// Backing file.
    pub file_path: PathBuf,
    /// Result.
    pub outcome: CleanupOutcome,
}

/// Audit trail of a retention cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Every candidate beyond the retained ones, newest first.
    pub items: Vec<CleanupItem>,
}

impl CleanupReport {
    /// Number of versions actually deleted.
    pub fn deleted_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome == CleanupOutcome::Deleted)
            .count()
    }
}
