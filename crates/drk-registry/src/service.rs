//! Version management: registration, publishing, history, update paths and
//! retention cleanup.
//!
//! The store sits behind a [`std::sync::Mutex`] that is only held for the
//! synchronous SQLite calls. File reads, hashing and deletions happen with
//! the lock released.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use drk_schema::{PackageManifest, PackageType, Sha256Digest, container};
use tracing::{debug, info, warn};

use crate::db::RegistryDb;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{
    CleanupItem, CleanupOutcome, CleanupReport, CreateVersion, NewPackage, Package,
    PackageVersion, UpdatePath, VersionComparison,
};
use crate::planner;

/// Parse the manifest framed at the start of a package file.
fn extract_manifest(bytes: &[u8]) -> Result<PackageManifest, drk_schema::FormatError> {
    let (manifest_bytes, _) = container::split(bytes)?;
    Ok(serde_json::from_slice(manifest_bytes)?)
}

/// Tracks package versions and plans client updates.
#[derive(Debug)]
pub struct VersionManagementService {
    db: Mutex<RegistryDb>,
}

impl VersionManagementService {
    /// Serve from an open database.
    pub fn new(db: RegistryDb) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        Ok(Self::new(RegistryDb::open_at(path)?))
    }

    fn db(&self) -> RegistryResult<MutexGuard<'_, RegistryDb>> {
        self.db.lock().map_err(|_| RegistryError::Lock)
    }

    fn require_package(&self, package_id: i64) -> RegistryResult<Package> {
        self.db()?
            .get_package(package_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("package {package_id}")))
    }

    fn require_version(&self, package_id: i64, version: &str) -> RegistryResult<PackageVersion> {
        self.db()?
            .get_version(package_id, version)?
            .ok_or_else(|| RegistryError::NotFound(format!("version {version}")))
    }

    /// Register a package.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Conflict`] if the name is taken,
    /// [`RegistryError::Validation`] if the name is empty.
    pub async fn create_package(&self, new: NewPackage) -> RegistryResult<Package> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::Validation("package name is empty".into()));
        }
        let package = self.db()?.insert_package(&new)?;
        info!("Registered package {} ({})", package.name, package.id);
        Ok(package)
    }

    /// Look a package up by id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if it does not exist.
    pub async fn get_package(&self, package_id: i64) -> RegistryResult<Package> {
        self.require_package(package_id)
    }

    /// Look a package up by name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if it does not exist.
    pub async fn find_package(&self, name: &str) -> RegistryResult<Package> {
        self.db()?
            .find_package(name)?
            .ok_or_else(|| RegistryError::NotFound(format!("package '{name}'")))
    }

    /// All packages by name.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn list_packages(&self) -> RegistryResult<Vec<Package>> {
        self.db()?.list_packages()
    }

    /// Register a package file as a new version.
    ///
    /// The file is hashed and its manifest read on a best-effort basis: an
    /// unreadable manifest is stored as `None` rather than failing the call.
    /// Registering a newer full version advances the package's current
    /// version, and its latest stable version too if published at once.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`]: package, file or delta parent missing
    /// - [`RegistryError::Validation`]: delta without parent/target, or the
    ///   file's manifest declares the other package type
    /// - [`RegistryError::Conflict`]: the version already exists
    pub async fn create_version(&self, request: CreateVersion) -> RegistryResult<PackageVersion> {
        let package = self.require_package(request.package_id)?;

        if request.package_type == PackageType::Delta {
            let (Some(parent), Some(_)) = (&request.parent_version, &request.target_version)
            else {
                return Err(RegistryError::Validation(
                    "delta versions need both a parent and a target version".into(),
                ));
            };
            if self.db()?.get_version(package.id, parent)?.is_none() {
                return Err(RegistryError::NotFound(format!("parent version {parent}")));
            }
        }

        let bytes = match tokio::fs::read(&request.file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(format!(
                    "file {}",
                    request.file_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let file_hash = Sha256Digest::compute(&bytes);

        let manifest = match extract_manifest(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(
                    "Could not read manifest from {}: {e}",
                    request.file_path.display()
                );
                None
            }
        };
        if let Some(m) = &manifest {
            if m.package_type != request.package_type {
                return Err(RegistryError::Validation(format!(
                    "file is a {} package but a {} version was requested",
                    m.package_type, request.package_type
                )));
            }
        }

        let db = self.db()?;
        let created = db.insert_version(
            &request,
            bytes.len() as u64,
            file_hash.as_str(),
            manifest.as_ref(),
        )?;

        if created.package_type == PackageType::Full {
            db.advance_versions(package.id, &created.version, true, created.is_published)?;
        }

        info!(
            "Registered {} version {} of {}",
            created.package_type, created.version, package.name
        );
        Ok(created)
    }

    /// Look a version up.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if it does not exist.
    pub async fn get_version(&self, package_id: i64, version: &str) -> RegistryResult<PackageVersion> {
        self.require_version(package_id, version)
    }

    /// Mark a version as released. A newer full version becomes the latest
    /// stable version.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the version does not exist.
    pub async fn publish_version(&self, package_id: i64, version: &str) -> RegistryResult<PackageVersion> {
        let package = self.require_package(package_id)?;
        let record = self.require_version(package_id, version)?;

        let db = self.db()?;
        db.set_published(record.id, true)?;
        if record.package_type == PackageType::Full {
            db.advance_versions(package_id, version, false, true)?;
        }
        info!("Published {version} of {}", package.name);
        db.get_version(package_id, version)?
            .ok_or_else(|| RegistryError::NotFound(format!("version {version}")))
    }

    /// Mark a version for retention cleanup.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the version does not exist.
    pub async fn deprecate_version(&self, package_id: i64, version: &str) -> RegistryResult<PackageVersion> {
        let record = self.require_version(package_id, version)?;
        let db = self.db()?;
        db.set_deprecated(record.id, true)?;
        info!("Deprecated {version}");
        db.get_version(package_id, version)?
            .ok_or_else(|| RegistryError::NotFound(format!("version {version}")))
    }

    /// Every version of a package, newest first.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the package does not exist.
    pub async fn version_history(&self, package_id: i64) -> RegistryResult<Vec<PackageVersion>> {
        self.require_package(package_id)?;
        let mut versions = self.db()?.list_versions(package_id)?;
        versions.reverse();
        Ok(versions)
    }

    /// The versions registered between `from` and `to` inclusive, in
    /// creation order. The markers may be given in either order.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if either marker does not exist.
    pub async fn compare_versions(
        &self,
        package_id: i64,
        from: &str,
        to: &str,
    ) -> RegistryResult<Vec<VersionComparison>> {
        let versions = self.db()?.list_versions(package_id)?;
        let position = |marker: &str| {
            versions
                .iter()
                .position(|v| v.version == marker)
                .ok_or_else(|| RegistryError::NotFound(format!("version {marker}")))
        };
        let (a, b) = (position(from)?, position(to)?);
        Ok(versions[a.min(b)..=a.max(b)]
            .iter()
            .map(VersionComparison::from)
            .collect())
    }

    /// Deltas that land on `target_version`, in creation order.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get_delta_chain(
        &self,
        package_id: i64,
        target_version: &str,
    ) -> RegistryResult<Vec<PackageVersion>> {
        self.db()?.delta_chain(package_id, target_version)
    }

    /// The cheapest way to move a client from `current` to `target`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the package does not exist or no
    /// registered package reaches the target.
    pub async fn get_optimal_update_path(
        &self,
        package_id: i64,
        current: &str,
        target: &str,
    ) -> RegistryResult<UpdatePath> {
        self.require_package(package_id)?;
        let versions = self.db()?.list_versions(package_id)?;
        let path = planner::plan(current, target, &versions).ok_or_else(|| {
            RegistryError::NotFound(format!("no update path from {current} to {target}"))
        })?;
        debug!(
            "Update path {current} -> {target}: {} ({} bytes, {} packages)",
            path.strategy,
            path.total_size,
            path.path.len()
        );
        Ok(path)
    }

    /// Count one download of a version.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the version does not exist.
    pub async fn record_download(&self, package_id: i64, version: &str) -> RegistryResult<()> {
        if self.db()?.increment_downloads(package_id, version)? == 0 {
            return Err(RegistryError::NotFound(format!("version {version}")));
        }
        Ok(())
    }

    /// Delete all but the newest `keep` deprecated versions, file and record.
    ///
    /// Per-item failures are recorded in the report and do not stop the run.
    /// Versions that are not deprecated are never touched.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the package does not exist.
    pub async fn cleanup_old_versions(&self, package_id: i64, keep: usize) -> RegistryResult<CleanupReport> {
        self.require_package(package_id)?;
        let candidates = self.db()?.deprecated_versions(package_id)?;

        let mut report = CleanupReport::default();
        for version in candidates.into_iter().skip(keep) {
            let outcome = self.delete_version(&version).await;
            if let CleanupOutcome::Skipped { reason } = &outcome {
                warn!("Skipped cleanup of {}: {reason}", version.version);
            }
            report.items.push(CleanupItem {
                version: version.version,
                file_path: version.file_path,
                outcome,
            });
        }

        info!(
            "Cleanup removed {} of {} candidates",
            report.deleted_count(),
            report.items.len()
        );
        Ok(report)
    }

    async fn delete_version(&self, version: &PackageVersion) -> CleanupOutcome {
        match tokio::fs::remove_file(&version.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already gone", version.file_path.display());
            }
            Err(e) => {
                return CleanupOutcome::Skipped {
                    reason: format!("could not delete {}: {e}", version.file_path.display()),
                };
            }
        }

        let deleted = self.db().and_then(|db| db.delete_version(version.id));
        match deleted {
            Ok(_) => CleanupOutcome::Deleted,
            Err(e) => CleanupOutcome::Skipped {
                reason: format!("could not delete record: {e}"),
            },
        }
    }
}
