//! Transactional package application.
//!
//! ```text
//! VERIFY -> BACKUP -> EXTRACT -> VALIDATE -> SWAP -> CLEANUP
//!              \__________ failure __________/
//!                           ROLLBACK
//! ```
//!
//! The new tree is assembled in a staging directory next to the target, so
//! the final swap is two renames on the same filesystem: the live tree moves
//! aside, the staged tree moves in. Readers see either the old tree or the
//! new one, never a mix.
//!
//! Applies to the same target must be serialized by the caller.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use drk_schema::{PackageType, Sha256Digest};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::{PackageError, PackageResult};
use crate::fsutil::{copy_dir_blocking, timestamp};
use crate::verifier::{PackageVerifier, VerifiedPackage};

const STAGING_PREFIX: &str = ".drk-apply-";
const BACKUP_MARKER: &str = ".backup-";

/// Outcome of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Version recorded in the applied manifest.
    pub version: String,
    /// Full or delta.
    pub package_type: PackageType,
    /// Files written from the package.
    pub files_written: usize,
    /// Files deleted because the delta removed them.
    pub files_removed: usize,
    /// Copy of the previous tree, if there was one.
    pub backup: Option<PathBuf>,
}

/// Applies verified packages to a document directory.
#[derive(Debug, Clone)]
pub struct PackageApplier {
    verifier: PackageVerifier,
}

impl PackageApplier {
    /// Apply only packages that `verifier` accepts.
    pub fn new(verifier: PackageVerifier) -> Self {
        Self { verifier }
    }

    /// Verify `package_path` and replace the contents of `target_dir` with it.
    ///
    /// A full package replaces the tree with exactly its file set. A delta
    /// overlays its files on the current tree, deletes the paths it removed,
    /// and then requires every untouched file to match its hash tree.
    ///
    /// # Errors
    ///
    /// Fails on verification, extraction, hash or swap errors. On failure the
    /// target is left as it was before the call.
    pub async fn apply_package(
        &self,
        package_path: &Path,
        target_dir: &Path,
    ) -> PackageResult<ApplyReport> {
        info!(
            "Applying {} to {}",
            package_path.display(),
            target_dir.display()
        );

        let package = self
            .verifier
            .load(package_path)
            .await
            .inspect_err(|e| error!("Package verification failed: {e}"))?;

        let parent = parent_dir(target_dir);
        fs::create_dir_all(&parent).await?;
        let had_target = fs::try_exists(target_dir).await?;
        let backup = if had_target {
            Some(create_backup(target_dir).await?)
        } else {
            None
        };

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)?;
        let tree = staging.path().join("tree");

        let result = async {
            let (written, removed) = stage(&package, target_dir, had_target, &tree).await?;
            swap_into_place(&tree, target_dir, &staging.path().join("previous")).await?;
            Ok::<_, PackageError>((written, removed))
        }
        .await;

        match result {
            Ok((files_written, files_removed)) => {
                let manifest = package.manifest();
                info!(
                    "Applied {} {} ({} written, {} removed)",
                    manifest.package_type, manifest.version, files_written, files_removed
                );
                Ok(ApplyReport {
                    version: manifest.version.clone(),
                    package_type: manifest.package_type,
                    files_written,
                    files_removed,
                    backup,
                })
            }
            Err(e) => {
                error!("Apply failed, rolling back: {e}");
                rollback(target_dir, backup.as_deref()).await;
                Err(e)
            }
        }
    }
}

/// Put a retained backup back in place of `target_dir`.
///
/// The backup itself is kept.
///
/// # Errors
///
/// Returns [`PackageError::Validation`] if the backup does not exist, or an
/// I/O error if copying or swapping fails.
pub async fn restore_backup(backup_dir: &Path, target_dir: &Path) -> PackageResult<()> {
    if !fs::try_exists(backup_dir).await? {
        return Err(PackageError::Validation(format!(
            "backup {} does not exist",
            backup_dir.display()
        )));
    }

    let parent = parent_dir(target_dir);
    fs::create_dir_all(&parent).await?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&parent)?;
    let tree = staging.path().join("tree");

    copy_dir_blocking(backup_dir, &tree).await?;
    swap_into_place(&tree, target_dir, &staging.path().join("previous")).await?;
    info!(
        "Restored {} from {}",
        target_dir.display(),
        backup_dir.display()
    );
    Ok(())
}

/// The most recent backup of `target_dir`, if any.
///
/// # Errors
///
/// Returns an I/O error if the parent directory cannot be read.
pub fn latest_backup(target_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let Some(name) = target_dir.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let prefix = format!("{name}{BACKUP_MARKER}");
    let parent = parent_dir(target_dir);
    if !parent.exists() {
        return Ok(None);
    }

    let mut backups = Vec::new();
    for entry in std::fs::read_dir(&parent)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) && entry.path().is_dir() {
            backups.push(entry.path());
        }
    }
    // Timestamps sort lexicographically.
    backups.sort();
    Ok(backups.pop())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

async fn create_backup(target_dir: &Path) -> PackageResult<PathBuf> {
    let name = target_dir
        .file_name()
        .map_or_else(|| "target".into(), |n| n.to_string_lossy());
    let backup = target_dir.with_file_name(format!("{name}{BACKUP_MARKER}{}", timestamp()));
    copy_dir_blocking(target_dir, &backup).await?;
    info!("Backup created: {}", backup.display());
    Ok(backup)
}

/// Build the new tree under `tree`. Returns `(written, removed)`.
async fn stage(
    package: &VerifiedPackage,
    target_dir: &Path,
    had_target: bool,
    tree: &Path,
) -> PackageResult<(usize, usize)> {
    let manifest = package.manifest();

    if manifest.package_type == PackageType::Delta && had_target {
        copy_dir_blocking(target_dir, tree).await?;
    } else {
        fs::create_dir_all(tree).await?;
    }

    for (index, entry) in manifest.file_entries.iter().enumerate() {
        let contents = package.extract(index)?;
        let dest = tree.join(&entry.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dest, &contents).await?;
        debug!("Extracted {}", entry.path);
    }

    let mut removed = 0;
    for path in &manifest.removed_paths {
        match fs::remove_file(tree.join(path)).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    // Files the package does not carry must already be right.
    let carried: HashSet<&str> = manifest
        .file_entries
        .iter()
        .map(|e| e.path.as_str())
        .collect();
    for (path, expected) in &manifest.hash_tree {
        if carried.contains(path.as_str()) {
            continue;
        }
        let actual = match fs::read(tree.join(path)).await {
            Ok(bytes) => Sha256Digest::compute(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PackageError::Integrity(format!(
                    "{path}: missing from the tree the package was built against"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if actual != *expected {
            return Err(PackageError::Integrity(format!(
                "{path}: hash mismatch against the package's base (expected {expected}, got {actual})"
            )));
        }
    }

    Ok((manifest.file_entries.len(), removed))
}

/// Move `target` to `aside` and `tree` to `target`.
///
/// If the second rename fails the first is undone.
async fn swap_into_place(tree: &Path, target: &Path, aside: &Path) -> std::io::Result<()> {
    let had_target = fs::try_exists(target).await?;
    if had_target {
        fs::rename(target, aside).await?;
    }
    if let Err(e) = fs::rename(tree, target).await {
        if had_target {
            if let Err(restore) = fs::rename(aside, target).await {
                error!("Could not move the previous tree back: {restore}");
                return Err(std::io::Error::other(format!(
                    "swap failed ({e}) and the previous tree could not be moved back ({restore})"
                )));
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Return `target_dir` to its pre-apply state after a failure.
async fn rollback(target_dir: &Path, backup: Option<&Path>) {
    let Some(backup) = backup else {
        return;
    };

    match fs::try_exists(target_dir).await {
        // The live tree was never replaced; the backup is redundant.
        Ok(true) => {
            if let Err(e) = fs::remove_dir_all(backup).await {
                warn!("Could not remove unused backup {}: {e}", backup.display());
            }
        }
        _ => {
            warn!("Restoring {} from {}", target_dir.display(), backup.display());
            if let Err(e) = copy_dir_blocking(backup, target_dir).await {
                error!(
                    "Rollback failed, backup kept at {}: {e}",
                    backup.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildMetadata, PackageBuilder};
    use crate::signing::PackageSigner;
    use std::fs as stdfs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_apply_into_missing_target() {
        let signer = PackageSigner::generate();
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        stdfs::create_dir_all(src.join("sub")).unwrap();
        stdfs::write(src.join("sub/a.pdf"), b"a").unwrap();
        let pkg = dir.path().join("p.drkpack");
        PackageBuilder::new(signer.clone())
            .create_full_package(&src, &pkg, BuildMetadata::new("1.0.0"))
            .await
            .unwrap();

        let target = dir.path().join("docs");
        let applier = PackageApplier::new(PackageVerifier::new(signer.trusted_key()));
        let report = applier.apply_package(&pkg, &target).await.unwrap();
        assert_eq!(report.files_written, 1);
        assert!(report.backup.is_none());
        assert_eq!(stdfs::read(target.join("sub/a.pdf")).unwrap(), b"a");

        // Only the target remains next to the package: staging is gone.
        let leftovers: Vec<_> = stdfs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_restore_backup_and_latest_backup() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("docs");
        stdfs::create_dir(&target).unwrap();
        stdfs::write(target.join("a.pdf"), b"old").unwrap();

        assert!(latest_backup(&target).unwrap().is_none());
        let backup = create_backup(&target).await.unwrap();
        assert_eq!(latest_backup(&target).unwrap(), Some(backup.clone()));

        stdfs::write(target.join("a.pdf"), b"new").unwrap();
        stdfs::write(target.join("b.pdf"), b"extra").unwrap();
        restore_backup(&backup, &target).await.unwrap();

        assert_eq!(stdfs::read(target.join("a.pdf")).unwrap(), b"old");
        assert!(!target.join("b.pdf").exists());
        assert!(backup.exists());
    }

    #[tokio::test]
    async fn test_restore_missing_backup_is_rejected() {
        let dir = tempdir().unwrap();
        let err = restore_backup(&dir.path().join("nope"), &dir.path().join("docs"))
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::Validation(_)));
    }
}
