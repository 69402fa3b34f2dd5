//! Source tree collection and change detection.
//!
//! The collector walks a source directory in a stable (file-name sorted)
//! order and yields every distributable file with its package-relative POSIX
//! path. [`DeltaComputer`] decides which of those files a delta must carry by
//! comparing content hashes against a base manifest's hash tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use drk_schema::{Sha256Digest, validate_relative_path};
use walkdir::WalkDir;

use crate::error::{PackageError, PackageResult};

/// Which files in a source tree are distributable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    /// Lowercase extensions without the dot. Empty means every file.
    extensions: Vec<String>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::new(["pdf"])
    }
}

impl FileFilter {
    /// Accept files whose extension (case-insensitive) is in `extensions`.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Accept every regular file.
    pub fn any() -> Self {
        Self {
            extensions: Vec::new(),
        }
    }

    /// Whether `path` should be packaged.
    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
    }
}

/// A distributable file found in the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Package-relative POSIX path.
    pub path: String,
    /// Location on disk.
    pub absolute: PathBuf,
}

/// Convert a path below the source root into a validated POSIX-style string.
fn relative_posix(root: &Path, path: &Path) -> PackageResult<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        PackageError::Validation(format!("{} is outside {}", path.display(), root.display()))
    })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            PackageError::Validation(format!("non UTF-8 path: {}", rel.display()))
        })?;
        parts.push(part);
    }
    let joined = parts.join("/");
    validate_relative_path(&joined)?;
    Ok(joined)
}

/// Walk `root` and return every file accepted by `filter`, sorted by path.
///
/// Symlinks are not followed.
///
/// # Errors
///
/// Returns an I/O error if the root or any directory below it cannot be read,
/// or a validation error for paths that cannot be represented in a manifest.
pub fn collect_files(root: &Path, filter: &FileFilter) -> PackageResult<Vec<SourceFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() || !filter.matches(entry.path()) {
            continue;
        }
        files.push(SourceFile {
            path: relative_posix(root, entry.path())?,
            absolute: entry.into_path(),
        });
    }
    Ok(files)
}

/// Compute the hash tree of a source directory without packaging it.
///
/// # Errors
///
/// Propagates collection and read errors.
pub fn hash_tree(root: &Path, filter: &FileFilter) -> PackageResult<BTreeMap<String, Sha256Digest>> {
    collect_files(root, filter)?
        .into_iter()
        .map(|file| -> PackageResult<(String, Sha256Digest)> {
            let digest = Sha256Digest::compute_file(&file.absolute)?;
            Ok((file.path, digest))
        })
        .collect()
}

/// Presence-and-equality diff against a base hash tree.
#[derive(Debug, Clone, Copy)]
pub struct DeltaComputer<'a> {
    base: &'a BTreeMap<String, Sha256Digest>,
}

impl<'a> DeltaComputer<'a> {
    /// Diff against `base`.
    pub fn new(base: &'a BTreeMap<String, Sha256Digest>) -> Self {
        Self { base }
    }

    /// A file must be shipped if the base lacks it or has different content.
    pub fn is_changed(&self, path: &str, hash: &Sha256Digest) -> bool {
        self.base.get(path) != Some(hash)
    }

    /// Paths present in the base but missing from `current`.
    pub fn removed(&self, current: &BTreeMap<String, Sha256Digest>) -> Vec<String> {
        self.base
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect()
    }
}
