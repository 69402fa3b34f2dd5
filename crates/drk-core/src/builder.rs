//! Package construction: collect, hash, compress, sign and frame.
//!
//! Both package types go through the same pipeline:
//!
//! 1. Walk the source directory (sorted, filtered by [`FileFilter`]) and hash
//!    every distributable file into the hash tree.
//! 2. For deltas, keep only files the base hash tree lacks or records with a
//!    different hash ([`DeltaComputer`]), and note base paths that vanished.
//! 3. Compress each kept file as its own zstd frame, appending it to the data
//!    section and recording `offset`/`compressedSize` in declaration order.
//! 4. Sign the manifest digest and data section, embed the hex signature.
//! 5. Frame `magic + length + manifest + data` and write it in one atomic
//!    rename, so a failed build never leaves a partial package behind.
//!
//! Steps 1-3 run on the blocking pool; they are CPU and disk bound.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use drk_schema::{
    FileEntry, ManifestMetadata, PackageManifest, PackageType, Sha256Digest, container,
};
use tracing::{debug, info};

use crate::collect::{DeltaComputer, FileFilter, collect_files};
use crate::error::{PackageError, PackageResult};
use crate::fsutil::write_atomic;
use crate::signing::PackageSigner;

/// Default zstd level: fast, and PDFs rarely compress much further anyway.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Caller-supplied description of the package being built.
#[derive(Debug, Clone, Default)]
pub struct BuildMetadata {
    /// Release version of the content, recorded as `manifest.version`.
    pub version: String,
    /// Publishing organisation.
    pub company: String,
    /// Target vessel, if the package is vessel specific.
    pub vessel: Option<String>,
    /// Human-readable description.
    pub description: String,
    /// Additional free-form metadata.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BuildMetadata {
    /// Metadata with only a version set.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }
}

/// What a successful build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Where the package was written.
    pub output: PathBuf,
    /// Full or delta.
    pub package_type: PackageType,
    /// Number of files carried.
    pub file_count: u64,
    /// Uncompressed bytes carried.
    pub total_size: u64,
    /// Length of the data section.
    pub compressed_size: u64,
    /// Size of the whole package file.
    pub package_size: u64,
}

/// Result of a delta build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// A delta package was written.
    Built(BuildSummary),
    /// The source tree matches the base; nothing was written.
    NoChanges,
}

/// Intermediate result of the blocking collection/compression pass.
struct Payload {
    entries: Vec<FileEntry>,
    hash_tree: BTreeMap<String, Sha256Digest>,
    removed: Vec<String>,
    data: Vec<u8>,
}

fn prepare_payload(
    source: &Path,
    filter: &FileFilter,
    level: i32,
    base: Option<&BTreeMap<String, Sha256Digest>>,
) -> PackageResult<Payload> {
    let delta = base.map(DeltaComputer::new);
    let mut entries = Vec::new();
    let mut hash_tree = BTreeMap::new();
    let mut data = Vec::new();

    for file in collect_files(source, filter)? {
        let contents = std::fs::read(&file.absolute)?;
        let hash = Sha256Digest::compute(&contents);
        hash_tree.insert(file.path.clone(), hash.clone());

        if delta.is_some_and(|d| !d.is_changed(&file.path, &hash)) {
            continue;
        }

        let blob = zstd::encode_all(contents.as_slice(), level)?;
        debug!(
            path = %file.path,
            size = contents.len(),
            compressed = blob.len(),
            "packed file"
        );
        entries.push(FileEntry {
            path: file.path,
            size: contents.len() as u64,
            hash,
            compressed: true,
            offset: data.len() as u64,
            compressed_size: blob.len() as u64,
        });
        data.extend_from_slice(&blob);
    }

    let removed = delta.map(|d| d.removed(&hash_tree)).unwrap_or_default();

    Ok(Payload {
        entries,
        hash_tree,
        removed,
        data,
    })
}

/// Builds signed full and delta packages.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    signer: PackageSigner,
    filter: FileFilter,
    compression_level: i32,
}

impl PackageBuilder {
    /// Create a builder that signs with `signer` and packages PDFs.
    pub fn new(signer: PackageSigner) -> Self {
        Self {
            signer,
            filter: FileFilter::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Replace the distributable file filter.
    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the zstd compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Package every distributable file under `source_dir`.
    ///
    /// An empty source directory yields a valid package with no files.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any file cannot be read or the output cannot
    /// be written; nothing is written in that case.
    pub async fn create_full_package(
        &self,
        source_dir: &Path,
        output_path: &Path,
        metadata: BuildMetadata,
    ) -> PackageResult<BuildSummary> {
        info!("Creating full package from {}", source_dir.display());
        let summary = self
            .build(source_dir, output_path, metadata, None)
            .await?
            .ok_or_else(|| PackageError::Validation("full package produced no output".into()))?;
        info!(
            "Package created: {} ({} files)",
            output_path.display(),
            summary.file_count
        );
        Ok(summary)
    }

    /// Package the files under `source_dir` that differ from `base`.
    ///
    /// Returns [`DeltaOutcome::NoChanges`] without writing anything when no
    /// file was added, changed or removed.
    ///
    /// # Errors
    ///
    /// Same as [`PackageBuilder::create_full_package`].
    pub async fn create_delta_package(
        &self,
        base: &PackageManifest,
        source_dir: &Path,
        output_path: &Path,
        metadata: BuildMetadata,
    ) -> PackageResult<DeltaOutcome> {
        info!(
            "Creating delta package from {} against {}",
            source_dir.display(),
            base.version
        );
        match self.build(source_dir, output_path, metadata, Some(base)).await? {
            Some(summary) => {
                info!(
                    "Delta package created: {} ({} changed files)",
                    output_path.display(),
                    summary.file_count
                );
                Ok(DeltaOutcome::Built(summary))
            }
            None => {
                info!("No changes detected, skipping delta creation");
                Ok(DeltaOutcome::NoChanges)
            }
        }
    }

    async fn build(
        &self,
        source_dir: &Path,
        output_path: &Path,
        metadata: BuildMetadata,
        base: Option<&PackageManifest>,
    ) -> PackageResult<Option<BuildSummary>> {
        let source = source_dir.to_path_buf();
        let filter = self.filter.clone();
        let level = self.compression_level;
        let base_tree = base.map(|b| b.hash_tree.clone());

        let payload = tokio::task::spawn_blocking(move || {
            prepare_payload(&source, &filter, level, base_tree.as_ref())
        })
        .await
        .map_err(std::io::Error::other)??;

        if base.is_some() && payload.entries.is_empty() && payload.removed.is_empty() {
            return Ok(None);
        }

        let package_type = if base.is_some() {
            PackageType::Delta
        } else {
            PackageType::Full
        };

        let mut manifest = PackageManifest {
            version: metadata.version,
            package_type,
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            total_size: payload.entries.iter().map(|e| e.size).sum(),
            compressed_size: payload.data.len() as u64,
            file_count: payload.entries.len() as u64,
            signature: String::new(),
            hash_tree: payload.hash_tree,
            file_entries: payload.entries,
            removed_paths: payload.removed,
            metadata: ManifestMetadata {
                company: metadata.company,
                vessel: metadata.vessel,
                description: metadata.description,
                base_version: base.map(|b| b.version.clone()),
                extra: metadata.extra,
            },
        };
        manifest.signature = self.signer.sign_package(&manifest, &payload.data)?;

        let bytes = container::encode(&manifest, &payload.data)?;
        let package_size = bytes.len() as u64;
        write_atomic(output_path, bytes).await?;

        Ok(Some(BuildSummary {
            output: output_path.to_path_buf(),
            package_type,
            file_count: manifest.file_count,
            total_size: manifest.total_size,
            compressed_size: manifest.compressed_size,
            package_size,
        }))
    }
}
