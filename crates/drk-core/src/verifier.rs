//! Package verification.
//!
//! Verification fails closed: the gates run in order (magic, manifest length,
//! manifest JSON, signature, layout) and the first failure rejects the package
//! before anything is decompressed or written.

use std::path::Path;

use drk_schema::{Container, PackageManifest, Sha256Digest, container};
use tracing::{debug, warn};

use crate::error::{PackageError, PackageResult};
use crate::signing::TrustedKey;

/// Read and parse a package's manifest without checking its signature.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, or
/// [`PackageError::Format`] if the header or manifest is malformed.
pub async fn read_manifest(path: &Path) -> PackageResult<PackageManifest> {
    let bytes = tokio::fs::read(path).await?;
    let (manifest_bytes, _) = container::split(&bytes)?;
    Ok(serde_json::from_slice(manifest_bytes).map_err(drk_schema::FormatError::from)?)
}

/// A package whose signature and layout have been checked.
///
/// Owns the raw bytes so blobs can be sliced without copying.
#[derive(Debug)]
pub struct VerifiedPackage {
    bytes: Vec<u8>,
    manifest: PackageManifest,
    data_start: usize,
}

impl VerifiedPackage {
    /// The verified manifest.
    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// The data section.
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.data_start..]
    }

    /// Decompress the entry at `index` and check it against its recorded hash.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Integrity`] naming the file if decompression
    /// fails or the size or hash differs from the manifest.
    pub fn extract(&self, index: usize) -> PackageResult<Vec<u8>> {
        let entry = self.manifest.file_entries.get(index).ok_or_else(|| {
            PackageError::Validation(format!("no file entry at index {index}"))
        })?;
        let blob = usize::try_from(entry.offset)
            .ok()
            .zip(entry.end().and_then(|end| usize::try_from(end).ok()))
            .and_then(|(start, end)| self.data().get(start..end))
            .ok_or_else(|| {
                PackageError::Integrity(format!("{}: blob lies outside the data section", entry.path))
            })?;

        let contents = if entry.compressed {
            let capacity = usize::try_from(entry.size.max(1)).map_err(|_| {
                PackageError::Integrity(format!("{}: declared size too large", entry.path))
            })?;
            zstd::bulk::decompress(blob, capacity).map_err(|e| {
                PackageError::Integrity(format!("{}: decompression failed: {e}", entry.path))
            })?
        } else {
            blob.to_vec()
        };

        if contents.len() as u64 != entry.size {
            return Err(PackageError::Integrity(format!(
                "{}: expected {} bytes, got {}",
                entry.path,
                entry.size,
                contents.len()
            )));
        }

        let actual = Sha256Digest::compute(&contents);
        let expected = self.manifest.hash_tree.get(&entry.path).unwrap_or(&entry.hash);
        if actual != *expected {
            return Err(PackageError::Integrity(format!(
                "{}: hash mismatch (expected {expected}, got {actual})",
                entry.path
            )));
        }
        Ok(contents)
    }
}

/// Checks packages against a trusted public key.
#[derive(Debug, Clone)]
pub struct PackageVerifier {
    key: TrustedKey,
}

impl PackageVerifier {
    /// Trust packages signed by the holder of `key`.
    pub fn new(key: TrustedKey) -> Self {
        Self { key }
    }

    /// The key packages must be signed with.
    pub fn trusted_key(&self) -> &TrustedKey {
        &self.key
    }

    /// Run every gate over raw package bytes.
    ///
    /// # Errors
    ///
    /// Returns the first failing gate as [`PackageError::Format`] or
    /// [`PackageError::Integrity`].
    pub fn inspect(&self, bytes: &[u8]) -> PackageResult<PackageManifest> {
        let parsed = Container::parse(bytes)?;
        parsed.ensure_canonical()?;
        self.key.verify_package(&parsed.manifest, parsed.data)?;
        parsed.manifest.validate_layout(parsed.data.len() as u64)?;
        Ok(parsed.manifest)
    }

    /// Read a package from disk and run every gate.
    ///
    /// # Errors
    ///
    /// Same as [`PackageVerifier::inspect`], plus I/O errors.
    pub async fn load(&self, path: &Path) -> PackageResult<VerifiedPackage> {
        let bytes = tokio::fs::read(path).await?;
        let manifest = self.inspect(&bytes)?;
        let data_start = bytes.len() - manifest.compressed_size as usize;
        Ok(VerifiedPackage {
            bytes,
            manifest,
            data_start,
        })
    }

    /// Whether the package at `path` is intact and signed by the trusted key.
    ///
    /// Content problems yield `Ok(false)`; nothing is decompressed.
    ///
    /// # Errors
    ///
    /// Only I/O failures (missing or unreadable file) are errors.
    pub async fn verify_package(&self, path: &Path) -> std::io::Result<bool> {
        debug!("Verifying {}", path.display());
        verdict(path, self.load(path).await.map(|_| ()))
    }

    /// Like [`PackageVerifier::verify_package`], and additionally decompress
    /// every blob in memory and check its hash.
    ///
    /// # Errors
    ///
    /// Only I/O failures are errors.
    pub async fn verify_package_deep(&self, path: &Path) -> std::io::Result<bool> {
        debug!("Deep verifying {}", path.display());
        let result = async {
            let package = self.load(path).await?;
            for index in 0..package.manifest().file_entries.len() {
                package.extract(index)?;
            }
            Ok::<(), PackageError>(())
        }
        .await;
        verdict(path, result)
    }
}

fn verdict(path: &Path, result: PackageResult<()>) -> std::io::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(PackageError::Io(e)) => Err(e),
        Err(e) => {
            warn!("Package {} rejected: {e}", path.display());
            Ok(false)
        }
    }
}
