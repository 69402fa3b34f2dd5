//! Package manifest: the JSON document framed ahead of a package's payload.
//!
//! The manifest describes every file carried in the data section (where its
//! compressed bytes live and what its content hash must be) plus a hash tree
//! of the complete distributable file set, which doubles as the base for
//! computing the next delta.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FormatError;
use crate::hash::Sha256Digest;

/// Whether a package carries the whole file set or only the changes since a
/// base version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    /// Complete distributable file set (`.drkpack`).
    Full,
    /// Files changed relative to a base manifest (`.drkdelta`).
    Delta,
}

impl PackageType {
    /// File extension conventionally used for this package type.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Full => "drkpack",
            Self::Delta => "drkdelta",
        }
    }

    /// Infer the package type from a file extension, if it is one of ours.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "drkpack" => Some(Self::Full),
            "drkdelta" => Some(Self::Delta),
            _ => None,
        }
    }

    /// Lowercase name as stored in manifests and the registry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PackageType {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "delta" => Ok(Self::Delta),
            other => Err(FormatError::Layout(format!("unknown package type '{other}'"))),
        }
    }
}

/// One file carried in a package's data section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// POSIX-style path relative to the package root.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// SHA-256 of the uncompressed content.
    pub hash: Sha256Digest,
    /// Whether the blob is zstd-compressed. Always true for packages we build.
    pub compressed: bool,
    /// Byte offset of the blob within the data section.
    #[serde(default)]
    pub offset: u64,
    /// Length of the blob within the data section.
    #[serde(default, rename = "compressedSize")]
    pub compressed_size: u64,
}

impl FileEntry {
    /// End of this entry's blob within the data section, if it does not
    /// overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.compressed_size)
    }
}

/// Free-form descriptive metadata carried in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Publishing organisation.
    #[serde(default)]
    pub company: String,
    /// Target installation (vessel) the package is prepared for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// For deltas: version of the manifest the delta was computed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<String>,
    /// Any other caller-supplied keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The manifest framed ahead of a package's data section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Release version of the packaged content.
    pub version: String,
    /// Full or delta.
    #[serde(rename = "type")]
    pub package_type: PackageType,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Sum of uncompressed entry sizes.
    pub total_size: u64,
    /// Length of the data section.
    pub compressed_size: u64,
    /// Number of entries in `file_entries`.
    pub file_count: u64,
    /// Hex Ed25519 signature, see [`PackageManifest::signing_digest`].
    pub signature: String,
    /// Path to content hash for the complete file set after this package is
    /// applied. For full packages this is exactly the set of entries.
    pub hash_tree: BTreeMap<String, Sha256Digest>,
    /// Entries in the order their blobs appear in the data section.
    pub file_entries: Vec<FileEntry>,
    /// For deltas: paths present in the base that no longer exist.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_paths: Vec<String>,
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: ManifestMetadata,
}

impl PackageManifest {
    /// Digest of the manifest with its signature field blanked.
    ///
    /// The signature covers this digest followed by the data section, so any
    /// change to the manifest's content (a hash, an offset, the metadata)
    /// invalidates it just like a change to the payload does.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Manifest`] if the manifest cannot be serialized.
    pub fn signing_digest(&self) -> Result<[u8; 32], FormatError> {
        let mut unsigned = self.clone();
        unsigned.signature.clear();
        let canonical = serde_json::to_vec(&unsigned)?;
        Ok(Sha256::digest(&canonical).into())
    }

    /// Check the structural invariants that extraction relies on.
    ///
    /// - every path is a safe relative path, with no duplicates
    /// - blobs are laid out in declaration order without overlap and lie
    ///   within a data section of `data_len` bytes
    /// - the declared totals agree with the entries
    /// - every entry's hash matches its hash-tree entry
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate_layout(&self, data_len: u64) -> Result<(), FormatError> {
        if self.file_count != self.file_entries.len() as u64 {
            return Err(FormatError::Layout(format!(
                "file_count is {} but {} entries are declared",
                self.file_count,
                self.file_entries.len()
            )));
        }
        if self.compressed_size != data_len {
            return Err(FormatError::Layout(format!(
                "compressed_size is {} but the data section holds {data_len} bytes",
                self.compressed_size
            )));
        }

        let mut cursor = 0u64;
        let mut total = 0u64;
        let mut seen = std::collections::HashSet::new();
        for entry in &self.file_entries {
            validate_relative_path(&entry.path)?;
            if !seen.insert(entry.path.as_str()) {
                return Err(FormatError::Layout(format!("duplicate entry {}", entry.path)));
            }
            if entry.offset < cursor {
                return Err(FormatError::Layout(format!(
                    "entry {} starts at {} before the previous blob ends at {cursor}",
                    entry.path, entry.offset
                )));
            }
            let end = entry
                .end()
                .filter(|end| *end <= data_len)
                .ok_or_else(|| {
                    FormatError::Layout(format!(
                        "entry {} extends past the data section",
                        entry.path
                    ))
                })?;
            cursor = end;
            total = total.saturating_add(entry.size);

            match self.hash_tree.get(&entry.path) {
                Some(expected) if *expected == entry.hash => {}
                _ => {
                    return Err(FormatError::Layout(format!(
                        "entry {} disagrees with the hash tree",
                        entry.path
                    )));
                }
            }
        }

        if total != self.total_size {
            return Err(FormatError::Layout(format!(
                "total_size is {} but entries sum to {total}",
                self.total_size
            )));
        }

        for path in self.hash_tree.keys().chain(self.removed_paths.iter()) {
            validate_relative_path(path)?;
        }

        Ok(())
    }
}

/// Reject paths that could escape the directory they are extracted into.
///
/// A valid path is relative, uses `/` separators, and contains only normal
/// components (no `..`, `.`, root, or drive prefix).
///
/// # Errors
///
/// Returns [`FormatError::UnsafePath`] naming the offending path.
pub fn validate_relative_path(path: &str) -> Result<(), FormatError> {
    let unsafe_path = || FormatError::UnsafePath(path.to_string());

    if path.is_empty() || path.contains('\\') || path.contains('\0') {
        return Err(unsafe_path());
    }
    if path.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(unsafe_path());
    }
    if !Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(unsafe_path());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, data: &[u8], offset: u64, compressed_size: u64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size: data.len() as u64,
            hash: Sha256Digest::compute(data),
            compressed: true,
            offset,
            compressed_size,
        }
    }

    fn manifest(entries: Vec<FileEntry>) -> PackageManifest {
        let hash_tree = entries
            .iter()
            .map(|e| (e.path.clone(), e.hash.clone()))
            .collect();
        PackageManifest {
            version: "1.0.0".to_string(),
            package_type: PackageType::Full,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            total_size: entries.iter().map(|e| e.size).sum(),
            compressed_size: entries.iter().map(|e| e.compressed_size).sum(),
            file_count: entries.len() as u64,
            signature: String::new(),
            hash_tree,
            file_entries: entries,
            removed_paths: Vec::new(),
            metadata: ManifestMetadata::default(),
        }
    }

    #[test]
    fn test_valid_layout() {
        let m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10), entry("docs/b.pdf", b"bb", 10, 5)]);
        assert!(m.validate_layout(15).is_ok());
    }

    #[test]
    fn test_overlapping_offsets_rejected() {
        let m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10), entry("b.pdf", b"bb", 8, 7)]);
        let err = m.validate_layout(15).unwrap_err();
        assert!(matches!(err, FormatError::Layout(_)));
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10)]);
        m.compressed_size = 9;
        assert!(m.validate_layout(9).is_err());

        let mut m = manifest(vec![entry("a.pdf", b"aaaa", u64::MAX, 10)]);
        m.compressed_size = 10;
        assert!(m.validate_layout(10).is_err());
    }

    #[test]
    fn test_hash_tree_disagreement_rejected() {
        let mut m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10)]);
        m.hash_tree
            .insert("a.pdf".to_string(), Sha256Digest::compute(b"other"));
        assert!(m.validate_layout(10).is_err());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let mut m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10)]);
        m.file_count = 2;
        assert!(m.validate_layout(10).is_err());
    }

    #[test]
    fn test_unsafe_paths() {
        for bad in ["", "/etc/passwd", "../up.pdf", "a/../../b.pdf", "a//b.pdf", "./a.pdf", "a\\b.pdf"] {
            assert!(validate_relative_path(bad).is_err(), "{bad} should be rejected");
        }
        for good in ["a.pdf", "manuals/engine/a.pdf", "a..b.pdf"] {
            assert!(validate_relative_path(good).is_ok(), "{good} should be accepted");
        }
    }

    #[test]
    fn test_unsafe_entry_path_fails_layout() {
        let m = manifest(vec![entry("../escape.pdf", b"x", 0, 4)]);
        assert!(matches!(m.validate_layout(4), Err(FormatError::UnsafePath(_))));
    }

    #[test]
    fn test_wire_field_names() {
        let m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10)]);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "full");
        assert_eq!(json["file_entries"][0]["compressedSize"], 10);
        assert!(json.get("removed_paths").is_none());
    }

    #[test]
    fn test_signing_digest_ignores_signature_only() {
        let mut m = manifest(vec![entry("a.pdf", b"aaaa", 0, 10)]);
        let before = m.signing_digest().unwrap();
        m.signature = "ff".repeat(64);
        assert_eq!(before, m.signing_digest().unwrap());

        m.metadata.description = "changed".to_string();
        assert_ne!(before, m.signing_digest().unwrap());
    }

    #[test]
    fn test_metadata_extra_round_trips() {
        let json = r#"{"company":"DORIKO","description":"d","region":"north"}"#;
        let meta: ManifestMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.extra["region"], "north");
        assert!(meta.vessel.is_none());
    }
}
