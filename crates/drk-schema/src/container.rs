//! Binary container framing.
//!
//! ```text
//! offset 0   4 bytes   magic "DRK\0"
//! offset 4   4 bytes   manifest length (u32 LE)
//! offset 8   N bytes   manifest JSON (UTF-8)
//! offset 8+N           data section: per-file zstd blobs, in entry order
//! ```

use crate::error::FormatError;
use crate::manifest::PackageManifest;

/// Magic bytes at the start of every package.
pub const MAGIC: [u8; 4] = *b"DRK\0";

/// Length of the fixed header (magic + manifest length).
pub const HEADER_LEN: usize = 8;

/// A parsed container borrowing from the raw package bytes.
#[derive(Debug)]
pub struct Container<'a> {
    /// Decoded manifest.
    pub manifest: PackageManifest,
    /// Raw manifest bytes as framed.
    pub manifest_bytes: &'a [u8],
    /// Everything after the manifest.
    pub data: &'a [u8],
}

impl<'a> Container<'a> {
    /// Split a package buffer into manifest and data section.
    ///
    /// Only the framing is checked here; call
    /// [`PackageManifest::validate_layout`] before trusting the offsets.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::BadMagic`], [`FormatError::Truncated`] or
    /// [`FormatError::Manifest`].
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FormatError> {
        let (manifest_bytes, data) = split(bytes)?;
        let manifest = serde_json::from_slice(manifest_bytes)?;
        Ok(Self {
            manifest,
            manifest_bytes,
            data,
        })
    }

    /// Require the framed manifest to be exactly the encoding [`encode`]
    /// produces for its parsed value.
    ///
    /// Parsing is lenient (whitespace, hex case), so without this check two
    /// different byte strings could carry the same signed manifest.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Layout`] if the bytes are not canonical.
    pub fn ensure_canonical(&self) -> Result<(), FormatError> {
        let canonical = serde_json::to_vec_pretty(&self.manifest)?;
        if canonical != self.manifest_bytes {
            return Err(FormatError::Layout(
                "manifest is not in canonical form".to_string(),
            ));
        }
        Ok(())
    }

    /// The data section blob for the entry at `index`.
    ///
    /// Returns `None` if the index or the entry's range is out of bounds.
    pub fn blob(&self, index: usize) -> Option<&'a [u8]> {
        let entry = self.manifest.file_entries.get(index)?;
        let start = usize::try_from(entry.offset).ok()?;
        let end = usize::try_from(entry.end()?).ok()?;
        self.data.get(start..end)
    }
}

/// Split raw bytes into `(manifest_bytes, data)` without decoding the manifest.
///
/// # Errors
///
/// Returns [`FormatError::BadMagic`] or [`FormatError::Truncated`].
pub fn split(bytes: &[u8]) -> Result<(&[u8], &[u8]), FormatError> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let len_bytes: [u8; 4] = bytes
        .get(4..HEADER_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| FormatError::Truncated("missing manifest length".to_string()))?;
    let manifest_len = u32::from_le_bytes(len_bytes) as usize;

    let manifest_end = HEADER_LEN
        .checked_add(manifest_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            FormatError::Truncated(format!(
                "manifest declares {manifest_len} bytes, {} available",
                bytes.len() - HEADER_LEN
            ))
        })?;

    Ok((&bytes[HEADER_LEN..manifest_end], &bytes[manifest_end..]))
}

/// Frame a manifest and data section into a complete package buffer.
///
/// # Errors
///
/// Returns [`FormatError::Manifest`] if serialization fails or
/// [`FormatError::ManifestTooLarge`] if it exceeds `u32::MAX` bytes.
pub fn encode(manifest: &PackageManifest, data: &[u8]) -> Result<Vec<u8>, FormatError> {
    let manifest_json = serde_json::to_vec_pretty(manifest)?;
    let manifest_len = u32::try_from(manifest_json.len())
        .map_err(|_| FormatError::ManifestTooLarge(manifest_json.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + manifest_json.len() + data.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&manifest_len.to_le_bytes());
    out.extend_from_slice(&manifest_json);
    out.extend_from_slice(data);
    Ok(out)
}
