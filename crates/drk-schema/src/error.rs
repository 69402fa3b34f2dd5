use thiserror::Error;

/// Structural problems with a package container or its manifest.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The first four bytes are not the DRK magic.
    #[error("Invalid package format: bad magic header")]
    BadMagic,

    /// The buffer ends before the header or the declared manifest does.
    #[error("Invalid package format: truncated ({0})")]
    Truncated(String),

    /// The manifest could not be (de)serialized.
    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The manifest is too large to frame with a 32-bit length.
    #[error("Manifest of {0} bytes does not fit the container header")]
    ManifestTooLarge(usize),

    /// Offsets, totals or hash tree disagree with each other.
    #[error("Invalid package layout: {0}")]
    Layout(String),

    /// A path would escape the extraction root.
    #[error("Unsafe path in package: {0}")]
    UnsafePath(String),
}
