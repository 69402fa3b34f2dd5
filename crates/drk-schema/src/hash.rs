use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// A validated SHA-256 digest (64 lowercase hex characters).
///
/// Validation happens at deserialization time, so a manifest carrying a
/// malformed hash is rejected while it is parsed instead of surfacing later as
/// a confusing mismatch during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix and normalises them
    /// to lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            anyhow::bail!(
                "Invalid SHA256 digest: expected 64 hex characters, got {} in '{s}'",
                hex.len(),
            );
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Invalid SHA256 digest: contains non-hex characters in '{s}'");
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Compute the SHA-256 digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Compute the SHA-256 digest of a file by reading it entirely into memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::compute(&data))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Sha256Digest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_matches_known_vector() {
        let digest = Sha256Digest::compute(b"abc");
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn new_normalises_case_and_prefix() {
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let digest = Sha256Digest::new(format!("sha256:{upper}")).unwrap();
        assert_eq!(digest, Sha256Digest::compute(b"abc"));
    }

    #[test]
    fn new_rejects_bad_input() {
        assert!(Sha256Digest::new("abc123").is_err());
        assert!(Sha256Digest::new("z".repeat(64)).is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<Sha256Digest, _> = serde_json::from_str(&format!("\"{}\"", "0".repeat(64)));
        assert!(ok.is_ok());

        let bad: Result<Sha256Digest, _> = serde_json::from_str("\"not-a-hash\"");
        assert!(bad.is_err());
    }
}
