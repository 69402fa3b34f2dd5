//! Ed25519 package signing.
//!
//! Keys are always supplied by the caller (configuration, secret store or an
//! explicit `drk keygen`). Nothing in this module invents a keypair behind the
//! caller's back, so a package built by one process verifies in any other
//! process that trusts the same public key.
//!
//! Keys travel as standard base64 of the raw 32 key bytes, matching the
//! format `drk keygen` prints and writes.

use std::path::Path;

use base64::Engine;
use drk_schema::PackageManifest;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;

use crate::error::{PackageError, PackageResult};

/// Message covered by a package signature: the manifest digest (signature
/// field blanked) followed by the data section.
fn signing_message(manifest: &PackageManifest, data: &[u8]) -> PackageResult<Vec<u8>> {
    let digest = manifest.signing_digest()?;
    let mut message = Vec::with_capacity(digest.len() + data.len());
    message.extend_from_slice(&digest);
    message.extend_from_slice(data);
    Ok(message)
}

fn decode_key_bytes(encoded: &str, what: &str) -> PackageResult<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| PackageError::Key(format!("{what} is not valid base64")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| PackageError::Key(format!("{what} must be 32 bytes, got {}", bytes.len())))
}

/// Holds the private half of the package keypair.
#[derive(Clone)]
pub struct PackageSigner {
    key: SigningKey,
}

impl std::fmt::Debug for PackageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageSigner")
            .field("public_key", &self.trusted_key().to_base64())
            .finish_non_exhaustive()
    }
}

impl PackageSigner {
    /// Wrap a raw 32-byte Ed25519 secret.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Decode a base64 secret key.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Key`] if the input is not base64 of 32 bytes.
    pub fn from_base64(encoded: &str) -> PackageResult<Self> {
        decode_key_bytes(encoded, "signing key").map(|bytes| Self::from_bytes(&bytes))
    }

    /// Load a base64 secret key from a file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`PackageError::Key`] if its contents are malformed.
    pub fn from_file(path: &Path) -> PackageResult<Self> {
        let encoded = std::fs::read_to_string(path)?;
        Self::from_base64(&encoded)
    }

    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::from_bytes(&secret)
    }

    /// Base64 encoding of the secret key, for writing to a key file.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.key.to_bytes())
    }

    /// The public half, for verifiers.
    pub fn trusted_key(&self) -> TrustedKey {
        TrustedKey {
            key: self.key.verifying_key(),
        }
    }

    /// Sign a package and return the hex-encoded detached signature.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Format`] if the manifest cannot be serialized.
    pub fn sign_package(&self, manifest: &PackageManifest, data: &[u8]) -> PackageResult<String> {
        let message = signing_message(manifest, data)?;
        Ok(hex::encode(self.key.sign(&message).to_bytes()))
    }
}

/// A public key that packages must be signed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedKey {
    key: VerifyingKey,
}

impl TrustedKey {
    /// Decode a base64 public key.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Key`] if the input is not base64 of a valid
    /// 32-byte Ed25519 point.
    pub fn from_base64(encoded: &str) -> PackageResult<Self> {
        let bytes = decode_key_bytes(encoded, "public key")?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| PackageError::Key("public key is not a valid Ed25519 point".into()))?;
        Ok(Self { key })
    }

    /// Base64 encoding of the public key.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.key.to_bytes())
    }

    /// Check a package's embedded signature against this key.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Integrity`] if the signature is malformed or
    /// does not match.
    pub fn verify_package(&self, manifest: &PackageManifest, data: &[u8]) -> PackageResult<()> {
        let raw = hex::decode(&manifest.signature)
            .map_err(|_| PackageError::Integrity("signature is not valid hex".into()))?;
        if hex::encode(&raw) != manifest.signature {
            return Err(PackageError::Integrity(
                "signature is not lowercase hex".into(),
            ));
        }
        let signature = Signature::from_slice(&raw)
            .map_err(|_| PackageError::Integrity("signature has the wrong length".into()))?;

        let message = signing_message(manifest, data)?;
        self.key
            .verify_strict(&message, &signature)
            .map_err(|_| PackageError::Integrity("signature does not match".into()))
    }
}
