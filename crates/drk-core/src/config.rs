//! Runtime configuration: `DRK_HOME/config.toml` plus environment overrides.
//!
//! Key material is never generated here. The signer and trusted key come
//! from the environment, the config file, or the key file `drk keygen` wrote.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::builder::{DEFAULT_COMPRESSION_LEVEL, PackageBuilder};
use crate::collect::FileFilter;
use crate::paths;
use crate::signing::{PackageSigner, TrustedKey};
use crate::verifier::PackageVerifier;

/// Base64 Ed25519 secret key.
pub const ENV_SIGNING_KEY: &str = "DRK_SIGNING_KEY";
/// Base64 Ed25519 public key.
pub const ENV_PUBLIC_KEY: &str = "DRK_PUBLIC_KEY";
/// zstd level override.
pub const ENV_COMPRESSION_LEVEL: &str = "DRK_COMPRESSION_LEVEL";

/// Settings read from `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrkConfig {
    /// Where built packages live. Defaults to `DRK_HOME/packages`.
    pub packages_dir: Option<PathBuf>,
    /// Registry database. Defaults to `DRK_HOME/registry.db`.
    pub db_path: Option<PathBuf>,
    /// zstd level used when building.
    pub compression_level: Option<i32>,
    /// Distributable file extensions. Defaults to `["pdf"]`.
    pub extensions: Option<Vec<String>>,
    /// File holding the base64 signing key. Defaults to `DRK_HOME/drk.key`.
    pub signing_key_file: Option<PathBuf>,
    /// Base64 public key packages must be signed with.
    pub public_key: Option<String>,

    #[serde(skip)]
    env_signer: Option<PackageSigner>,
    #[serde(skip)]
    env_public_key: Option<String>,
}

impl DrkConfig {
    /// Load `path`, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load `DRK_HOME/config.toml` and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable config or malformed overrides.
    pub async fn from_env() -> Result<Self> {
        let mut config = Self::load(&paths::config_path()).await?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    ///
    /// # Errors
    ///
    /// Returns an error if an override is present but malformed.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup(ENV_COMPRESSION_LEVEL) {
            self.compression_level = Some(
                level
                    .trim()
                    .parse()
                    .with_context(|| format!("{ENV_COMPRESSION_LEVEL} must be an integer"))?,
            );
        }
        if let Some(secret) = lookup(ENV_SIGNING_KEY) {
            self.env_signer = Some(
                PackageSigner::from_base64(&secret)
                    .with_context(|| format!("{ENV_SIGNING_KEY} is invalid"))?,
            );
        }
        if let Some(public) = lookup(ENV_PUBLIC_KEY) {
            self.env_public_key = Some(public);
        }
        Ok(())
    }

    /// Directory packages are written to and listed from.
    pub fn packages_dir(&self) -> PathBuf {
        self.packages_dir.clone().unwrap_or_else(paths::packages_path)
    }

    /// Registry database location.
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(paths::db_path)
    }

    /// zstd compression level.
    pub fn compression_level(&self) -> i32 {
        self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }

    /// Distributable file filter.
    pub fn filter(&self) -> FileFilter {
        self.extensions
            .as_ref()
            .map_or_else(FileFilter::default, FileFilter::new)
    }

    fn key_file(&self) -> PathBuf {
        self.signing_key_file.clone().unwrap_or_else(paths::key_path)
    }

    /// The configured signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured or the key is malformed.
    pub fn signer(&self) -> Result<PackageSigner> {
        if let Some(signer) = &self.env_signer {
            return Ok(signer.clone());
        }
        let key_file = self.key_file();
        if !key_file.exists() {
            bail!(
                "No signing key configured. Run `drk keygen` or set {ENV_SIGNING_KEY} (looked for {})",
                key_file.display()
            );
        }
        PackageSigner::from_file(&key_file)
            .with_context(|| format!("Failed to load signing key from {}", key_file.display()))
    }

    /// The public key packages must be signed with.
    ///
    /// Falls back to the public half of the configured signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a public key nor a signing key is
    /// available, or if the configured key is malformed.
    pub fn trusted_key(&self) -> Result<TrustedKey> {
        if let Some(public) = self.env_public_key.as_ref().or(self.public_key.as_ref()) {
            return TrustedKey::from_base64(public).context("Invalid public key");
        }
        self.signer()
            .map(|s| s.trusted_key())
            .context("No public key configured")
    }

    /// A builder using the configured key, filter and compression level.
    ///
    /// # Errors
    ///
    /// Fails if no signing key is available.
    pub fn builder(&self) -> Result<PackageBuilder> {
        Ok(PackageBuilder::new(self.signer()?)
            .with_filter(self.filter())
            .with_compression_level(self.compression_level()))
    }

    /// A verifier trusting the configured public key.
    ///
    /// # Errors
    ///
    /// Fails if no key is available.
    pub fn verifier(&self) -> Result<PackageVerifier> {
        Ok(PackageVerifier::new(self.trusted_key()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = DrkConfig::load(&dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config.compression_level(), DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(config.filter(), FileFilter::default());
    }

    #[tokio::test]
    async fn test_parse_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "compression_level = 9\nextensions = [\"pdf\", \"txt\"]\npackages_dir = \"/srv/pkgs\"\n",
        )
        .unwrap();
        let config = DrkConfig::load(&path).await.unwrap();
        assert_eq!(config.compression_level(), 9);
        assert_eq!(config.packages_dir(), PathBuf::from("/srv/pkgs"));
        assert!(config.filter().matches(Path::new("a.txt")));
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "colour = \"blue\"\n").unwrap();
        assert!(DrkConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_overrides() {
        let signer = PackageSigner::generate();
        let env: HashMap<&str, String> = [
            (ENV_COMPRESSION_LEVEL, "5".to_string()),
            (ENV_SIGNING_KEY, signer.to_base64()),
        ]
        .into_iter()
        .collect();

        let mut config = DrkConfig::default();
        config.apply_overrides(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.compression_level(), 5);
        assert_eq!(config.trusted_key().unwrap(), signer.trusted_key());
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = DrkConfig::default();
        assert!(
            config
                .apply_overrides(|k| (k == ENV_COMPRESSION_LEVEL).then(|| "high".to_string()))
                .is_err()
        );
    }

    #[test]
    fn test_signer_without_key_names_keygen() {
        let dir = tempdir().unwrap();
        let config = DrkConfig {
            signing_key_file: Some(dir.path().join("absent.key")),
            ..DrkConfig::default()
        };
        let err = config.signer().unwrap_err().to_string();
        assert!(err.contains("drk keygen"));
    }
}
