//! Keygen command

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use drk_core::{PackageSigner, key_path};

/// Generate a signing keypair and write the secret half to a key file.
pub fn keygen(output: Option<PathBuf>, force: bool) -> Result<()> {
    let path = output.unwrap_or_else(key_path);
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to replace it",
            path.display()
        );
    }

    println!("  generating ed25519 keypair");
    let signer = PackageSigner::generate();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    write_secret(&path, signer.to_base64().as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!();
    println!("  public (distribute to verifiers as DRK_PUBLIC_KEY):");
    println!("  {}", signer.trusted_key().to_base64());
    println!();
    println!("  wrote {}", path.display());
    Ok(())
}

/// Write a key file readable by the owner only.
fn write_secret(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // `mode` only applies to new files; tighten a replaced one too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
}
