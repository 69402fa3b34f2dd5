//! Package commands: create, delta, verify, apply, rollback, inspect

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use drk_core::{
    BuildMetadata, DeltaOutcome, DrkConfig, PackageApplier, latest_backup, read_manifest,
    restore_backup,
};
use drk_schema::PackageType;

use crate::MetadataArgs;
use crate::ui::{format_size, table};

fn build_metadata(version: &str, meta: MetadataArgs) -> BuildMetadata {
    BuildMetadata {
        company: meta.company,
        vessel: meta.vessel,
        description: meta.description,
        ..BuildMetadata::new(version)
    }
}

/// Build a full package.
pub async fn create(
    source: &Path,
    version: &str,
    output: Option<PathBuf>,
    meta: MetadataArgs,
) -> Result<()> {
    let config = DrkConfig::from_env().await?;
    let builder = config.builder()?;
    let output = output.unwrap_or_else(|| {
        config
            .packages_dir()
            .join(format!("{version}.{}", PackageType::Full.extension()))
    });

    let summary = builder
        .create_full_package(source, &output, build_metadata(version, meta))
        .await
        .with_context(|| format!("Failed to build package from {}", source.display()))?;

    println!(
        "  created {} ({} files, {} -> {})",
        output.display(),
        summary.file_count,
        format_size(summary.total_size),
        format_size(summary.package_size)
    );
    Ok(())
}

/// Build a delta package against `base`.
pub async fn delta(
    base: &Path,
    source: &Path,
    version: &str,
    output: Option<PathBuf>,
    meta: MetadataArgs,
) -> Result<()> {
    let config = DrkConfig::from_env().await?;
    let builder = config.builder()?;
    let base_manifest = read_manifest(base)
        .await
        .with_context(|| format!("Failed to read base package {}", base.display()))?;
    let output = output.unwrap_or_else(|| {
        config.packages_dir().join(format!(
            "{}-{version}.{}",
            base_manifest.version,
            PackageType::Delta.extension()
        ))
    });

    let outcome = builder
        .create_delta_package(&base_manifest, source, &output, build_metadata(version, meta))
        .await
        .with_context(|| format!("Failed to build delta from {}", source.display()))?;

    match outcome {
        DeltaOutcome::Built(summary) => println!(
            "  created {} ({} changed files, {})",
            output.display(),
            summary.file_count,
            format_size(summary.package_size)
        ),
        DeltaOutcome::NoChanges => {
            println!("  no changes since {}, nothing written", base_manifest.version);
        }
    }
    Ok(())
}

/// Verify a package; fails if it is rejected.
pub async fn verify(package: &Path, deep: bool) -> Result<()> {
    let verifier = DrkConfig::from_env().await?.verifier()?;
    let ok = if deep {
        verifier.verify_package_deep(package).await
    } else {
        verifier.verify_package(package).await
    }
    .with_context(|| format!("Failed to read {}", package.display()))?;

    if !ok {
        bail!("{} failed verification", package.display());
    }
    println!("  ok {}", package.display());
    Ok(())
}

/// Apply a package to a directory.
pub async fn apply(package: &Path, target: &Path) -> Result<()> {
    let verifier = DrkConfig::from_env().await?.verifier()?;
    let report = PackageApplier::new(verifier)
        .apply_package(package, target)
        .await
        .with_context(|| {
            format!(
                "Failed to apply {} to {}",
                package.display(),
                target.display()
            )
        })?;

    println!(
        "  applied {} {} to {} ({} written, {} removed)",
        report.package_type,
        report.version,
        target.display(),
        report.files_written,
        report.files_removed
    );
    if let Some(backup) = report.backup {
        println!("  backup at {}", backup.display());
    }
    Ok(())
}

/// Restore a directory from a backup.
pub async fn rollback(target: &Path, backup: Option<PathBuf>) -> Result<()> {
    let backup = match backup {
        Some(b) => b,
        None => latest_backup(target)?
            .with_context(|| format!("No backup found for {}", target.display()))?,
    };
    restore_backup(&backup, target)
        .await
        .with_context(|| format!("Failed to restore {}", target.display()))?;
    println!("  restored {} from {}", target.display(), backup.display());
    Ok(())
}

/// Print a package's manifest.
pub async fn inspect(package: &Path, json: bool) -> Result<()> {
    let manifest = read_manifest(package)
        .await
        .with_context(|| format!("Failed to read {}", package.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("  version:     {}", manifest.version);
    println!("  type:        {}", manifest.package_type);
    println!("  created:     {}", manifest.created_at);
    if let Some(base) = &manifest.metadata.base_version {
        println!("  base:        {base}");
    }
    if !manifest.metadata.company.is_empty() {
        println!("  company:     {}", manifest.metadata.company);
    }
    if let Some(vessel) = &manifest.metadata.vessel {
        println!("  vessel:      {vessel}");
    }
    println!(
        "  files:       {} ({} -> {})",
        manifest.file_count,
        format_size(manifest.total_size),
        format_size(manifest.compressed_size)
    );
    println!("  tree:        {} paths", manifest.hash_tree.len());
    for path in &manifest.removed_paths {
        println!("  removes:     {path}");
    }

    if !manifest.file_entries.is_empty() {
        let mut t = table(["PATH", "SIZE", "COMPRESSED", "SHA256"]);
        for entry in &manifest.file_entries {
            t.add_row(vec![
                entry.path.clone(),
                format_size(entry.size),
                format_size(entry.compressed_size),
                entry.hash.as_str().chars().take(12).collect(),
            ]);
        }
        println!();
        println!("{t}");
    }
    Ok(())
}
