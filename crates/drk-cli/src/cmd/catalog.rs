//! List and stats commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use drk_core::{DrkConfig, list_packages, package_stats};

use crate::ui::{format_size, table};

async fn resolve_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(DrkConfig::from_env().await?.packages_dir()),
    }
}

/// List built packages, newest first.
pub async fn list(dir: Option<PathBuf>) -> Result<()> {
    let dir = resolve_dir(dir).await?;
    let packages = list_packages(&dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    if packages.is_empty() {
        println!("  no packages in {}", dir.display());
        return Ok(());
    }

    let mut t = table(["FILE", "TYPE", "SIZE", "MODIFIED"]);
    for p in &packages {
        t.add_row(vec![
            p.file_name.clone(),
            p.package_type.to_string(),
            format_size(p.size),
            p.modified
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        ]);
    }
    println!("{t}");
    Ok(())
}

/// Summarize built packages.
pub async fn stats(dir: Option<PathBuf>) -> Result<()> {
    let dir = resolve_dir(dir).await?;
    let stats = package_stats(&dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    println!("  directory:   {}", dir.display());
    println!("  packages:    {}", stats.total_packages);
    println!("  full:        {}", stats.full_packages);
    println!("  delta:       {}", stats.delta_packages);
    println!("  total size:  {}", format_size(stats.total_size));
    Ok(())
}
