//! Listing of built packages in a packages directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use drk_schema::PackageType;
use serde::Serialize;
use tokio::fs;

/// One package file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageListing {
    /// File name, e.g. `manuals-1.2.0.drkpack`.
    pub file_name: String,
    /// Full path.
    pub path: PathBuf,
    /// Determined by the file extension.
    pub package_type: PackageType,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Totals over a packages directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    /// Number of package files.
    pub total_packages: usize,
    /// Full packages.
    pub full_packages: usize,
    /// Delta packages.
    pub delta_packages: usize,
    /// Combined size in bytes.
    pub total_size: u64,
}

/// List package files in `dir`, newest first. A missing directory is empty.
///
/// # Errors
///
/// Returns an I/O error if the directory exists but cannot be read.
pub async fn list_packages(dir: &Path) -> std::io::Result<Vec<PackageListing>> {
    let mut listings = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listings),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(package_type) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(PackageType::from_extension)
        else {
            continue;
        };
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        listings.push(PackageListing {
            file_name: entry.file_name().to_string_lossy().into_owned(),
            path,
            package_type,
            size: meta.len(),
            modified: meta.modified().map(DateTime::<Utc>::from)?,
        });
    }

    listings.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(listings)
}

/// Summarize the package files in `dir`.
///
/// # Errors
///
/// Same as [`list_packages`].
pub async fn package_stats(dir: &Path) -> std::io::Result<CatalogStats> {
    let listings = list_packages(dir).await?;
    let mut stats = CatalogStats {
        total_packages: listings.len(),
        ..CatalogStats::default()
    };
    for listing in &listings {
        match listing.package_type {
            PackageType::Full => stats.full_packages += 1,
            PackageType::Delta => stats.delta_packages += 1,
        }
        stats.total_size += listing.size;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_list_and_stats() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.drkpack"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("b.drkdelta"), vec![0u8; 4]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("dir.drkpack")).unwrap();

        let listings = list_packages(dir.path()).await.unwrap();
        assert_eq!(listings.len(), 2);

        let stats = package_stats(dir.path()).await.unwrap();
        assert_eq!(
            stats,
            CatalogStats {
                total_packages: 2,
                full_packages: 1,
                delta_packages: 1,
                total_size: 14,
            }
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let stats = package_stats(&dir.path().join("missing")).await.unwrap();
        assert_eq!(stats, CatalogStats::default());
    }
}
