//! Filesystem helpers shared by the builder and the applier.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;

/// Recursively copy the contents of `src` into `dst`, creating `dst` if needed.
///
/// Uses `fs_extra` for robust recursive copying with overwrite semantics.
///
/// # Errors
///
/// Returns an error if any file or directory cannot be copied.
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    std::fs::create_dir_all(dst.as_ref())?;
    fs_extra::dir::copy(
        src,
        dst,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| anyhow::anyhow!("Copy failed: {e}"))?;
    Ok(())
}

/// [`copy_dir_all`] on the blocking pool, with errors surfaced as I/O errors.
pub(crate) async fn copy_dir_blocking(src: &Path, dst: &Path) -> std::io::Result<()> {
    let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || copy_dir_all(&src, &dst))
        .await
        .map_err(std::io::Error::other)?
        .map_err(std::io::Error::other)
}

/// Write `contents` to `path` so that readers never observe a partial file.
///
/// The bytes go to a uniquely named temporary sibling first and are renamed
/// into place. Concurrent writers to the same path each persist a complete
/// file; the last rename wins.
pub(crate) async fn write_atomic(path: &Path, contents: Vec<u8>) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent).await?;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut temp = tempfile::Builder::new()
            .prefix(".drk-write-")
            .tempfile_in(&parent)?;
        temp.write_all(&contents)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        Ok::<(), std::io::Error>(())
    })
    .await
    .map_err(std::io::Error::other)?
}

/// UTC timestamp suitable for file names, with millisecond resolution.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_dir_all_creates_destination() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("nested/a.pdf"), "a").unwrap();

        let dst = tempdir().unwrap();
        let target = dst.path().join("copy");
        copy_dir_all(src.path(), &target).unwrap();
        assert_eq!(std::fs::read(target.join("nested/a.pdf")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out/pkg.drkpack");
        write_atomic(&out, b"payload".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"payload");

        let names: Vec<_> = std::fs::read_dir(out.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_path() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("pkg.drkpack");
        let a = vec![b'a'; 64 * 1024];
        let b = vec![b'b'; 64 * 1024];

        let (ra, rb) = tokio::join!(write_atomic(&out, a.clone()), write_atomic(&out, b.clone()));
        ra.unwrap();
        rb.unwrap();

        let written = std::fs::read(&out).unwrap();
        assert!(written == a || written == b);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1, "leftover temp files: {names:?}");
    }
}
