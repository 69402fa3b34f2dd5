//! Registry behaviour against real package files.

use std::path::{Path, PathBuf};

use drk_core::{BuildMetadata, PackageBuilder, PackageSigner};
use drk_registry::{
    CleanupOutcome, CreateVersion, NewPackage, RegistryDb, RegistryError, UpdateStrategy,
    VersionManagementService,
};
use drk_schema::PackageType;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    svc: VersionManagementService,
    package_id: i64,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let db = RegistryDb::open_at(&dir.path().join("registry.db")).unwrap();
        let svc = VersionManagementService::new(db);
        let package = svc
            .create_package(NewPackage {
                name: "bridge-manuals".into(),
                category: "manuals".into(),
                maintainer: Some("docs team".into()),
                ..NewPackage::default()
            })
            .await
            .unwrap();
        Self {
            dir,
            svc,
            package_id: package.id,
        }
    }

    /// A file of exactly `size` bytes.
    fn blob(&self, name: &str, size: usize) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    async fn full(&self, version: &str, size: usize) {
        let file = self.blob(&format!("{version}.drkpack"), size);
        self.svc
            .create_version(CreateVersion::full(self.package_id, version, file))
            .await
            .unwrap();
    }

    async fn delta(&self, name: &str, parent: &str, target: &str, size: usize) {
        let file = self.blob(&format!("{name}.drkdelta"), size);
        self.svc
            .create_version(CreateVersion::delta(self.package_id, name, file, parent, target))
            .await
            .unwrap();
    }
}

async fn build_full(dir: &Path, version: &str) -> PathBuf {
    let src = dir.join(format!("src-{version}"));
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("A.pdf"), version.as_bytes()).unwrap();
    let out = dir.join(format!("{version}.drkpack"));
    PackageBuilder::new(PackageSigner::generate())
        .create_full_package(&src, &out, BuildMetadata::new(version))
        .await
        .unwrap();
    out
}

#[tokio::test]
async fn test_duplicate_version_rejected() {
    let fx = Fixture::new().await;
    fx.full("1.0.0", 10).await;
    let file = fx.blob("again.drkpack", 10);
    let err = fx
        .svc
        .create_version(CreateVersion::full(fx.package_id, "1.0.0", file))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)));
    assert!(err.is_bad_request());
    assert_eq!(fx.svc.version_history(fx.package_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manifest_is_extracted_and_type_checked() {
    let fx = Fixture::new().await;
    let pkg = build_full(fx.dir.path(), "1.0.0").await;
    let v = fx
        .svc
        .create_version(CreateVersion::full(fx.package_id, "1.0.0", &pkg))
        .await
        .unwrap();
    let manifest = v.manifest.expect("manifest should be stored");
    assert_eq!(manifest.version, "1.0.0");
    assert_eq!(manifest.package_type, PackageType::Full);

    let err = fx
        .svc
        .create_version(CreateVersion::delta(fx.package_id, "d1", &pkg, "1.0.0", "1.1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
}

#[tokio::test]
async fn test_delta_linkage_required() {
    let fx = Fixture::new().await;
    let file = fx.blob("d.drkdelta", 5);

    let mut request = CreateVersion::delta(fx.package_id, "d1", &file, "1.0.0", "1.1.0");
    request.target_version = None;
    let err = fx.svc.create_version(request).await.unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    let err = fx
        .svc
        .create_version(CreateVersion::delta(fx.package_id, "d1", &file, "1.0.0", "1.1.0"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "parent 1.0.0 does not exist yet: {err}");
}

#[tokio::test]
async fn test_current_and_stable_versions_advance() {
    let fx = Fixture::new().await;
    fx.full("1.0.0", 10).await;
    fx.full("0.9.0", 10).await;
    fx.full("1.10.0", 10).await;
    fx.delta("d2", "1.10.0", "2.0.0", 3).await;

    let pkg = fx.svc.get_package(fx.package_id).await.unwrap();
    assert_eq!(pkg.current_version.as_deref(), Some("1.10.0"));
    assert_eq!(pkg.latest_stable_version, None);

    fx.svc.publish_version(fx.package_id, "0.9.0").await.unwrap();
    let pkg = fx.svc.get_package(fx.package_id).await.unwrap();
    assert_eq!(pkg.latest_stable_version.as_deref(), Some("0.9.0"));

    fx.svc.publish_version(fx.package_id, "1.0.0").await.unwrap();
    let v = fx.svc.publish_version(fx.package_id, "0.9.0").await.unwrap();
    assert!(v.is_published);
    let pkg = fx.svc.get_package(fx.package_id).await.unwrap();
    assert_eq!(pkg.latest_stable_version.as_deref(), Some("1.0.0"));
    assert_eq!(pkg.current_version.as_deref(), Some("1.10.0"));

    // Publishing a delta never moves the stable pointer.
    fx.svc.publish_version(fx.package_id, "d2").await.unwrap();
    let pkg = fx.svc.get_package(fx.package_id).await.unwrap();
    assert_eq!(pkg.latest_stable_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_concurrent_registrations_keep_newest_current() {
    for _ in 0..20 {
        let fx = Fixture::new().await;
        fx.full("1.0.0", 10).await;
        let newer = fx.blob("2.0.0.drkpack", 10);
        let older = fx.blob("1.5.0.drkpack", 10);

        let (a, b) = tokio::join!(
            fx.svc
                .create_version(CreateVersion::full(fx.package_id, "2.0.0", newer)),
            fx.svc
                .create_version(CreateVersion::full(fx.package_id, "1.5.0", older)),
        );
        a.unwrap();
        b.unwrap();

        let pkg = fx.svc.get_package(fx.package_id).await.unwrap();
        assert_eq!(pkg.current_version.as_deref(), Some("2.0.0"));
    }
}

#[tokio::test]
async fn test_publish_does_not_rewind_current() {
    for _ in 0..20 {
        let fx = Fixture::new().await;
        fx.full("1.0.0", 10).await;
        let newer = fx.blob("2.0.0.drkpack", 10);

        let (published, created) = tokio::join!(
            fx.svc.publish_version(fx.package_id, "1.0.0"),
            fx.svc
                .create_version(CreateVersion::full(fx.package_id, "2.0.0", newer)),
        );
        published.unwrap();
        created.unwrap();

        let pkg = fx.svc.get_package(fx.package_id).await.unwrap();
        assert_eq!(pkg.current_version.as_deref(), Some("2.0.0"));
        assert_eq!(pkg.latest_stable_version.as_deref(), Some("1.0.0"));
    }
}

#[tokio::test]
async fn test_update_path_picks_cheaper_strategy() {
    let fx = Fixture::new().await;
    fx.full("1.0.0", 100).await;
    fx.full("2.0.0", 100).await;

    let path = fx
        .svc
        .get_optimal_update_path(fx.package_id, "1.0.0", "2.0.0")
        .await
        .unwrap();
    assert_eq!(path.strategy, UpdateStrategy::Direct);
    assert_eq!(path.total_size, 100);

    // Equal size: direct still wins.
    fx.delta("d-eq", "1.0.0", "2.0.0", 100).await;
    let path = fx
        .svc
        .get_optimal_update_path(fx.package_id, "1.0.0", "2.0.0")
        .await
        .unwrap();
    assert_eq!(path.strategy, UpdateStrategy::Direct);

    fx.delta("d-small", "1.0.0", "2.0.0", 40).await;
    let path = fx
        .svc
        .get_optimal_update_path(fx.package_id, "1.0.0", "2.0.0")
        .await
        .unwrap();
    assert_eq!(path.strategy, UpdateStrategy::Incremental);
    assert_eq!(path.total_size, 40);
    assert_eq!(path.path[0].version, "d-small");

    let chain = fx.svc.get_delta_chain(fx.package_id, "2.0.0").await.unwrap();
    let names: Vec<_> = chain.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(names, vec!["d-eq", "d-small"]);

    let err = fx
        .svc
        .get_optimal_update_path(fx.package_id, "1.0.0", "3.0.0")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_compare_versions_slices_creation_order() {
    let fx = Fixture::new().await;
    fx.full("1.0.0", 1).await;
    fx.full("1.1.0", 2).await;
    fx.full("1.2.0", 3).await;
    fx.full("1.3.0", 4).await;
    fx.svc.record_download(fx.package_id, "1.2.0").await.unwrap();

    let rows = fx
        .svc
        .compare_versions(fx.package_id, "1.2.0", "1.1.0")
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(names, vec!["1.1.0", "1.2.0"]);
    assert_eq!(rows[1].download_count, 1);
    assert_eq!(rows[1].size, 3);

    let err = fx
        .svc
        .compare_versions(fx.package_id, "1.0.0", "9.9.9")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_cleanup_keeps_newest_deprecated_only() {
    let fx = Fixture::new().await;
    for v in ["1.0.0", "1.1.0", "1.2.0", "1.3.0", "1.4.0"] {
        fx.full(v, 8).await;
    }
    for v in ["1.0.0", "1.1.0", "1.2.0", "1.3.0"] {
        fx.svc.deprecate_version(fx.package_id, v).await.unwrap();
    }
    // A record whose file is already gone still counts as deleted.
    std::fs::remove_file(fx.dir.path().join("1.0.0.drkpack")).unwrap();

    let report = fx.svc.cleanup_old_versions(fx.package_id, 1).await.unwrap();
    assert_eq!(report.deleted_count(), 3);
    assert!(report.items.iter().all(|i| i.outcome == CleanupOutcome::Deleted));

    let remaining: Vec<_> = fx
        .svc
        .version_history(fx.package_id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| (v.version, v.is_deprecated))
        .collect();
    assert_eq!(
        remaining,
        vec![("1.4.0".to_string(), false), ("1.3.0".to_string(), true)]
    );
    assert!(!fx.dir.path().join("1.1.0.drkpack").exists());
    assert!(fx.dir.path().join("1.3.0.drkpack").exists());

    // Keeping more than exist deletes nothing.
    let report = fx.svc.cleanup_old_versions(fx.package_id, 10).await.unwrap();
    assert!(report.items.is_empty());
}
