//! Registry commands

use anyhow::{Context, Result};
use drk_core::DrkConfig;
use drk_registry::{
    CleanupOutcome, CreateVersion, NewPackage, Package, PackageVersion, VersionManagementService,
};
use drk_schema::PackageType;
use tracing::debug;

use crate::RegistryCommands;
use crate::ui::{format_millis, format_size, table};

async fn open() -> Result<VersionManagementService> {
    let db_path = DrkConfig::from_env().await?.db_path();
    debug!("Opening registry at {}", db_path.display());
    VersionManagementService::open(&db_path)
        .with_context(|| format!("Failed to open registry at {}", db_path.display()))
}

async fn resolve(svc: &VersionManagementService, name: &str) -> Result<Package> {
    Ok(svc.find_package(name).await?)
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn versions_table(versions: &[PackageVersion]) -> comfy_table::Table {
    let mut t = table([
        "VERSION",
        "TYPE",
        "SIZE",
        "PUBLISHED",
        "DEPRECATED",
        "DOWNLOADS",
        "CREATED",
    ]);
    for v in versions {
        let kind = match (&v.parent_version, &v.target_version) {
            (Some(p), Some(t)) => format!("{} {p}->{t}", v.package_type),
            _ => v.package_type.to_string(),
        };
        t.add_row(vec![
            v.version.clone(),
            kind,
            format_size(v.file_size),
            yes_no(v.is_published).to_string(),
            yes_no(v.is_deprecated).to_string(),
            v.download_count.to_string(),
            format_millis(v.created_at),
        ]);
    }
    t
}

/// Dispatch a registry subcommand.
pub async fn run(command: RegistryCommands) -> Result<()> {
    let svc = open().await?;

    match command {
        RegistryCommands::AddPackage {
            name,
            category,
            description,
            maintainer,
            tags,
        } => {
            let package = svc
                .create_package(NewPackage {
                    name,
                    category,
                    description,
                    maintainer,
                    tags,
                    ..NewPackage::default()
                })
                .await?;
            println!("  registered {} (id {})", package.name, package.id);
        }
        RegistryCommands::Packages => {
            let packages = svc.list_packages().await?;
            if packages.is_empty() {
                println!("  no packages registered");
                return Ok(());
            }
            let mut t = table(["NAME", "CATEGORY", "CURRENT", "STABLE", "MAINTAINER"]);
            for p in packages {
                t.add_row(vec![
                    p.name,
                    p.category,
                    p.current_version.unwrap_or_else(|| "-".into()),
                    p.latest_stable_version.unwrap_or_else(|| "-".into()),
                    p.maintainer.unwrap_or_default(),
                ]);
            }
            println!("{t}");
        }
        RegistryCommands::AddVersion {
            package,
            version,
            file,
            parent,
            target,
            description,
            changes,
            publish,
        } => {
            let package = resolve(&svc, &package).await?;
            let change_log = changes
                .map(|c| serde_json::from_str(&c))
                .transpose()
                .context("--changes must be valid JSON")?;
            let package_type = if parent.is_some() || target.is_some() {
                PackageType::Delta
            } else {
                PackageType::Full
            };
            let created = svc
                .create_version(CreateVersion {
                    package_type,
                    description,
                    parent_version: parent,
                    target_version: target,
                    change_log,
                    published: publish,
                    ..CreateVersion::full(package.id, version, file)
                })
                .await?;
            println!(
                "  added {} {} {} ({})",
                package.name,
                created.package_type,
                created.version,
                format_size(created.file_size)
            );
            println!("  sha256 {}", created.file_hash);
        }
        RegistryCommands::Publish { package, version } => {
            let package = resolve(&svc, &package).await?;
            let v = svc.publish_version(package.id, &version).await?;
            println!("  published {} {}", package.name, v.version);
        }
        RegistryCommands::Deprecate { package, version } => {
            let package = resolve(&svc, &package).await?;
            let v = svc.deprecate_version(package.id, &version).await?;
            println!("  deprecated {} {}", package.name, v.version);
        }
        RegistryCommands::History { package } => {
            let package = resolve(&svc, &package).await?;
            let versions = svc.version_history(package.id).await?;
            if versions.is_empty() {
                println!("  no versions registered for {}", package.name);
            } else {
                println!("{}", versions_table(&versions));
            }
        }
        RegistryCommands::Compare { package, from, to } => {
            let package = resolve(&svc, &package).await?;
            let rows = svc.compare_versions(package.id, &from, &to).await?;
            let mut t = table(["VERSION", "TYPE", "SIZE", "PUBLISHED", "DOWNLOADS", "CHANGES"]);
            for row in rows {
                t.add_row(vec![
                    row.version,
                    row.package_type.to_string(),
                    format_size(row.size),
                    yes_no(row.is_published).to_string(),
                    row.download_count.to_string(),
                    row.changes.map(|c| c.to_string()).unwrap_or_default(),
                ]);
            }
            println!("{t}");
        }
        RegistryCommands::UpdatePath {
            package,
            current,
            target,
        } => {
            let package = resolve(&svc, &package).await?;
            let plan = svc
                .get_optimal_update_path(package.id, &current, &target)
                .await?;
            println!(
                "  {current} -> {target}: {} ({})",
                plan.strategy,
                format_size(plan.total_size)
            );
            if plan.path.is_empty() {
                println!("  already up to date");
            } else {
                println!("{}", versions_table(&plan.path));
            }
        }
        RegistryCommands::DeltaChain { package, target } => {
            let package = resolve(&svc, &package).await?;
            let chain = svc.get_delta_chain(package.id, &target).await?;
            if chain.is_empty() {
                println!("  no deltas lead to {target}");
            } else {
                println!("{}", versions_table(&chain));
            }
        }
        RegistryCommands::Download { package, version } => {
            let package = resolve(&svc, &package).await?;
            svc.record_download(package.id, &version).await?;
            let v = svc.get_version(package.id, &version).await?;
            println!(
                "  {} {} downloaded {} times",
                package.name, v.version, v.download_count
            );
        }
        RegistryCommands::Cleanup { package, keep } => {
            let package = resolve(&svc, &package).await?;
            let report = svc.cleanup_old_versions(package.id, keep).await?;
            for item in &report.items {
                match &item.outcome {
                    CleanupOutcome::Deleted => println!("  deleted {}", item.version),
                    CleanupOutcome::Skipped { reason } => {
                        println!("  skipped {}: {reason}", item.version);
                    }
                }
            }
            println!(
                "  removed {} of {} deprecated versions",
                report.deleted_count(),
                report.items.len()
            );
        }
    }
    Ok(())
}
