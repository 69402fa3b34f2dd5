//! Update path planning.
//!
//! Versions are nodes. Every registered package is an edge weighted by its
//! file size:
//!
//! - a full package for `v` leads from any older version to `v`
//! - a delta with parent `p` and target `t` leads from any version `u` with
//!   `u >= p` and `u < t` to `t`
//!
//! Deprecated packages and packages landing beyond the target are ignored.
//! The direct full download of the target is weighed against the cheapest
//! path that avoids it (Dijkstra); the direct download wins ties.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use drk_schema::PackageType;
use drk_schema::version::{compare, is_newer, satisfies_minimum};

use crate::model::{PackageVersion, UpdatePath, UpdateStrategy};

/// Whether `record` takes a client on `from` to a newer version, and which.
fn edge_target<'a>(from: &str, record: &'a PackageVersion) -> Option<&'a str> {
    let to = record.resulting_version()?;
    if !is_newer(from, to) {
        return None;
    }
    match record.package_type {
        PackageType::Full => Some(to),
        PackageType::Delta => {
            let parent = record.parent_version.as_deref()?;
            satisfies_minimum(from, parent).then_some(to)
        }
    }
}

/// Cheapest sequence of `records` from `current` to `target` that does not
/// use a full package of `target` itself.
fn cheapest_chain<'a>(
    current: &str,
    target: &str,
    records: &[&'a PackageVersion],
) -> Option<(u64, Vec<&'a PackageVersion>)> {
    let mut nodes: Vec<&str> = vec![current];
    for record in records {
        if let Some(v) = record.resulting_version() {
            if !nodes.contains(&v) {
                nodes.push(v);
            }
        }
    }
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let goal = *index.get(target)?;

    let mut dist = vec![u64::MAX; nodes.len()];
    let mut prev: Vec<Option<(usize, &'a PackageVersion)>> = vec![None; nodes.len()];
    let mut heap = BinaryHeap::new();
    dist[0] = 0;
    heap.push(Reverse((0u64, 0usize)));

    while let Some(Reverse((cost, u))) = heap.pop() {
        if cost > dist[u] {
            continue;
        }
        if u == goal {
            break;
        }
        for &record in records {
            if record.package_type == PackageType::Full && record.version == target {
                continue;
            }
            let Some(v) = edge_target(nodes[u], record).and_then(|to| index.get(to).copied())
            else {
                continue;
            };
            let next = cost.saturating_add(record.file_size);
            if next < dist[v] {
                dist[v] = next;
                prev[v] = Some((u, record));
                heap.push(Reverse((next, v)));
            }
        }
    }

    if dist[goal] == u64::MAX {
        return None;
    }
    let mut path = Vec::new();
    let mut at = goal;
    while let Some((from, record)) = prev[at] {
        path.push(record);
        at = from;
    }
    path.reverse();
    Some((dist[goal], path))
}

/// Choose how to move a client from `current` to `target`.
///
/// Returns `None` if no registered package reaches the target.
pub fn plan(current: &str, target: &str, versions: &[PackageVersion]) -> Option<UpdatePath> {
    if current == target {
        return Some(UpdatePath {
            strategy: UpdateStrategy::Direct,
            path: Vec::new(),
            total_size: 0,
        });
    }

    let usable: Vec<&PackageVersion> = versions
        .iter()
        .filter(|v| !v.is_deprecated)
        .filter(|v| {
            v.resulting_version()
                .is_some_and(|to| compare(to, target).is_le())
        })
        .collect();

    let direct = usable
        .iter()
        .copied()
        .filter(|v| v.package_type == PackageType::Full && v.version == target)
        .min_by_key(|v| v.file_size);
    let chain = cheapest_chain(current, target, &usable);

    match (direct, chain) {
        (Some(full), Some((size, _))) if full.file_size <= size => Some(direct_path(full)),
        (Some(full), None) => Some(direct_path(full)),
        (_, Some((size, path))) => Some(UpdatePath {
            strategy: UpdateStrategy::Incremental,
            path: path.into_iter().cloned().collect(),
            total_size: size,
        }),
        (None, None) => None,
    }
}

fn direct_path(full: &PackageVersion) -> UpdatePath {
    UpdatePath {
        strategy: UpdateStrategy::Direct,
        path: vec![full.clone()],
        total_size: full.file_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(id: i64, version: &str, ty: PackageType, size: u64) -> PackageVersion {
        PackageVersion {
            id,
            package_id: 1,
            version: version.into(),
            package_type: ty,
            description: None,
            file_path: PathBuf::from(format!("/pkgs/{version}")),
            file_size: size,
            file_hash: String::new(),
            manifest: None,
            change_log: None,
            is_published: true,
            is_deprecated: false,
            parent_version: None,
            target_version: None,
            download_count: 0,
            created_at: id,
            updated_at: id,
        }
    }

    fn full(id: i64, version: &str, size: u64) -> PackageVersion {
        record(id, version, PackageType::Full, size)
    }

    fn delta(id: i64, name: &str, parent: &str, target: &str, size: u64) -> PackageVersion {
        PackageVersion {
            parent_version: Some(parent.into()),
            target_version: Some(target.into()),
            ..record(id, name, PackageType::Delta, size)
        }
    }

    fn versions(path: &UpdatePath) -> Vec<&str> {
        path.path.iter().map(|v| v.version.as_str()).collect()
    }

    #[test]
    fn test_direct_wins_ties() {
        let records = vec![full(1, "2.0.0", 100), delta(2, "d2", "1.0.0", "2.0.0", 100)];
        let path = plan("1.0.0", "2.0.0", &records).unwrap();
        assert_eq!(path.strategy, UpdateStrategy::Direct);
        assert_eq!(path.total_size, 100);
    }

    #[test]
    fn test_cheaper_delta_wins() {
        let records = vec![full(1, "2.0.0", 100), delta(2, "d2", "1.0.0", "2.0.0", 99)];
        let path = plan("1.0.0", "2.0.0", &records).unwrap();
        assert_eq!(path.strategy, UpdateStrategy::Incremental);
        assert_eq!(versions(&path), vec!["d2"]);
        assert_eq!(path.total_size, 99);
    }

    #[test]
    fn test_multi_hop_chain() {
        let records = vec![
            full(1, "1.2.0", 1000),
            delta(2, "d11", "1.0.0", "1.1.0", 10),
            delta(3, "d12", "1.1.0", "1.2.0", 20),
        ];
        let path = plan("1.0.0", "1.2.0", &records).unwrap();
        assert_eq!(path.strategy, UpdateStrategy::Incremental);
        assert_eq!(versions(&path), vec!["d11", "d12"]);
        assert_eq!(path.total_size, 30);
    }

    #[test]
    fn test_delta_requires_minimum_base() {
        let records = vec![delta(1, "d2", "1.5.0", "2.0.0", 1)];
        assert!(plan("1.0.0", "2.0.0", &records).is_none());
        assert!(plan("1.6.0", "2.0.0", &records).is_some());
    }

    #[test]
    fn test_only_full_is_direct() {
        let records = vec![full(1, "2.0.0", 500)];
        let path = plan("1.0.0", "2.0.0", &records).unwrap();
        assert_eq!(path.strategy, UpdateStrategy::Direct);
        assert_eq!(versions(&path), vec!["2.0.0"]);
    }

    #[test]
    fn test_deprecated_and_overshooting_records_ignored() {
        let mut old = delta(1, "d2", "1.0.0", "2.0.0", 1);
        old.is_deprecated = true;
        let beyond = full(2, "3.0.0", 1);
        assert!(plan("1.0.0", "2.0.0", &[old, beyond]).is_none());
    }

    #[test]
    fn test_same_version_is_empty_direct() {
        let path = plan("2.0.0", "2.0.0", &[]).unwrap();
        assert_eq!(path.strategy, UpdateStrategy::Direct);
        assert!(path.path.is_empty());
        assert_eq!(path.total_size, 0);
    }
}
