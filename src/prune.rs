//! Mark-and-sweep removal of cache entries no original produces any more.
//!
//! The sync run marks every entry path it computes; after a completed run
//! everything else inside a bucket is garbage. Only files that look like
//! entries (`<bucket>/<name>.png`, regular files) are considered. In-flight
//! `-wip` files, anything outside a `WxH` bucket and anything nested deeper
//! are left alone.
//!
//! Buckets of monitors that are not connected right now are kept unless the
//! caller asks for them to be cleaned too, so unplugging a screen does not
//! throw away its wallpapers.

use crate::cache::{CacheLayout, ENTRY_EXTENSION, parse_bucket};
use crate::imaging::Dimensions;
use crate::monitors::MonitorTarget;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PruneError {
    #[error("failed to walk cache {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Entry files deleted, in walk order.
    pub removed: Vec<PathBuf>,
    /// Bucket directories deleted because they ended up empty.
    pub removed_buckets: Vec<PathBuf>,
    pub kept: usize,
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

/// Delete entries under `layout` that are not in `valid`.
pub fn prune(
    layout: &CacheLayout,
    valid: &HashSet<PathBuf>,
    targets: &[MonitorTarget],
    clean_monitors: bool,
) -> Result<PruneReport, PruneError> {
    let root = layout.root();
    let mut report = PruneReport::default();
    if !root.is_dir() {
        return Ok(report);
    }

    let connected: HashSet<Dimensions> = targets.iter().map(|t| t.dimensions()).collect();
    let walk_err = |source| PruneError::Walk {
        root: root.to_path_buf(),
        source,
    };

    let mut buckets = BTreeSet::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(walk_err)?;
        let Some(bucket) = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(|rel| rel.components().next())
            .and_then(|c| parse_bucket(&c.as_os_str().to_string_lossy()))
        else {
            continue;
        };
        if !clean_monitors && !connected.contains(&bucket) {
            continue;
        }

        if entry.depth() == 1 {
            if entry.file_type().is_dir() {
                buckets.insert(entry.into_path());
            }
            continue;
        }
        if !entry.file_type().is_file() || !is_entry_file(entry.path()) {
            continue;
        }

        if valid.contains(entry.path()) {
            report.kept += 1;
            continue;
        }
        let path = entry.into_path();
        log::debug!("pruning {}", path.display());
        std::fs::remove_file(&path).map_err(|e| PruneError::Remove {
            path: path.clone(),
            source: e,
        })?;
        report.removed.push(path);
    }

    for bucket in buckets {
        let empty = std::fs::read_dir(&bucket)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            std::fs::remove_dir(&bucket).map_err(|e| PruneError::Remove {
                path: bucket.clone(),
                source: e,
            })?;
            report.removed_buckets.push(bucket);
        }
    }

    if !report.removed.is_empty() {
        log::info!(
            "pruned {} stale entries, {} empty buckets",
            report.removed.len(),
            report.removed_buckets.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::AspectRatios;
    use crate::test_helpers::touch;
    use tempfile::TempDir;

    fn fhd() -> Vec<MonitorTarget> {
        vec![AspectRatios::new().target(1920, 1080)]
    }

    #[test]
    fn removes_unmarked_entries_only() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path());
        let keep = tmp.path().join("1920x1080/keep.png");
        let stale = tmp.path().join("1920x1080/stale.png");
        touch(&keep);
        touch(&stale);
        let valid: HashSet<PathBuf> = [keep.clone()].into();

        let report = prune(&layout, &valid, &fhd(), false).unwrap();
        assert_eq!(report.removed, vec![stale.clone()]);
        assert_eq!(report.kept, 1);
        assert!(keep.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn leaves_wip_and_foreign_files_alone() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path());
        let wip = tmp.path().join("1920x1080/abc.png-wip");
        let note = tmp.path().join("1920x1080/notes.txt");
        let loose = tmp.path().join("loose.png");
        let other_dir = tmp.path().join("thumbnails/x.png");
        let nested = tmp.path().join("1920x1080/sub/deep.png");
        for p in [&wip, &note, &loose, &other_dir, &nested] {
            touch(p);
        }

        let report = prune(&layout, &HashSet::new(), &fhd(), false).unwrap();
        assert!(report.removed.is_empty());
        for p in [&wip, &note, &loose, &other_dir, &nested] {
            assert!(p.exists(), "{} was removed", p.display());
        }
    }

    #[test]
    fn disconnected_buckets_need_clean_monitors() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path());
        let old = tmp.path().join("1280x1024/old.png");
        touch(&old);

        prune(&layout, &HashSet::new(), &fhd(), false).unwrap();
        assert!(old.exists());

        let report = prune(&layout, &HashSet::new(), &fhd(), true).unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.removed_buckets, vec![tmp.path().join("1280x1024")]);
        assert!(!tmp.path().join("1280x1024").exists());
    }

    #[test]
    fn non_canonical_bucket_names_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path());
        let odd = tmp.path().join("01920x1080/a.png");
        touch(&odd);

        prune(&layout, &HashSet::new(), &fhd(), true).unwrap();
        assert!(odd.exists());
    }

    #[test]
    fn bucket_with_leftovers_is_kept() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path());
        touch(&tmp.path().join("1920x1080/gone.png"));
        touch(&tmp.path().join("1920x1080/gone.png-wip"));

        let report = prune(&layout, &HashSet::new(), &fhd(), false).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(report.removed_buckets.is_empty());
        assert!(tmp.path().join("1920x1080").is_dir());
    }

    #[test]
    fn missing_root_is_empty_report() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path().join("nope"));
        let report = prune(&layout, &HashSet::new(), &fhd(), true).unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
