//! Discovery of original images.
//!
//! Walks every configured originals root and returns the images whose
//! extension matches `image_extensions` (case-insensitively). Each image gets
//! an identity: its path relative to the root with `/` separators, prefixed
//! by the root's `prefix`. Identities are what cache keys and properties are
//! keyed on, so two roots producing the same identity is a configuration
//! error rather than something to resolve silently.

use crate::config::OriginalsSource;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("originals directory does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
    #[error("identity {identity:?} is produced by both {} and {}", first.display(), second.display())]
    DuplicateIdentity {
        identity: String,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalImage {
    pub identity: String,
    pub path: PathBuf,
}

/// `prefix` + root-relative path with `/` separators.
pub fn identity_for(prefix: &str, relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("{}{}", prefix, parts.join("/"))
}

fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Scan all roots, returning originals sorted by identity.
pub fn scan(
    sources: &[OriginalsSource],
    extensions: &[String],
) -> Result<Vec<OriginalImage>, ScanError> {
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut images = Vec::new();

    for source in sources {
        if !source.path.is_dir() {
            return Err(ScanError::MissingRoot(source.path.clone()));
        }

        for entry in WalkDir::new(&source.path)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| ScanError::Walk {
                root: source.path.clone(),
                source: e,
            })?;
            if !entry.file_type().is_file() || !has_image_extension(entry.path(), extensions) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&source.path) else {
                continue;
            };

            let identity = identity_for(&source.prefix, relative);
            let path = entry.into_path();
            if let Some(first) = seen.get(&identity) {
                return Err(ScanError::DuplicateIdentity {
                    identity,
                    first: first.clone(),
                    second: path,
                });
            }
            seen.insert(identity.clone(), path.clone());
            images.push(OriginalImage { identity, path });
        }
    }

    images.sort_by(|a, b| a.identity.cmp(&b.identity));
    log::debug!("found {} originals in {} roots", images.len(), sources.len());
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["jpg".into(), "png".into()]
    }

    fn source(path: &Path, prefix: &str) -> OriginalsSource {
        OriginalsSource {
            path: path.to_path_buf(),
            prefix: prefix.to_string(),
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn identity_uses_forward_slashes_and_prefix() {
        let rel: PathBuf = ["a", "b", "c.png"].iter().collect();
        assert_eq!(identity_for("", &rel), "a/b/c.png");
        assert_eq!(identity_for("walls/", &rel), "walls/a/b/c.png");
    }

    #[test]
    fn scan_filters_extensions_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("one.JPG"));
        touch(&tmp.path().join("sub/two.png"));
        touch(&tmp.path().join("notes.txt"));
        touch(&tmp.path().join(".properties.toml"));
        touch(&tmp.path().join("noext"));

        let images = scan(&[source(tmp.path(), "")], &exts()).unwrap();
        let ids: Vec<&str> = images.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["one.JPG", "sub/two.png"]);
        assert_eq!(images[1].path, tmp.path().join("sub/two.png"));
    }

    #[test]
    fn scan_merges_roots_with_prefixes() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        touch(&a.join("x.png"));
        touch(&b.join("x.png"));

        let images = scan(&[source(&a, "a/"), source(&b, "b/")], &exts()).unwrap();
        let ids: Vec<&str> = images.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["a/x.png", "b/x.png"]);
    }

    #[test]
    fn duplicate_identity_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        touch(&a.join("x.png"));
        touch(&b.join("x.png"));

        let err = scan(&[source(&a, ""), source(&b, "")], &exts()).unwrap_err();
        assert!(matches!(
            err,
            ScanError::DuplicateIdentity { ref identity, .. } if identity == "x.png"
        ));
    }

    #[test]
    fn missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = scan(&[source(&tmp.path().join("nope"), "")], &exts()).unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    #[test]
    fn empty_roots_yield_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(scan(&[source(tmp.path(), "")], &exts()).unwrap().is_empty());
        assert!(scan(&[], &exts()).unwrap().is_empty());
    }
}
