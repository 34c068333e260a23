//! Persistent pick-without-replacement over original identities.
//!
//! `random` draws one identity per monitor. Identities already shown are
//! remembered in a small JSON file so repeated invocations walk the whole
//! pool before anything comes up again; once everything was drawn a new cycle
//! starts. New originals join the undrawn side of the current cycle.
//!
//! ```json
//! { "version": 1, "drawn": ["a/sunset.jpg", "b/forest.png"] }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("selection database {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("selection database {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("selection database {} has unsupported version {version}", path.display())]
    Version { path: PathBuf, version: u32 },
    #[error("no originals to pick from")]
    EmptyPool,
}

/// Remembers what was drawn across invocations.
pub trait SelectionStore {
    /// Draw `n` identities from `pool`, distinct as long as the pool allows.
    /// When `n` exceeds the pool size the picks repeat in order.
    fn pick_unique(&mut self, pool: &[String], n: usize) -> Result<Vec<String>, SelectionError>;

    /// Forget drawn identities that are no longer in `pool`.
    fn compact(&mut self, pool: &[String]) -> Result<usize, SelectionError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    drawn: BTreeSet<String>,
}

/// [`SelectionStore`] persisted as JSON, rewritten atomically after each
/// change.
#[derive(Debug)]
pub struct JsonSelectionStore {
    path: PathBuf,
    drawn: BTreeSet<String>,
    rng: StdRng,
}

impl JsonSelectionStore {
    /// Open `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SelectionError> {
        Self::open_with_rng(path, StdRng::from_rng(&mut rand::rng()))
    }

    /// Deterministic picks for tests.
    pub fn with_seed(path: impl Into<PathBuf>, seed: u64) -> Result<Self, SelectionError> {
        Self::open_with_rng(path, StdRng::seed_from_u64(seed))
    }

    fn open_with_rng(path: impl Into<PathBuf>, rng: StdRng) -> Result<Self, SelectionError> {
        let path = path.into();
        let drawn = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let file: StoreFile =
                    serde_json::from_str(&content).map_err(|e| SelectionError::Corrupt {
                        path: path.clone(),
                        source: e,
                    })?;
                if file.version != FORMAT_VERSION {
                    return Err(SelectionError::Version {
                        path,
                        version: file.version,
                    });
                }
                file.drawn
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(SelectionError::Io { path, source: e }),
        };
        Ok(Self { path, drawn, rng })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn drawn(&self) -> impl Iterator<Item = &str> {
        self.drawn.iter().map(String::as_str)
    }

    fn save(&self) -> Result<(), SelectionError> {
        let io_err = |source| SelectionError::Io {
            path: self.path.clone(),
            source,
        };
        let file = StoreFile {
            version: FORMAT_VERSION,
            drawn: self.drawn.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| SelectionError::Corrupt {
            path: self.path.clone(),
            source: e,
        })?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl SelectionStore for JsonSelectionStore {
    fn pick_unique(&mut self, pool: &[String], n: usize) -> Result<Vec<String>, SelectionError> {
        let unique: BTreeSet<&String> = pool.iter().collect();
        if unique.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        let distinct = n.min(unique.len());
        let mut picked: Vec<String> = Vec::with_capacity(n);
        while picked.len() < distinct {
            let mut candidates: Vec<&String> = unique
                .iter()
                .copied()
                .filter(|id| !self.drawn.contains(*id) && !picked.contains(*id))
                .collect();
            if candidates.is_empty() {
                log::debug!("every original was shown, starting a new cycle");
                self.drawn.clear();
                candidates = unique
                    .iter()
                    .copied()
                    .filter(|id| !picked.contains(*id))
                    .collect();
            }
            let choice = candidates[self.rng.random_range(0..candidates.len())].clone();
            picked.push(choice);
        }
        self.drawn.extend(picked.iter().cloned());

        for i in distinct..n {
            let repeat = picked[i % distinct].clone();
            picked.push(repeat);
        }

        self.save()?;
        Ok(picked)
    }

    fn compact(&mut self, pool: &[String]) -> Result<usize, SelectionError> {
        let known: HashSet<&str> = pool.iter().map(String::as_str).collect();
        let before = self.drawn.len();
        self.drawn.retain(|id| known.contains(id.as_str()));
        let removed = before - self.drawn.len();
        if removed > 0 {
            log::debug!("dropped {} vanished originals from the selection store", removed);
            self.save()?;
        }
        Ok(removed)
    }
}
