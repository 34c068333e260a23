//! Incremental cache refresh over the whole originals pool.
//!
//! One unit of work per original, dispatched in batches onto a rayon pool.
//! Inside a unit the monitor targets are handled one after another so the
//! upscaled intermediate of the first monitor is reused by the rest:
//!
//! ```text
//! for each batch of originals (checked for cancellation first):
//!     par_iter over the batch:
//!         for each target:
//!             entry = cache path(identity, properties, target)
//!             mark entry valid
//!             fresh?          → cached
//!             budget spent?   → skipped
//!             otherwise       → render through the pipeline
//!     clear scratch once enough entries were produced
//! prune entries nobody marked (completed runs only)
//! ```
//!
//! Entries are marked valid before anything else happens to them, so an
//! original that fails to render or falls outside the `--limit` budget keeps
//! whatever entry it already had.

use crate::cache::{CacheLayout, CacheStats, is_stale};
use crate::config::{ProcessingConfig, effective_threads};
use crate::imaging::{ImageBackend, Pipeline, PipelineError, RenderOutcome, RenderRequest};
use crate::monitors::MonitorTarget;
use crate::originals::OriginalImage;
use crate::properties::PropertiesTable;
use crate::prune::{PruneError, PruneReport, prune};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cannot stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to clear scratch directory: {0}")]
    Scratch(std::io::Error),
    #[error(transparent)]
    Pipeline(PipelineError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Prune(#[from] PruneError),
}

/// Knobs for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub cleanup_threshold: usize,
    /// Maximum number of originals to (re)render. `None` is unlimited.
    pub limit: Option<i64>,
    pub threads: usize,
    /// Also prune buckets of monitors that are not connected.
    pub clean_monitors: bool,
}

impl SyncSettings {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            cleanup_threshold: config.cleanup_threshold,
            limit: None,
            threads: effective_threads(config),
            clean_monitors: false,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// Progress events streamed to the CLI while a sync runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started {
        originals: usize,
        targets: Vec<MonitorTarget>,
    },
    Rendered {
        identity: String,
        target: MonitorTarget,
        reused_intermediate: bool,
    },
    Failed {
        identity: String,
        error: String,
    },
    BatchFinished {
        done: usize,
        total: usize,
    },
    ScratchCleared {
        files: usize,
    },
    /// The `--limit` budget ran out; later stale entries are left as they are.
    LimitReached,
}

/// One original that could not be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFailure {
    pub identity: String,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub originals: usize,
    pub stats: CacheStats,
    pub failures: Vec<ImageFailure>,
    /// Every entry path that belongs in the cache after this run.
    pub valid: HashSet<PathBuf>,
    /// Set once pruning ran.
    pub pruned: Option<PruneReport>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Stopped by a signal. Finished entries stay; nothing was pruned.
    Cancelled(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> &SyncReport {
        match self {
            SyncOutcome::Completed(r) | SyncOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncOutcome::Cancelled(_))
    }
}

/// What a run works on.
#[derive(Debug, Clone, Copy)]
pub struct SyncInputs<'a> {
    pub layout: &'a CacheLayout,
    pub properties: &'a PropertiesTable,
    pub originals: &'a [OriginalImage],
    pub targets: &'a [MonitorTarget],
}

/// Shared state of one run. Lives only as long as the run.
struct SyncRun {
    valid: Mutex<HashSet<PathBuf>>,
    produced: AtomicUsize,
    remaining: AtomicI64,
    stats: Mutex<CacheStats>,
    failures: Mutex<Vec<ImageFailure>>,
    limit_reported: AtomicBool,
}

impl SyncRun {
    fn new(limit: Option<i64>) -> Self {
        Self {
            valid: Mutex::new(HashSet::new()),
            produced: AtomicUsize::new(0),
            remaining: AtomicI64::new(limit.unwrap_or(i64::MAX)),
            stats: Mutex::new(CacheStats::default()),
            failures: Mutex::new(Vec::new()),
            limit_reported: AtomicBool::new(false),
        }
    }

    fn mark_valid(&self, path: PathBuf) {
        self.valid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path);
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Claim one original from the budget. `false` once it is used up.
    fn take_budget(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::SeqCst) > 0
    }

    fn into_report(self, originals: usize) -> SyncReport {
        SyncReport {
            originals,
            stats: self
                .stats
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
            failures: self
                .failures
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
            valid: self.valid.into_inner().unwrap_or_else(PoisonError::into_inner),
            pruned: None,
        }
    }
}

struct Worker<'a, 'p, B: ImageBackend> {
    pipeline: &'a Pipeline<'p, B>,
    inputs: SyncInputs<'a>,
    run: &'a SyncRun,
    events: Option<&'a Sender<SyncEvent>>,
}

impl<B: ImageBackend> Worker<'_, '_, B> {
    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = self.events {
            tx.send(event).ok();
        }
    }

    fn process_original(&self, original: &OriginalImage) -> Result<(), SyncError> {
        if self.pipeline.cancel_token().is_cancelled() {
            return Ok(());
        }

        let mut budget_claimed = false;
        let mut rendering = true;

        for target in self.inputs.targets {
            let props = self
                .inputs
                .properties
                .lookup(&original.identity, target.aspect);
            let entry = self
                .inputs
                .layout
                .entry_path(&original.identity, &props, target);
            self.run.mark_valid(entry.clone());

            if !rendering {
                continue;
            }

            let stale = is_stale(&original.path, &entry).map_err(|e| SyncError::Stat {
                path: original.path.clone(),
                source: e,
            })?;
            if !stale {
                self.run.record(CacheStats::hit);
                continue;
            }

            if !budget_claimed {
                budget_claimed = true;
                if !self.run.take_budget() {
                    if !self.run.limit_reported.swap(true, Ordering::SeqCst) {
                        log::info!("render limit reached, leaving remaining entries stale");
                        self.emit(SyncEvent::LimitReached);
                    }
                    self.run.record(CacheStats::skip);
                    rendering = false;
                    continue;
                }
            }

            let request = RenderRequest::wallpaper(
                &original.path,
                &entry,
                target.dimensions(),
                props,
            );
            match self.pipeline.render(&request) {
                Ok(RenderOutcome::Rendered {
                    reused_intermediate,
                }) => {
                    self.run.produced.fetch_add(1, Ordering::SeqCst);
                    self.run.record(CacheStats::render);
                    self.emit(SyncEvent::Rendered {
                        identity: original.identity.clone(),
                        target: *target,
                        reused_intermediate,
                    });
                }
                Ok(RenderOutcome::Stopped) => return Ok(()),
                Err(e) if e.is_per_image() => {
                    log::warn!("skipping {}: {}", original.identity, e);
                    self.run.record(CacheStats::fail);
                    self.emit(SyncEvent::Failed {
                        identity: original.identity.clone(),
                        error: e.to_string(),
                    });
                    self.run
                        .failures
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(ImageFailure {
                            identity: original.identity.clone(),
                            path: original.path.clone(),
                            error: e.to_string(),
                        });
                    rendering = false;
                }
                Err(e) => return Err(SyncError::Pipeline(e)),
            }
        }
        Ok(())
    }
}

/// Bring every entry up to date. Does not prune.
pub fn run_sync<B: ImageBackend>(
    pipeline: &Pipeline<'_, B>,
    inputs: SyncInputs<'_>,
    settings: &SyncSettings,
    events: Option<&Sender<SyncEvent>>,
) -> Result<SyncOutcome, SyncError> {
    let cancel = pipeline.cancel_token();
    let run = SyncRun::new(settings.limit);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.threads.max(1))
        .build()?;
    let worker = Worker {
        pipeline,
        inputs,
        run: &run,
        events,
    };

    let total = inputs.originals.len();
    worker.emit(SyncEvent::Started {
        originals: total,
        targets: inputs.targets.to_vec(),
    });
    log::info!(
        "syncing {} originals for {} monitor resolutions",
        total,
        inputs.targets.len()
    );

    let mut done = 0;
    for batch in inputs.originals.chunks(settings.batch_size.max(1)) {
        if cancel.is_cancelled() {
            break;
        }
        pool.install(|| {
            batch
                .par_iter()
                .try_for_each(|original| worker.process_original(original))
        })?;
        done += batch.len();
        worker.emit(SyncEvent::BatchFinished { done, total });

        if run.produced.load(Ordering::SeqCst) > settings.cleanup_threshold {
            let files = pipeline
                .scratch()
                .partial_cleanup()
                .map_err(SyncError::Scratch)?;
            run.produced.store(0, Ordering::SeqCst);
            worker.emit(SyncEvent::ScratchCleared { files });
        }
    }

    let report = run.into_report(total);
    if cancel.is_cancelled() {
        log::info!("sync cancelled after {} of {} originals", done, total);
        Ok(SyncOutcome::Cancelled(report))
    } else {
        Ok(SyncOutcome::Completed(report))
    }
}

/// Full cycle: bring entries up to date, then prune if the run completed.
pub fn sync_cache<B: ImageBackend>(
    pipeline: &Pipeline<'_, B>,
    inputs: SyncInputs<'_>,
    settings: &SyncSettings,
    events: Option<&Sender<SyncEvent>>,
) -> Result<SyncOutcome, SyncError> {
    let mut outcome = run_sync(pipeline, inputs, settings, events)?;
    if let SyncOutcome::Completed(report) = &mut outcome {
        report.pruned = Some(prune(
            inputs.layout,
            &report.valid,
            inputs.targets,
            settings.clean_monitors,
        )?);
    }
    Ok(outcome)
}
