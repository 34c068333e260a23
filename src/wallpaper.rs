//! Applying wallpapers: the `random` and `preview` flows.
//!
//! Both flows end in a [`WallpaperSetter`] call with one image per monitor,
//! in monitor order. The shipped [`CommandSetter`] appends the paths to a
//! configured command line, which fits `feh --bg-fill a.png b.png` and most
//! other X11 setters.
//!
//! `random` serves from the cache, rendering any entry that is missing or
//! stale on the spot. `preview` never touches the cache: it renders into the
//! scratch directory with properties given on the command line, so a crop can
//! be tried out before it is written to `.properties.toml`.

use crate::cache::{CacheLayout, is_stale};
use crate::imaging::{ImageBackend, Pipeline, PipelineError, RenderOutcome, RenderRequest};
use crate::monitors::{Monitor, MonitorHandle, MonitorTarget};
use crate::originals::OriginalImage;
use crate::properties::{ImageProperties, PropertiesTable};
use crate::selection::{SelectionError, SelectionStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetterError {
    #[error("wallpaper command is empty")]
    EmptyCommand,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum WallpaperError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Render(#[from] PipelineError),
    #[error(transparent)]
    Setter(#[from] SetterError),
    #[error("cannot stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("picked identity {0:?} is not a known original")]
    UnknownIdentity(String),
    #[error("no monitors to set")]
    NoMonitors,
    #[error("cancelled")]
    Cancelled,
}

/// One image per monitor, in monitor order.
pub type Assignment = Vec<(MonitorHandle, PathBuf)>;

pub trait WallpaperSetter {
    fn set(&self, assignment: &[(MonitorHandle, PathBuf)]) -> Result<(), SetterError>;
}

/// Runs `command[0] command[1..] path...`.
#[derive(Debug, Clone)]
pub struct CommandSetter {
    command: Vec<String>,
}

impl CommandSetter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn command_line(&self, assignment: &[(MonitorHandle, PathBuf)]) -> Vec<String> {
        let mut line = self.command.clone();
        line.extend(
            assignment
                .iter()
                .map(|(_, path)| path.to_string_lossy().into_owned()),
        );
        line
    }
}

impl WallpaperSetter for CommandSetter {
    fn set(&self, assignment: &[(MonitorHandle, PathBuf)]) -> Result<(), SetterError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(SetterError::EmptyCommand);
        };
        log::debug!("{:?}", self.command_line(assignment));

        let output = Command::new(program)
            .args(args)
            .args(assignment.iter().map(|(_, path)| path.as_os_str()))
            .output()
            .map_err(|source| SetterError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SetterError::Failed {
                program: program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn render_or_stop<B: ImageBackend>(
    pipeline: &Pipeline<'_, B>,
    request: &RenderRequest,
) -> Result<(), WallpaperError> {
    match pipeline.render(request)? {
        RenderOutcome::Rendered { .. } => Ok(()),
        RenderOutcome::Stopped => Err(WallpaperError::Cancelled),
    }
}

/// Cache state the `random` flow reads from.
#[derive(Debug, Clone, Copy)]
pub struct RandomInputs<'a> {
    pub layout: &'a CacheLayout,
    pub properties: &'a PropertiesTable,
    pub originals: &'a [OriginalImage],
    pub monitors: &'a [Monitor],
}

/// Pick an original per monitor, make sure its entry is current and apply.
pub fn apply_random<B, S, W>(
    pipeline: &Pipeline<'_, B>,
    inputs: RandomInputs<'_>,
    store: &mut S,
    setter: &W,
) -> Result<Assignment, WallpaperError>
where
    B: ImageBackend,
    S: SelectionStore + ?Sized,
    W: WallpaperSetter + ?Sized,
{
    if inputs.monitors.is_empty() {
        return Err(WallpaperError::NoMonitors);
    }
    let by_identity: HashMap<&str, &OriginalImage> = inputs
        .originals
        .iter()
        .map(|o| (o.identity.as_str(), o))
        .collect();
    let pool: Vec<String> = inputs.originals.iter().map(|o| o.identity.clone()).collect();
    let picks = store.pick_unique(&pool, inputs.monitors.len())?;

    let mut assignment = Assignment::with_capacity(inputs.monitors.len());
    let mut fresh: Vec<PathBuf> = Vec::new();
    for (monitor, identity) in inputs.monitors.iter().zip(&picks) {
        let original = by_identity
            .get(identity.as_str())
            .ok_or_else(|| WallpaperError::UnknownIdentity(identity.clone()))?;
        let target = &monitor.target;
        let props = inputs.properties.lookup(identity, target.aspect);
        let entry = inputs.layout.entry_path(identity, &props, target);

        if !fresh.contains(&entry) {
            let stale = is_stale(&original.path, &entry).map_err(|e| WallpaperError::Stat {
                path: original.path.clone(),
                source: e,
            })?;
            if stale {
                log::info!("rendering {} for {}", identity, target);
                render_or_stop(
                    pipeline,
                    &RenderRequest::wallpaper(&original.path, &entry, target.dimensions(), props),
                )?;
            }
            fresh.push(entry.clone());
        }
        log::info!("{}: {}", monitor.handle, identity);
        assignment.push((monitor.handle.clone(), entry));
    }

    setter.set(&assignment)?;
    Ok(assignment)
}

/// Ad-hoc rendering options for `preview`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewOptions {
    pub properties: ImageProperties,
    pub touch: bool,
}

/// Render `file` for every monitor into scratch space and apply it.
///
/// Always re-rendered; monitors sharing a resolution share the file.
pub fn apply_preview<B, W>(
    pipeline: &Pipeline<'_, B>,
    file: &Path,
    options: &PreviewOptions,
    monitors: &[Monitor],
    setter: &W,
) -> Result<Assignment, WallpaperError>
where
    B: ImageBackend,
    W: WallpaperSetter + ?Sized,
{
    if monitors.is_empty() {
        return Err(WallpaperError::NoMonitors);
    }

    let mut rendered: HashMap<MonitorTarget, PathBuf> = HashMap::new();
    let mut assignment = Assignment::with_capacity(monitors.len());
    for monitor in monitors {
        let target = monitor.target;
        let output = match rendered.get(&target) {
            Some(path) => path.clone(),
            None => {
                let output = pipeline
                    .scratch()
                    .preview_path(file, &target.to_string());
                let request = RenderRequest {
                    touch: options.touch,
                    ..RenderRequest::wallpaper(
                        file,
                        &output,
                        target.dimensions(),
                        options.properties.clone(),
                    )
                };
                render_or_stop(pipeline, &request)?;
                rendered.insert(target, output.clone());
                output
            }
        };
        assignment.push((monitor.handle.clone(), output));
    }

    setter.set(&assignment)?;
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::monitors::AspectRatios;
    use crate::scratch::ScratchSpace;
    use crate::selection::JsonSelectionStore;
    use crate::test_helpers::set_mtime;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSetter {
        calls: Mutex<Vec<Assignment>>,
    }

    impl WallpaperSetter for RecordingSetter {
        fn set(&self, assignment: &[(MonitorHandle, PathBuf)]) -> Result<(), SetterError> {
            self.calls.lock().unwrap().push(assignment.to_vec());
            Ok(())
        }
    }

    /// Always picks the first `n` of the pool.
    struct FirstN;

    impl SelectionStore for FirstN {
        fn pick_unique(
            &mut self,
            pool: &[String],
            n: usize,
        ) -> Result<Vec<String>, SelectionError> {
            Ok(pool.iter().cycle().take(n).cloned().collect())
        }

        fn compact(&mut self, _pool: &[String]) -> Result<usize, SelectionError> {
            Ok(0)
        }
    }

    fn monitors(geometries: &[(u32, u32)]) -> Vec<Monitor> {
        let mut ratios = AspectRatios::new();
        geometries
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| Monitor {
                handle: MonitorHandle(format!("OUT-{}", i)),
                target: ratios.target(w, h),
            })
            .collect()
    }

    fn originals(dir: &Path, names: &[&str]) -> Vec<OriginalImage> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, b"x").unwrap();
                set_mtime(&path, 1_000);
                OriginalImage {
                    identity: name.to_string(),
                    path,
                }
            })
            .collect()
    }

    // =========================================================================
    // CommandSetter
    // =========================================================================

    #[test]
    fn command_line_appends_paths_in_monitor_order() {
        let setter = CommandSetter::new(vec!["feh".into(), "--bg-fill".into()]);
        let line = setter.command_line(&[
            (MonitorHandle("DP-1".into()), PathBuf::from("/c/a.png")),
            (MonitorHandle("HDMI-1".into()), PathBuf::from("/c/b.png")),
        ]);
        assert_eq!(line, vec!["feh", "--bg-fill", "/c/a.png", "/c/b.png"]);
    }

    #[test]
    fn empty_command_is_error() {
        let setter = CommandSetter::new(Vec::new());
        assert!(matches!(setter.set(&[]), Err(SetterError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_status() {
        let setter = CommandSetter::new(vec!["false".into()]);
        assert!(matches!(setter.set(&[]), Err(SetterError::Failed { .. })));
    }

    // =========================================================================
    // random
    // =========================================================================

    #[test]
    fn random_renders_missing_entries_and_applies() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(tmp.path())).unwrap();
        let layout = CacheLayout::new(tmp.path().join("cache"));
        let originals = originals(tmp.path(), &["a.png", "b.png"]);
        let monitors = monitors(&[(1920, 1080), (1280, 1024)]);
        let properties = PropertiesTable::new();
        let backend = MockBackend::new();
        let pipeline = Pipeline::new(&backend, &scratch, CancelToken::new(), Duration::ZERO);
        let setter = RecordingSetter::default();
        let mut store = JsonSelectionStore::with_seed(tmp.path().join("db.json"), 4).unwrap();

        let assignment = apply_random(
            &pipeline,
            RandomInputs {
                layout: &layout,
                properties: &properties,
                originals: &originals,
                monitors: &monitors,
            },
            &mut store,
            &setter,
        )
        .unwrap();

        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment[0].0, MonitorHandle("OUT-0".into()));
        assert!(assignment.iter().all(|(_, p)| p.exists()));
        assert_ne!(assignment[0].1, assignment[1].1);
        assert_eq!(setter.calls.lock().unwrap().len(), 1);
        assert_eq!(backend.count(|op| matches!(op, RecordedOp::Resize { .. })), 2);
    }

    #[test]
    fn random_shares_render_between_identical_monitors() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(tmp.path())).unwrap();
        let layout = CacheLayout::new(tmp.path().join("cache"));
        let originals = originals(tmp.path(), &["only.png"]);
        let monitors = monitors(&[(1920, 1080), (1920, 1080)]);
        let properties = PropertiesTable::new();
        let backend = MockBackend::new();
        let pipeline = Pipeline::new(&backend, &scratch, CancelToken::new(), Duration::ZERO);
        let setter = RecordingSetter::default();

        let assignment = apply_random(
            &pipeline,
            RandomInputs {
                layout: &layout,
                properties: &properties,
                originals: &originals,
                monitors: &monitors,
            },
            &mut FirstN,
            &setter,
        )
        .unwrap();

        assert_eq!(assignment[0].1, assignment[1].1);
        assert_eq!(backend.count(|op| matches!(op, RecordedOp::Resize { .. })), 1);
    }

    #[test]
    fn random_uses_fresh_cache_entries() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(tmp.path())).unwrap();
        let layout = CacheLayout::new(tmp.path().join("cache"));
        let originals = originals(tmp.path(), &["a.png"]);
        let monitors = monitors(&[(1920, 1080)]);
        let properties = PropertiesTable::new();
        let entry = layout.entry_path("a.png", &ImageProperties::default(), &monitors[0].target);
        fs::create_dir_all(entry.parent().unwrap()).unwrap();
        fs::write(&entry, b"cached").unwrap();

        let backend = MockBackend::new();
        let pipeline = Pipeline::new(&backend, &scratch, CancelToken::new(), Duration::ZERO);
        let assignment = apply_random(
            &pipeline,
            RandomInputs {
                layout: &layout,
                properties: &properties,
                originals: &originals,
                monitors: &monitors,
            },
            &mut FirstN,
            &RecordingSetter::default(),
        )
        .unwrap();

        assert_eq!(assignment[0].1, entry);
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn random_without_monitors_is_error() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(tmp.path())).unwrap();
        let layout = CacheLayout::new(tmp.path().join("cache"));
        let properties = PropertiesTable::new();
        let backend = MockBackend::new();
        let pipeline = Pipeline::new(&backend, &scratch, CancelToken::new(), Duration::ZERO);

        let err = apply_random(
            &pipeline,
            RandomInputs {
                layout: &layout,
                properties: &properties,
                originals: &[],
                monitors: &[],
            },
            &mut FirstN,
            &RecordingSetter::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WallpaperError::NoMonitors));
    }

    // =========================================================================
    // preview
    // =========================================================================

    #[test]
    fn preview_renders_into_scratch_with_given_properties() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(tmp.path())).unwrap();
        let file = tmp.path().join("try.png");
        fs::write(&file, b"x").unwrap();
        let monitors = monitors(&[(1920, 1080), (1920, 1080), (1280, 1024)]);
        let backend = MockBackend::new();
        let pipeline = Pipeline::new(&backend, &scratch, CancelToken::new(), Duration::ZERO);
        let setter = RecordingSetter::default();
        let options = PreviewOptions {
            properties: ImageProperties {
                left: -100,
                background: Some("white".into()),
                ..Default::default()
            },
            touch: false,
        };

        let assignment = apply_preview(&pipeline, &file, &options, &monitors, &setter).unwrap();

        assert_eq!(assignment.len(), 3);
        assert_eq!(assignment[0].1, assignment[1].1);
        assert_ne!(assignment[0].1, assignment[2].1);
        assert!(assignment.iter().all(|(_, p)| p.starts_with(scratch.path())));
        assert_eq!(backend.count(|op| matches!(op, RecordedOp::Resize { .. })), 2);
        assert!(backend.get_operations().iter().any(|op| matches!(
            op,
            RecordedOp::CropPad { background, .. } if background == "white"
        )));
    }

    #[test]
    fn preview_always_renders_again() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(tmp.path())).unwrap();
        let file = tmp.path().join("try.png");
        fs::write(&file, b"x").unwrap();
        let monitors = monitors(&[(1920, 1080)]);
        let backend = MockBackend::new();
        let pipeline = Pipeline::new(&backend, &scratch, CancelToken::new(), Duration::ZERO);
        let setter = RecordingSetter::default();

        apply_preview(&pipeline, &file, &PreviewOptions::default(), &monitors, &setter).unwrap();
        apply_preview(&pipeline, &file, &PreviewOptions::default(), &monitors, &setter).unwrap();
        assert_eq!(backend.count(|op| matches!(op, RecordedOp::Resize { .. })), 2);
        assert_eq!(setter.calls.lock().unwrap().len(), 2);
    }
}
