//! Render one original onto one monitor resolution.
//!
//! Combines the geometry [`calculations`](super::calculations) with backend
//! execution:
//!
//! ```text
//! input ──decode──► (converted.png) ──crop/pad──► cropped.bmp
//!       ──upscale (gated)──► intermediate.bmp ──resize──► entry-wip ──rename──► entry
//! ```
//!
//! Every stage is optional except decode and resize. Scratch files have
//! deterministic names, so a stage whose output already exists is skipped.
//! That is how the intermediate upscaled for one monitor is reused by the
//! next monitor of the same original.
//!
//! Only one upscale runs at a time across all workers: the upscaler saturates
//! the GPU (or all CPU cores) on its own. The [`UpscaleGate`] serializes it
//! and doubles as a cancellation point.

use super::backend::{BackendError, FailureKind, ImageBackend, ToolError};
use super::calculations::{GeometryError, GeometryInput, resolve};
use super::params::{
    ConvertParams, CropPadGeometry, CropPadParams, Dimensions, ResizeParams, UpscaleModel,
    UpscaleParams,
};
use crate::cache::{colour_token, wip_path};
use crate::cancel::CancelToken;
use crate::properties::ImageProperties;
use crate::scratch::ScratchSpace;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid render request: {0}")]
    InvalidRequest(String),
    #[error("{}: {source}", path.display())]
    Geometry {
        path: PathBuf,
        source: GeometryError,
    },
    #[error("{}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: BackendError,
    },
    #[error("{}: {source}", path.display())]
    Tool { path: PathBuf, source: ToolError },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Failures confined to one image. Filesystem errors on the cache or
    /// scratch directories are not.
    pub fn is_per_image(&self) -> bool {
        !matches!(self, PipelineError::Io { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered { reused_intermediate: bool },
    /// Cancelled while waiting for the upscale gate. Nothing was written.
    Stopped,
}

/// Everything needed to render one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: Dimensions,
    /// Fit inside the target instead of filling it.
    pub touch: bool,
    pub denoise: bool,
    pub flatten: bool,
    pub properties: ImageProperties,
}

impl RenderRequest {
    /// Defaults used for cache entries: fill, denoise, flatten.
    pub fn wallpaper(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        target: Dimensions,
        properties: ImageProperties,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            target,
            touch: false,
            denoise: true,
            flatten: true,
            properties,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input.as_os_str().is_empty() {
            return Err(PipelineError::InvalidRequest("missing input path".into()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(PipelineError::InvalidRequest("missing output path".into()));
        }
        if self.target.is_empty() {
            return Err(PipelineError::InvalidRequest(format!(
                "target {}x{} has a zero dimension",
                self.target.width, self.target.height
            )));
        }
        Ok(())
    }
}

/// Single-permit lock around the upscaler.
#[derive(Debug, Default)]
pub struct UpscaleGate {
    lock: Mutex<()>,
}

impl UpscaleGate {
    /// Wait for the permit. `None` when cancelled before or while waiting.
    pub fn acquire(&self, cancel: &CancelToken) -> Option<MutexGuard<'_, ()>> {
        if cancel.is_cancelled() {
            return None;
        }
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return None;
        }
        Some(guard)
    }
}

/// Scratch-file fragment identifying a crop/pad window and its colour.
pub fn crop_descriptor(geometry: &CropPadGeometry, props: &ImageProperties) -> String {
    format!(
        "{}x{}{:+}{:+}-{}",
        geometry.width,
        geometry.height,
        geometry.left,
        geometry.top,
        colour_token(props.background.as_deref())
    )
}

/// Drop whatever a failed resize left behind. Pruning never looks at `-wip`
/// files, so nothing else would.
fn remove_partial(wip: &Path) {
    match std::fs::remove_file(wip) {
        Ok(()) => log::debug!("removed partial {}", wip.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", wip.display(), e),
    }
}

pub struct Pipeline<'a, B: ImageBackend> {
    backend: &'a B,
    scratch: &'a ScratchSpace,
    gate: UpscaleGate,
    cancel: CancelToken,
    retry_delay: Duration,
}

impl<'a, B: ImageBackend> Pipeline<'a, B> {
    pub fn new(
        backend: &'a B,
        scratch: &'a ScratchSpace,
        cancel: CancelToken,
        retry_delay: Duration,
    ) -> Self {
        Self {
            backend,
            scratch,
            gate: UpscaleGate::default(),
            cancel,
            retry_delay,
        }
    }

    pub fn scratch(&self) -> &ScratchSpace {
        self.scratch
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run all required stages for `req`.
    pub fn render(&self, req: &RenderRequest) -> Result<RenderOutcome, PipelineError> {
        req.validate()?;
        let tool_err = |source| PipelineError::Tool {
            path: req.input.clone(),
            source,
        };

        let (mut source, image) = self.decode(&req.input)?;

        let noise_level = if req.denoise {
            req.properties.noise_level()
        } else {
            None
        };
        let plan = resolve(&GeometryInput {
            image,
            target: req.target,
            touch: req.touch,
            denoise: noise_level.is_some(),
            margins: req.properties.margins(),
            offset: req.properties.offset(),
        })
        .map_err(|e| PipelineError::Geometry {
            path: req.input.clone(),
            source: e,
        })?;

        let mut descriptor = String::new();
        if let Some(geometry) = &plan.crop_pad {
            descriptor = crop_descriptor(geometry, &req.properties);
            let cropped = self.scratch.cropped_path(&req.input, &descriptor);
            if !cropped.exists() {
                let params = CropPadParams {
                    source: source.clone(),
                    output: cropped.clone(),
                    geometry: geometry.clone(),
                    background: req.properties.background_or_default().to_string(),
                };
                self.with_retry(|| self.backend.crop_pad(&params))
                    .map_err(tool_err)?;
            }
            source = cropped;
        }

        let mut reused_intermediate = false;
        if plan.upscale {
            let intermediate = self.scratch.intermediate_path(
                &req.input,
                plan.scale,
                noise_level,
                &descriptor,
            );
            if intermediate.exists() {
                reused_intermediate = true;
            } else {
                let Some(_permit) = self.gate.acquire(&self.cancel) else {
                    log::debug!("stopped before upscaling {}", req.input.display());
                    return Ok(RenderOutcome::Stopped);
                };
                // Another worker may have produced it while we waited
                if intermediate.exists() {
                    reused_intermediate = true;
                } else {
                    log::debug!(
                        "upscaling {} x{} (noise level: {:?})",
                        req.input.display(),
                        plan.scale,
                        noise_level
                    );
                    self.upscale(UpscaleParams {
                        source: source.clone(),
                        output: intermediate.clone(),
                        scale: plan.scale,
                        noise_level,
                        model: UpscaleModel::Primary,
                    })
                    .map_err(tool_err)?;
                }
            }
            source = intermediate;
        }

        if let Some(parent) = req.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let wip = wip_path(&req.output);
        let params = ResizeParams {
            source,
            output: wip.clone(),
            geometry: plan.resize.clone(),
            flatten: req.flatten,
        };
        if let Err(e) = self.with_retry(|| self.backend.resize(&params)) {
            remove_partial(&wip);
            return Err(tool_err(e));
        }
        std::fs::rename(&wip, &req.output).map_err(|e| PipelineError::Io {
            path: req.output.clone(),
            source: e,
        })?;

        Ok(RenderOutcome::Rendered {
            reused_intermediate,
        })
    }

    /// Read dimensions, converting through the external tool when the local
    /// decoder cannot read the file or the path is not plain ASCII.
    fn decode(&self, input: &Path) -> Result<(PathBuf, Dimensions), PipelineError> {
        let decode_err = |path: &Path, source| PipelineError::Decode {
            path: path.to_path_buf(),
            source,
        };

        if input.to_string_lossy().is_ascii() {
            match self.backend.identify(input) {
                Ok(dims) => return Ok((input.to_path_buf(), dims)),
                Err(BackendError::Unsupported(_)) => {
                    log::debug!("{} needs conversion", input.display());
                }
                Err(e) => return Err(decode_err(input, e)),
            }
        }

        let converted = self.scratch.converted_path(input);
        if !converted.exists() {
            let params = ConvertParams {
                source: input.to_path_buf(),
                output: converted.clone(),
            };
            self.with_retry(|| self.backend.convert(&params))
                .map_err(|e| PipelineError::Tool {
                    path: input.to_path_buf(),
                    source: e,
                })?;
        }
        let dims = self
            .backend
            .identify(&converted)
            .map_err(|e| decode_err(input, e))?;
        Ok((converted, dims))
    }

    /// Upscale with the model fallback on top of the transient retry.
    fn upscale(&self, mut params: UpscaleParams) -> Result<(), ToolError> {
        let first = self.with_retry(|| self.backend.upscale(&params));
        match first {
            Err(e)
                if e.kind == FailureKind::ModelIncompatible
                    && self.backend.has_fallback_model() =>
            {
                log::warn!(
                    "upscaler crashed on {}, retrying with fallback model",
                    params.source.display()
                );
                params.model = UpscaleModel::Fallback;
                self.with_retry(|| self.backend.upscale(&params))
            }
            other => other,
        }
    }

    /// One extra attempt after `retry_delay` for transient failures.
    fn with_retry(&self, op: impl Fn() -> Result<(), ToolError>) -> Result<(), ToolError> {
        match op() {
            Err(e) if e.kind == FailureKind::Transient => {
                log::warn!("{}, retrying in {:?}", e, self.retry_delay);
                std::thread::sleep(self.retry_delay);
                op().inspect_err(|e| log::warn!("failed twice: {}", e))
            }
            other => other,
        }
    }
}
