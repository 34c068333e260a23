//! The seam between the render pipeline and the external tools.
//!
//! The [`ImageBackend`] trait defines the five operations the pipeline needs:
//! identify, convert, crop_pad, upscale and resize. Identify is a local header
//! read; the other four are external tool invocations whose failures come back
//! as a [`ToolError`] carrying a [`FailureKind`], so the pipeline can decide
//! whether to retry without knowing anything about exit codes.
//!
//! In production this is
//! [`MagickBackend`](super::magick_backend::MagickBackend), which shells out to
//! ImageMagick and a waifu2x front end.

use super::params::{ConvertParams, CropPadParams, Dimensions, ResizeParams, UpscaleParams};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported image format: {}", .0.display())]
    Unsupported(PathBuf),
    #[error("could not decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
}

/// Which external step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStep {
    Convert,
    CropPad,
    Upscale,
    Resize,
}

impl fmt::Display for ToolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolStep::Convert => "convert",
            ToolStep::CropPad => "crop/pad",
            ToolStep::Upscale => "upscale",
            ToolStep::Resize => "resize",
        })
    }
}

/// How the caller should react to a failed tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth one more attempt after a pause.
    Transient,
    /// The upscaler crashed on this input; retry with the fallback model.
    ModelIncompatible,
    /// Retrying cannot help (missing program, bad arguments).
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{step} failed ({kind:?}): {message}")]
pub struct ToolError {
    pub step: ToolStep,
    pub kind: FailureKind,
    pub message: String,
}

impl ToolError {
    pub fn new(step: ToolStep, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }
}

/// Pixel operations the pipeline delegates.
///
/// `Sync` because one backend is shared by every rayon worker.
pub trait ImageBackend: Sync {
    /// Read image dimensions without decoding pixels.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Re-encode an input the local decoder cannot read.
    fn convert(&self, params: &ConvertParams) -> Result<(), ToolError>;

    /// Crop (positive margins) or pad (negative margins) the original.
    fn crop_pad(&self, params: &CropPadParams) -> Result<(), ToolError>;

    /// Upscale by a power of two, optionally denoising.
    fn upscale(&self, params: &UpscaleParams) -> Result<(), ToolError>;

    /// Final resize and crop onto the monitor rectangle.
    fn resize(&self, params: &ResizeParams) -> Result<(), ToolError>;

    /// Whether [`UpscaleModel::Fallback`](super::params::UpscaleModel) is
    /// configured.
    fn has_fallback_model(&self) -> bool {
        false
    }
}
