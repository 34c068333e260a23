//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`pipeline`](super::pipeline) (which decides which
//! steps a render needs) and the [`backend`](super::backend) (which shells
//! out to the external tools). Swapping the backend for a mock in tests needs
//! no change to the pipeline.
//!
//! ## Types
//!
//! - [`Dimensions`]: width/height in pixels.
//! - [`Margins`]: crop (positive) or pad (negative) pixels per edge.
//! - [`Offset`]: recentring percentages; positive vertical moves the viewport up.
//! - [`CropPadGeometry`], [`ResizeGeometry`]: resolved geometry, rendered as
//!   ImageMagick geometry strings.
//! - [`ConvertParams`], [`CropPadParams`], [`UpscaleParams`], [`ResizeParams`]:
//!   everything one external invocation needs.

use std::path::PathBuf;

/// Width and height of an image or a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Pixels removed from (positive) or added to (negative) each edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Margins {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
}

impl Margins {
    pub const fn is_zero(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
    }
}

/// Viewport recentring, in percent of the image.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offset {
    pub horizontal: f64,
    /// Positive values move the viewport up.
    pub vertical: f64,
}

impl Offset {
    pub fn is_zero(&self) -> bool {
        self.horizontal == 0.0 && self.vertical == 0.0
    }
}

/// Resolved crop/pad window over the original image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropPadGeometry {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl CropPadGeometry {
    /// `WxH+L+T!`, negative offsets pad.
    pub fn crop_arg(&self) -> String {
        format!("{}x{}{:+}{:+}!", self.width, self.height, self.left, self.top)
    }
}

/// Final resize and crop onto the monitor rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeGeometry {
    pub target: Dimensions,
    pub touch: bool,
    pub offset_x: i64,
    pub offset_y: i64,
}

impl ResizeGeometry {
    /// `WxH^` fills and overflows, `WxH` only touches the inside.
    pub fn resize_arg(&self) -> String {
        let mode = if self.touch { "" } else { "^" };
        format!("{}x{}{}", self.target.width, self.target.height, mode)
    }

    pub fn crop_arg(&self) -> String {
        format!(
            "{}x{}{:+}{:+}!",
            self.target.width, self.target.height, self.offset_x, self.offset_y
        )
    }
}

/// Which upscaling model to ask the upscaler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleModel {
    Primary,
    /// Slower model that survives inputs the primary one crashes on.
    Fallback,
}

/// Re-encode a file the local decoder cannot read into PNG.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertParams {
    pub source: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CropPadParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub geometry: CropPadGeometry,
    /// ImageMagick colour used for padded areas.
    pub background: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleParams {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Power of two, at least 1.
    pub scale: u32,
    /// waifu2x noise level, `None` for no denoising.
    pub noise_level: Option<u8>,
    pub model: UpscaleModel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub geometry: ResizeGeometry,
    pub flatten: bool,
}
