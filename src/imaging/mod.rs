//! Image processing: geometry, tool invocations and the render pipeline.
//!
//! | Operation | Implementation |
//! |---|---|
//! | **Identify** | `image` crate header read |
//! | **Convert / Crop / Resize** | ImageMagick `convert` |
//! | **Upscale** | waifu2x front end, one at a time |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for crop, scale and offset math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`MagickBackend`]
//! - **Pipeline**: Stages combining calculations + backend, with retries

pub mod backend;
mod calculations;
pub mod magick_backend;
mod params;
pub mod pipeline;

pub use backend::{BackendError, FailureKind, ImageBackend, ToolError, ToolStep};
pub use calculations::{
    GeometryError, GeometryInput, TransformPlan, crop_offset, effective_dimensions, fit_ratio,
    resolve, scale_factor,
};
pub use magick_backend::MagickBackend;
pub use params::{
    ConvertParams, CropPadGeometry, CropPadParams, Dimensions, Margins, Offset, ResizeGeometry,
    ResizeParams, UpscaleModel, UpscaleParams,
};
pub use pipeline::{Pipeline, PipelineError, RenderOutcome, RenderRequest, UpscaleGate};
