//! Pure geometry for fitting an original onto a monitor.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! The upscaler only multiplies by powers of two and never shrinks, so the
//! plan always upscales to the smallest power of two that covers (or touches)
//! the target, then lets a Lanczos resize bring the result down to the exact
//! monitor size.

use super::params::{CropPadGeometry, Dimensions, Margins, Offset, ResizeGeometry};
use thiserror::Error;

/// Largest scale factor the resolver will ever return.
const MAX_SCALE: u32 = 1 << 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{0} has a zero dimension")]
    ZeroDimension(&'static str),
    #[error("cropping {margins:?} leaves nothing of a {width}x{height} image")]
    EmptyAfterCrop {
        width: u32,
        height: u32,
        margins: Margins,
    },
}

/// Everything the resolver needs for one (image, monitor) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryInput {
    pub image: Dimensions,
    pub target: Dimensions,
    /// Fit inside the target instead of filling it.
    pub touch: bool,
    pub denoise: bool,
    pub margins: Margins,
    pub offset: Offset,
}

/// The resolved sequence of transforms for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    /// `None` when all margins are zero.
    pub crop_pad: Option<CropPadGeometry>,
    /// Source dimensions after crop/pad.
    pub effective: Dimensions,
    pub scale: u32,
    /// Whether the upscaler runs at all (scale > 1 or denoising).
    pub upscale: bool,
    /// Dimensions after upscaling.
    pub scaled: Dimensions,
    pub resize: ResizeGeometry,
}

/// Smallest power of two that is at least `ratio`, and never below 1.
///
/// # Examples
/// ```
/// # use wallpaper_cache::imaging::scale_factor;
/// assert_eq!(scale_factor(0.54), 1);
/// assert_eq!(scale_factor(4.0), 4);
/// assert_eq!(scale_factor(4.8), 8);
/// ```
pub fn scale_factor(ratio: f64) -> u32 {
    let mut scale = 1u32;
    while f64::from(scale) < ratio && scale < MAX_SCALE {
        scale *= 2;
    }
    scale
}

/// Apply crop/pad margins to image dimensions.
pub fn effective_dimensions(
    image: Dimensions,
    margins: &Margins,
) -> Result<Dimensions, GeometryError> {
    let width = i64::from(image.width) - i64::from(margins.left) - i64::from(margins.right);
    let height = i64::from(image.height) - i64::from(margins.top) - i64::from(margins.bottom);

    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok(Dimensions::new(w, h)),
        _ => Err(GeometryError::EmptyAfterCrop {
            width: image.width,
            height: image.height,
            margins: *margins,
        }),
    }
}

/// Ratio between target and source, picking the axis by fit mode.
pub fn fit_ratio(source: Dimensions, target: Dimensions, touch: bool) -> f64 {
    let x_ratio = f64::from(target.width) / f64::from(source.width);
    let y_ratio = f64::from(target.height) / f64::from(source.height);
    if touch {
        x_ratio.min(y_ratio)
    } else {
        x_ratio.max(y_ratio)
    }
}

/// Pixel translation of the final crop window for recentring.
///
/// `image` is the image the crop is applied to (after upscaling). The result
/// is the same for any power-of-two multiple of the pre-upscale image, which
/// keeps the offset stable whether or not an intermediate is reused.
pub fn crop_offset(image: Dimensions, target: Dimensions, offset: &Offset) -> (i64, i64) {
    if offset.is_zero() {
        return (0, 0);
    }

    let offset_scale = (f64::from(target.width) / f64::from(image.width))
        .max(f64::from(target.height) / f64::from(image.height));

    // Inverted so positive vertical values move the viewport up
    let x = offset_scale * offset.horizontal * f64::from(image.width) / 100.0;
    let y = -offset_scale * offset.vertical * f64::from(image.height) / 100.0;

    (x as i64, y as i64)
}

/// Resolve crop/pad extents, scale factor and final resize geometry.
pub fn resolve(input: &GeometryInput) -> Result<TransformPlan, GeometryError> {
    if input.image.is_empty() {
        return Err(GeometryError::ZeroDimension("image"));
    }
    if input.target.is_empty() {
        return Err(GeometryError::ZeroDimension("target"));
    }

    let effective = effective_dimensions(input.image, &input.margins)?;
    let crop_pad = (!input.margins.is_zero()).then(|| CropPadGeometry {
        width: effective.width,
        height: effective.height,
        left: input.margins.left,
        top: input.margins.top,
    });

    let scale = scale_factor(fit_ratio(effective, input.target, input.touch));
    let scaled = Dimensions::new(
        effective.width.saturating_mul(scale),
        effective.height.saturating_mul(scale),
    );
    let (offset_x, offset_y) = crop_offset(scaled, input.target, &input.offset);

    Ok(TransformPlan {
        crop_pad,
        effective,
        scale,
        upscale: scale > 1 || input.denoise,
        scaled,
        resize: ResizeGeometry {
            target: input.target,
            touch: input.touch,
            offset_x,
            offset_y,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(image: (u32, u32), target: (u32, u32)) -> GeometryInput {
        GeometryInput {
            image: image.into(),
            target: target.into(),
            touch: false,
            denoise: false,
            margins: Margins::default(),
            offset: Offset::default(),
        }
    }

    // =========================================================================
    // scale_factor
    // =========================================================================

    #[test]
    fn scale_is_one_when_no_growth_needed() {
        assert_eq!(scale_factor(0.0), 1);
        assert_eq!(scale_factor(0.54), 1);
        assert_eq!(scale_factor(1.0), 1);
    }

    #[test]
    fn scale_rounds_up_to_next_power_of_two() {
        assert_eq!(scale_factor(1.01), 2);
        assert_eq!(scale_factor(2.5), 4);
        assert_eq!(scale_factor(4.8), 8);
        assert_eq!(scale_factor(15.9), 16);
    }

    #[test]
    fn exact_power_of_two_is_kept() {
        assert_eq!(scale_factor(2.0), 2);
        assert_eq!(scale_factor(4.0), 4);
        assert_eq!(scale_factor(8.0), 8);
    }

    #[test]
    fn scale_between_powers_for_every_band() {
        for k in 1..10u32 {
            let low = f64::from(1u32 << (k - 1));
            let high = f64::from(1u32 << k);
            assert_eq!(scale_factor((low + high) / 2.0), 1 << k);
        }
    }

    // =========================================================================
    // resolve: scale selection
    // =========================================================================

    #[test]
    fn large_original_on_1080p_needs_no_upscale() {
        // xRatio 0.48, yRatio 0.54 → fill picks 0.54 → scale 1
        let plan = resolve(&input((4000, 2000), (1920, 1080))).unwrap();
        assert_eq!(plan.scale, 1);
        assert!(!plan.upscale);
        assert_eq!(plan.resize.resize_arg(), "1920x1080^");
        assert_eq!(plan.resize.crop_arg(), "1920x1080+0+0!");
    }

    #[test]
    fn small_original_on_4k_scales_by_eight() {
        // xRatio 4.8, yRatio 3.6 → fill picks 4.8 → 8
        let plan = resolve(&input((800, 600), (3840, 2160))).unwrap();
        assert_eq!(plan.scale, 8);
        assert!(plan.upscale);
        assert_eq!(plan.scaled, Dimensions::new(6400, 4800));
    }

    #[test]
    fn touch_mode_uses_smaller_ratio() {
        let mut i = input((800, 600), (3840, 2160));
        i.touch = true;
        // min(4.8, 3.6) = 3.6 → 4
        let plan = resolve(&i).unwrap();
        assert_eq!(plan.scale, 4);
        assert_eq!(plan.resize.resize_arg(), "3840x2160");
    }

    #[test]
    fn denoise_forces_upscale_stage_at_scale_one() {
        let mut i = input((4000, 2000), (1920, 1080));
        i.denoise = true;
        let plan = resolve(&i).unwrap();
        assert_eq!(plan.scale, 1);
        assert!(plan.upscale);
    }

    #[test]
    fn image_already_smaller_ratio_never_downscales() {
        for (image, target) in [
            ((1920, 1080), (1920, 1080)),
            ((5000, 5000), (1920, 1080)),
            ((2560, 1440), (1280, 1024)),
        ] {
            assert_eq!(resolve(&input(image, target)).unwrap().scale, 1);
        }
    }

    // =========================================================================
    // resolve: crop / pad
    // =========================================================================

    #[test]
    fn zero_margins_skip_crop_stage() {
        let plan = resolve(&input((1000, 1000), (1000, 1000))).unwrap();
        assert!(plan.crop_pad.is_none());
        assert_eq!(plan.effective, Dimensions::new(1000, 1000));
    }

    #[test]
    fn positive_margins_crop_inward() {
        let mut i = input((1000, 800), (500, 400));
        i.margins = Margins {
            top: 100,
            bottom: 0,
            left: 50,
            right: 150,
        };
        let plan = resolve(&i).unwrap();
        let crop = plan.crop_pad.unwrap();
        assert_eq!((crop.width, crop.height), (800, 700));
        assert_eq!(crop.crop_arg(), "800x700+50+100!");
        assert_eq!(plan.effective, Dimensions::new(800, 700));
    }

    #[test]
    fn negative_margins_pad_outward_and_change_scale() {
        // Padding 1000 → 2000 wide halves the horizontal ratio
        let mut i = input((1000, 1000), (2000, 1000));
        assert_eq!(resolve(&i).unwrap().scale, 2);

        i.margins = Margins {
            left: -500,
            right: -500,
            ..Margins::default()
        };
        let plan = resolve(&i).unwrap();
        assert_eq!(plan.effective, Dimensions::new(2000, 1000));
        assert_eq!(plan.scale, 1);
        assert_eq!(plan.crop_pad.unwrap().crop_arg(), "2000x1000-500+0!");
    }

    #[test]
    fn cropping_everything_is_rejected() {
        let mut i = input((100, 100), (100, 100));
        i.margins = Margins {
            left: 60,
            right: 40,
            ..Margins::default()
        };
        assert!(matches!(
            resolve(&i),
            Err(GeometryError::EmptyAfterCrop { .. })
        ));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert_eq!(
            resolve(&input((0, 100), (100, 100))),
            Err(GeometryError::ZeroDimension("image"))
        );
        assert_eq!(
            resolve(&input((100, 100), (100, 0))),
            Err(GeometryError::ZeroDimension("target"))
        );
    }

    // =========================================================================
    // resolve: offsets
    // =========================================================================

    #[test]
    fn positive_vertical_offset_moves_viewport_up() {
        let mut i = input((1000, 1000), (1000, 500));
        i.offset.vertical = 10.0;
        let plan = resolve(&i).unwrap();
        assert_eq!(plan.resize.crop_arg(), "1000x500+0-100!");
    }

    #[test]
    fn horizontal_offset_scales_with_target() {
        // Tall image on a wide monitor: offset_scale = 2000/1000 = 2
        let mut i = input((1000, 4000), (2000, 1000));
        i.offset.horizontal = -5.0;
        let plan = resolve(&i).unwrap();
        assert_eq!(plan.scale, 2);
        assert_eq!(plan.resize.offset_x, -100);
        assert_eq!(plan.resize.offset_y, 0);
    }

    #[test]
    fn offset_is_independent_of_scale_factor() {
        let target = Dimensions::new(3840, 2160);
        let offset = Offset {
            horizontal: 3.5,
            vertical: -12.25,
        };
        let base = crop_offset(Dimensions::new(800, 600), target, &offset);
        let doubled = crop_offset(Dimensions::new(6400, 4800), target, &offset);
        assert_eq!(base, doubled);
    }

    #[test]
    fn offsets_combine_with_margins() {
        let mut i = input((1200, 1000), (1000, 500));
        i.margins = Margins {
            left: 100,
            right: 100,
            ..Margins::default()
        };
        i.offset.vertical = -10.0;
        let plan = resolve(&i).unwrap();
        assert!(plan.crop_pad.is_some());
        assert_eq!(plan.resize.crop_arg(), "1000x500+0+100!");
    }
}
