//! ImageMagick + waifu2x backend.
//!
//! | Operation | Tool |
//! |---|---|
//! | **Identify** | `image::ImageReader` header read, no pixel decode |
//! | **Convert** | `convert in png:out` with the fastest PNG settings |
//! | **Crop/Pad** | `convert in -crop WxH+L+T! -background C -flatten out.bmp` |
//! | **Upscale** | waifu2x-caffe, waifu2x-converter-cpp or waifu2x-ncnn-vulkan |
//! | **Resize** | `convert in -filter Lanczos -resize WxH^ -gravity center -crop ...` |
//!
//! Argument lists are built by pure functions so they can be tested without
//! the tools installed. Exit statuses are mapped to a [`FailureKind`] by
//! [`classify_exit`]: a missing program is fatal, an access violation or
//! segfault in the upscaler means the model cannot handle the input, and
//! anything else is worth one retry.

use super::backend::{BackendError, FailureKind, ImageBackend, ToolError, ToolStep};
use super::params::{
    ConvertParams, CropPadParams, Dimensions, ResizeParams, UpscaleModel, UpscaleParams,
};
use crate::config::{Config, UpscalerKind};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Windows `STATUS_ACCESS_VIOLATION`, reported by waifu2x-caffe when a model
/// runs out of memory on a large input.
const ACCESS_VIOLATION: i32 = 0xC000_0005_u32 as i32;

#[cfg(unix)]
const SIGSEGV: i32 = 11;

/// Map a finished process to a failure kind. `None` code means killed by a
/// signal.
pub fn classify_exit(code: Option<i32>, signal: Option<i32>) -> FailureKind {
    match (code, signal) {
        (Some(ACCESS_VIOLATION), _) => FailureKind::ModelIncompatible,
        #[cfg(unix)]
        (None, Some(SIGSEGV)) => FailureKind::ModelIncompatible,
        // 126: found but not executable, 127: not found (via a shell wrapper)
        (Some(126 | 127), _) => FailureKind::Fatal,
        _ => FailureKind::Transient,
    }
}

fn spawn_failure_kind(err: &std::io::Error) -> FailureKind {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => FailureKind::Fatal,
        _ => FailureKind::Transient,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagickCommand {
    pub program: String,
    pub version7: bool,
}

impl MagickCommand {
    /// Leading arguments for every invocation. BMP3 keeps intermediates
    /// readable by every upscaler front end.
    pub fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if self.version7 {
            args.push("convert".into());
        }
        args.push("-define".into());
        args.push("bmp:format=bmp3".into());
        args
    }

    pub fn convert_args(&self, params: &ConvertParams) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(
            [
                "-define",
                "png:compression-level=0",
                "-define",
                "png:compression-strategy=2",
            ]
            .map(OsString::from),
        );
        args.push(params.source.clone().into_os_string());
        args.push(png_output(&params.output));
        args
    }

    pub fn crop_pad_args(&self, params: &CropPadParams) -> Vec<OsString> {
        let mut args = self.base_args();
        args.push(params.source.clone().into_os_string());
        args.push("-crop".into());
        args.push(params.geometry.crop_arg().into());
        args.push("-background".into());
        args.push(params.background.clone().into());
        // Flattening onto the background fills the padded area; transparency
        // is lost either way once written as BMP.
        args.push("-flatten".into());
        args.push(params.output.clone().into_os_string());
        args
    }

    pub fn resize_args(&self, params: &ResizeParams) -> Vec<OsString> {
        let mut args = self.base_args();
        args.push(params.source.clone().into_os_string());
        args.extend(["-filter", "Lanczos", "-resize"].map(OsString::from));
        args.push(params.geometry.resize_arg().into());
        args.extend(["-gravity", "center", "-crop"].map(OsString::from));
        args.push(params.geometry.crop_arg().into());
        if params.flatten {
            args.push("-flatten".into());
        }
        args.push(png_output(&params.output));
        args
    }
}

/// Force PNG output regardless of the file name (entries are written to a
/// `-wip` name first).
fn png_output(path: &Path) -> OsString {
    let mut out = OsString::from("png:");
    out.push(path.as_os_str());
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upscaler {
    pub kind: UpscalerKind,
    pub program: String,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub cpu: bool,
    pub cpu_threads: Option<u32>,
}

/// waifu2x-caffe and converter-cpp mode names.
fn waifu2x_mode(scale: u32, noise_level: Option<u8>) -> &'static str {
    if scale == 1 {
        "noise"
    } else if noise_level.is_some() {
        "noise_scale"
    } else {
        "scale"
    }
}

impl Upscaler {
    fn model_for(&self, model: UpscaleModel) -> Option<&str> {
        match model {
            UpscaleModel::Primary => self.model.as_deref(),
            UpscaleModel::Fallback => self.fallback_model.as_deref(),
        }
    }

    pub fn args(&self, params: &UpscaleParams) -> Vec<OsString> {
        let model = self.model_for(params.model);
        let mut args: Vec<OsString> = Vec::new();

        match self.kind {
            UpscalerKind::Caffe => {
                args.push("-m".into());
                args.push(waifu2x_mode(params.scale, params.noise_level).into());
                args.push("-i".into());
                args.push(params.source.clone().into_os_string());
                args.push("-o".into());
                args.push(params.output.clone().into_os_string());
                if let Some(m) = model {
                    args.push("--model_dir".into());
                    args.push(m.into());
                }
                if params.scale != 1 {
                    args.push("-s".into());
                    args.push(params.scale.to_string().into());
                }
                if let Some(level) = params.noise_level {
                    args.push("-n".into());
                    args.push(level.to_string().into());
                }
                if self.cpu {
                    args.push("-p".into());
                    args.push("cpu".into());
                }
            }
            UpscalerKind::ConverterCpp => {
                args.push("-m".into());
                args.push(waifu2x_mode(params.scale, params.noise_level).into());
                args.push("-i".into());
                args.push(params.source.clone().into_os_string());
                args.push("-o".into());
                args.push(params.output.clone().into_os_string());
                args.push("--force-OpenCL".into());
                if let Some(m) = model {
                    args.push("--model_dir".into());
                    args.push(m.into());
                }
                if params.scale != 1 {
                    args.push("--scale_ratio".into());
                    args.push(params.scale.to_string().into());
                }
                if let Some(level) = params.noise_level {
                    args.push("--noise_level".into());
                    args.push(level.to_string().into());
                }
                if self.cpu {
                    args.push("--disable-gpu".into());
                    if let Some(j) = self.cpu_threads {
                        args.push("-j".into());
                        args.push(j.to_string().into());
                    }
                }
            }
            UpscalerKind::NcnnVulkan => {
                args.push("-i".into());
                args.push(params.source.clone().into_os_string());
                args.push("-o".into());
                args.push(params.output.clone().into_os_string());
                args.push("-n".into());
                args.push(
                    params
                        .noise_level
                        .map_or_else(|| "-1".to_string(), |l| l.to_string())
                        .into(),
                );
                args.push("-s".into());
                args.push(params.scale.to_string().into());
                if let Some(m) = model {
                    args.push("-m".into());
                    args.push(m.into());
                }
                if self.cpu {
                    args.push("-g".into());
                    args.push("-1".into());
                    if let Some(j) = self.cpu_threads {
                        args.push("-j".into());
                        args.push(format!("1:{}:1", j).into());
                    }
                }
            }
        }
        args
    }
}

/// Production backend: local header reads plus external tools.
#[derive(Debug, Clone)]
pub struct MagickBackend {
    pub magick: MagickCommand,
    pub upscaler: Upscaler,
}

impl MagickBackend {
    pub fn from_config(config: &Config) -> Self {
        Self {
            magick: MagickCommand {
                program: config.imagemagick.program.clone(),
                version7: config.imagemagick.version7,
            },
            upscaler: Upscaler {
                kind: config.upscaler.kind,
                program: config.upscaler.program(),
                model: config.upscaler.model(),
                fallback_model: config.upscaler.fallback_model(),
                cpu: config.upscaler.cpu,
                cpu_threads: config.upscaler.cpu_threads,
            },
        }
    }
}

/// Run a tool to completion, mapping failure to a [`ToolError`].
fn run(step: ToolStep, program: &str, args: &[OsString]) -> Result<(), ToolError> {
    log::debug!("{} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| {
            ToolError::new(
                step,
                spawn_failure_kind(&e),
                format!("failed to run {}: {}", program, e),
            )
        })?;
    if output.status.success() {
        return Ok(());
    }

    #[cfg(unix)]
    let signal = std::os::unix::process::ExitStatusExt::signal(&output.status);
    #[cfg(not(unix))]
    let signal = None;

    let kind = classify_exit(output.status.code(), signal);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ToolError::new(
        step,
        kind,
        format!("{} exited with {}: {}", program, output.status, stderr.trim()),
    ))
}

/// waifu2x-converter-cpp sometimes appends `.png` to the requested output.
fn fix_appended_extension(output: &Path) -> Result<(), ToolError> {
    if output.exists() {
        return Ok(());
    }
    let mut appended = output.as_os_str().to_owned();
    appended.push(".png");
    let appended = PathBuf::from(appended);
    if appended.exists() {
        std::fs::rename(&appended, output).map_err(|e| {
            ToolError::new(ToolStep::Upscale, FailureKind::Fatal, e.to_string())
        })?;
        return Ok(());
    }
    Err(ToolError::new(
        ToolStep::Upscale,
        FailureKind::Transient,
        format!("upscaler produced no output at {}", output.display()),
    ))
}

impl ImageBackend for MagickBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let reader = image::ImageReader::open(path)?.with_guessed_format()?;
        match reader.into_dimensions() {
            Ok((width, height)) => Ok(Dimensions { width, height }),
            Err(image::ImageError::Unsupported(_)) => {
                Err(BackendError::Unsupported(path.to_path_buf()))
            }
            Err(image::ImageError::IoError(e)) => Err(BackendError::Io(e)),
            Err(e) => Err(BackendError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    fn convert(&self, params: &ConvertParams) -> Result<(), ToolError> {
        run(
            ToolStep::Convert,
            &self.magick.program,
            &self.magick.convert_args(params),
        )
    }

    fn crop_pad(&self, params: &CropPadParams) -> Result<(), ToolError> {
        run(
            ToolStep::CropPad,
            &self.magick.program,
            &self.magick.crop_pad_args(params),
        )
    }

    fn upscale(&self, params: &UpscaleParams) -> Result<(), ToolError> {
        run(
            ToolStep::Upscale,
            &self.upscaler.program,
            &self.upscaler.args(params),
        )?;
        if self.upscaler.kind == UpscalerKind::ConverterCpp {
            fix_appended_extension(&params.output)?;
        }
        Ok(())
    }

    fn resize(&self, params: &ResizeParams) -> Result<(), ToolError> {
        run(
            ToolStep::Resize,
            &self.magick.program,
            &self.magick.resize_args(params),
        )
    }

    fn has_fallback_model(&self) -> bool {
        self.upscaler.fallback_model.is_some()
    }
}
