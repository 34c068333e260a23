//! Configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialized to a TOML table and the user's file is deep-merged on top, so
//! the file only needs the keys that differ.
//!
//! ## Config File Location
//!
//! `$XDG_CONFIG_HOME/wallpaper-cache/config.toml` unless `--config` is given.
//!
//! ## Configuration Options
//!
//! ```toml
//! cache_directory = "~/.cache/wallpaper-cache"
//! # temp_directory = "/tmp"      # scratch space parent, system default if unset
//! database = "~/.local/share/wallpaper-cache/selection.json"
//! image_extensions = ["jpg", "jpeg", "png", "bmp", "gif", "webp", "tiff"]
//!
//! [[originals]]
//! path = "~/Pictures/wallpapers"
//! prefix = ""                     # prepended to every identity from this root
//!
//! [imagemagick]
//! program = "convert"
//! version7 = false                # run `magick convert` instead
//!
//! [upscaler]
//! kind = "waifu2x-ncnn-vulkan"    # or waifu2x-caffe, waifu2x-converter-cpp
//! # program = "/opt/waifu2x/waifu2x-ncnn-vulkan"
//! # model = "models-cunet"
//! # fallback_model = "models-upconv_7_photo"
//! cpu = false
//! # cpu_threads = 4
//!
//! [processing]
//! # max_processes = 4
//! batch_size = 200
//! cleanup_threshold = 100
//! retry_delay_secs = 5
//!
//! [[monitors]]                    # only used when xrandr is not wanted
//! width = 2560
//! height = 1440
//! name = "DP-1"
//!
//! [wallpaper]
//! command = ["feh", "--no-fehbg", "--bg-fill"]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::monitors::MonitorSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the per-monitor cache buckets.
    pub cache_directory: String,
    /// Parent of the scratch directory. System temp dir when unset.
    pub temp_directory: Option<String>,
    /// Selection store file used by `random`.
    pub database: String,
    /// Lowercase extensions (without dot) that count as originals.
    pub image_extensions: Vec<String>,
    pub originals: Vec<OriginalsConfig>,
    pub imagemagick: ImageMagickConfig,
    pub upscaler: UpscalerConfig,
    pub processing: ProcessingConfig,
    /// Fixed monitor list. Empty means ask xrandr.
    pub monitors: Vec<MonitorConfig>,
    pub wallpaper: WallpaperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_directory: "~/.cache/wallpaper-cache".to_string(),
            temp_directory: None,
            database: "~/.local/share/wallpaper-cache/selection.json".to_string(),
            image_extensions: ["jpg", "jpeg", "png", "bmp", "gif", "webp", "tiff"]
                .into_iter()
                .map(String::from)
                .collect(),
            originals: Vec::new(),
            imagemagick: ImageMagickConfig::default(),
            upscaler: UpscalerConfig::default(),
            processing: ProcessingConfig::default(),
            monitors: Vec::new(),
            wallpaper: WallpaperConfig::default(),
        }
    }
}

impl Config {
    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_directory.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cache_directory must not be empty".into(),
            ));
        }
        if self.image_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "image_extensions must not be empty".into(),
            ));
        }
        if let Some(ext) = self.image_extensions.iter().find(|e| e.starts_with('.')) {
            return Err(ConfigError::Validation(format!(
                "image_extensions entries must not start with a dot: {:?}",
                ext
            )));
        }
        if self.originals.iter().any(|o| o.path.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "originals.path must not be empty".into(),
            ));
        }
        if self.processing.batch_size == 0 {
            return Err(ConfigError::Validation(
                "processing.batch_size must be non-zero".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be non-zero".into(),
            ));
        }
        if self.upscaler.cpu_threads == Some(0) {
            return Err(ConfigError::Validation(
                "upscaler.cpu_threads must be non-zero".into(),
            ));
        }
        if self.monitors.iter().any(|m| m.width == 0 || m.height == 0) {
            return Err(ConfigError::Validation(
                "monitors width and height must be non-zero".into(),
            ));
        }
        if self.wallpaper.command.is_empty() {
            return Err(ConfigError::Validation(
                "wallpaper.command must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_root(&self) -> PathBuf {
        expand_tilde(&self.cache_directory)
    }

    pub fn temp_root(&self) -> Option<PathBuf> {
        self.temp_directory.as_deref().map(expand_tilde)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_tilde(&self.database)
    }

    pub fn originals_sources(&self) -> Vec<OriginalsSource> {
        self.originals
            .iter()
            .map(|o| OriginalsSource {
                path: expand_tilde(&o.path),
                prefix: o.prefix.clone(),
            })
            .collect()
    }

    pub fn monitor_specs(&self) -> Vec<MonitorSpec> {
        self.monitors
            .iter()
            .map(|m| MonitorSpec {
                width: m.width,
                height: m.height,
                name: m.name.clone(),
            })
            .collect()
    }
}

/// One `[[originals]]` root as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OriginalsConfig {
    pub path: String,
    #[serde(default)]
    pub prefix: String,
}

/// An originals root with its path resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalsSource {
    pub path: PathBuf,
    /// Prepended verbatim to every identity found under `path`.
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageMagickConfig {
    pub program: String,
    /// ImageMagick 7 ships a single `magick` binary; `convert` becomes a
    /// subcommand.
    pub version7: bool,
}

impl Default for ImageMagickConfig {
    fn default() -> Self {
        Self {
            program: "convert".to_string(),
            version7: false,
        }
    }
}

/// Supported waifu2x front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpscalerKind {
    #[serde(rename = "waifu2x-caffe")]
    Caffe,
    #[serde(rename = "waifu2x-converter-cpp")]
    ConverterCpp,
    #[serde(rename = "waifu2x-ncnn-vulkan")]
    NcnnVulkan,
}

impl UpscalerKind {
    pub fn default_program(self) -> &'static str {
        match self {
            UpscalerKind::Caffe => "waifu2x-caffe-cui",
            UpscalerKind::ConverterCpp => "waifu2x-converter-cpp",
            UpscalerKind::NcnnVulkan => "waifu2x-ncnn-vulkan",
        }
    }

    /// Model directory used when none is configured.
    pub fn default_model(self) -> Option<&'static str> {
        match self {
            UpscalerKind::Caffe => Some("models/upconv_7_anime_style_art_rgb"),
            UpscalerKind::ConverterCpp | UpscalerKind::NcnnVulkan => None,
        }
    }

    /// Slower model retried after the primary one crashes.
    pub fn default_fallback_model(self) -> Option<&'static str> {
        match self {
            UpscalerKind::Caffe => Some("models/anime_style_art_rgb"),
            UpscalerKind::ConverterCpp | UpscalerKind::NcnnVulkan => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpscalerConfig {
    pub kind: UpscalerKind,
    /// Executable, defaults per kind.
    pub program: Option<String>,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    /// Force CPU processing.
    pub cpu: bool,
    pub cpu_threads: Option<u32>,
}

impl Default for UpscalerConfig {
    fn default() -> Self {
        Self {
            kind: UpscalerKind::NcnnVulkan,
            program: None,
            model: None,
            fallback_model: None,
            cpu: false,
            cpu_threads: None,
        }
    }
}

impl UpscalerConfig {
    pub fn program(&self) -> String {
        self.program
            .clone()
            .unwrap_or_else(|| self.kind.default_program().to_string())
    }

    pub fn model(&self) -> Option<String> {
        self.model
            .clone()
            .or_else(|| self.kind.default_model().map(String::from))
    }

    pub fn fallback_model(&self) -> Option<String> {
        self.fallback_model
            .clone()
            .or_else(|| self.kind.default_fallback_model().map(String::from))
    }
}

/// `[processing]`: worker pool, batching and retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Parallel workers, capped at the core count. Unset means one per core.
    pub max_processes: Option<usize>,
    /// Originals dispatched per batch.
    pub batch_size: usize,
    /// Scratch is cleared after a batch once more than this many entries
    /// were produced since the last clear.
    pub cleanup_threshold: usize,
    /// Pause before retrying a transient tool failure.
    pub retry_delay_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            batch_size: 200,
            cleanup_threshold: 100,
            retry_delay_secs: 5,
        }
    }
}

impl ProcessingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Worker threads for a sync run: `max_processes` capped at the available
/// parallelism.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WallpaperConfig {
    /// Program and leading arguments; one image path per monitor is appended.
    pub command: Vec<String>,
}

impl Default for WallpaperConfig {
    fn default() -> Self {
        Self {
            command: ["feh", "--no-fehbg", "--bg-fill"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// `$XDG_CONFIG_HOME/wallpaper-cache/config.toml`, falling back to the
/// working directory when no config dir is known.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("wallpaper-cache"))
        .unwrap_or_default()
        .join("config.toml")
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// `Config::default()` as a TOML table, the bottom layer of every load.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Deep-merge `overlay` into `base`.
///
/// Tables merge per key. Any other overlay value, arrays included, replaces
/// the base value wholesale, so `[[originals]]` in a user file replaces the
/// default list instead of extending it.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// The user file as an untyped TOML value, `None` when there is no file.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Deserialize `base` with `overlay` merged on top and validate the result.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`.
///
/// User values win over the stock defaults; unknown keys and out-of-range
/// values are errors. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Documented `config.toml` printed by `gen-config`. Parses back to the
/// defaults.
pub fn stock_config_toml() -> &'static str {
    r##"# wallpaper-cache configuration
# =============================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Where rendered wallpapers are kept, one WIDTHxHEIGHT directory per
# monitor resolution.
cache_directory = "~/.cache/wallpaper-cache"

# Parent directory for the per-run scratch directory holding intermediate
# files. Pick a fast disk with room for a few large bitmaps.
# temp_directory = "/tmp"

# File recording which wallpapers `random` has already shown.
database = "~/.local/share/wallpaper-cache/selection.json"

# Extensions (case-insensitive, no leading dot) treated as originals.
image_extensions = ["jpg", "jpeg", "png", "bmp", "gif", "webp", "tiff"]

# ---------------------------------------------------------------------------
# Originals
# ---------------------------------------------------------------------------
# One block per directory of source images. The prefix is prepended to the
# path of every image found below `path` to form its identity, which must be
# unique across all directories.
#
# [[originals]]
# path = "~/Pictures/wallpapers"
# prefix = ""

# ---------------------------------------------------------------------------
# ImageMagick
# ---------------------------------------------------------------------------
[imagemagick]
program = "convert"
# Set for ImageMagick 7, where `program` is `magick`.
version7 = false

# ---------------------------------------------------------------------------
# Upscaler
# ---------------------------------------------------------------------------
[upscaler]
# waifu2x-caffe, waifu2x-converter-cpp or waifu2x-ncnn-vulkan
kind = "waifu2x-ncnn-vulkan"
# Executable. Defaults to the usual binary name for `kind`.
# program = "waifu2x-ncnn-vulkan"
# Model directory, and the one retried when the upscaler crashes on an input.
# model = "models-cunet"
# fallback_model = "models-upconv_7_anime_style_art_rgb"
# Run on the CPU instead of the GPU.
cpu = false
# cpu_threads = 4

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# Originals handed to the workers per batch.
batch_size = 200

# Clear scratch files after a batch once more than this many wallpapers were
# rendered since the last clear.
cleanup_threshold = 100

# Seconds to wait before retrying a failed external tool.
retry_delay_secs = 5

# ---------------------------------------------------------------------------
# Monitors
# ---------------------------------------------------------------------------
# Leave empty to query xrandr. Listed monitors are used in order.
#
# [[monitors]]
# width = 2560
# height = 1440
# name = "DP-1"

# ---------------------------------------------------------------------------
# Wallpaper setter
# ---------------------------------------------------------------------------
[wallpaper]
# One image path per monitor is appended, in monitor order.
command = ["feh", "--no-fehbg", "--bg-fill"]
"##
}
