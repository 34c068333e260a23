//! Monitor enumeration.
//!
//! Monitors are read fresh at the start of every run through a
//! [`MonitorProvider`]. Two providers ship with the crate:
//!
//! - [`ConfiguredMonitors`]: fixed list from `[[monitors]]` in the config or
//!   `--monitor WxH` on the command line.
//! - [`XrandrMonitors`]: parses `xrandr --listactivemonitors`.
//!
//! Several connected monitors may share a resolution. The cache is keyed by
//! resolution, so [`unique_targets`] collapses them before a sync walks the
//! originals.

use crate::imaging::Dimensions;
use std::collections::HashMap;
use std::fmt;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
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
    #[error("invalid monitor geometry {0:?}, expected WIDTHxHEIGHT")]
    InvalidGeometry(String),
    #[error("no monitors found")]
    NoMonitors,
}

/// Aspect ratio reduced by the greatest common divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AspectRatio {
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduce `width:height` to lowest terms. A zero side yields the raw pair.
pub fn aspect_ratio(width: u32, height: u32) -> AspectRatio {
    match gcd(width, height) {
        0 => AspectRatio { x: 0, y: 0 },
        d => AspectRatio {
            x: width / d,
            y: height / d,
        },
    }
}

/// Memo table over [`aspect_ratio`], owned by one run.
#[derive(Debug, Default)]
pub struct AspectRatios {
    known: HashMap<(u32, u32), AspectRatio>,
}

impl AspectRatios {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, width: u32, height: u32) -> AspectRatio {
        *self
            .known
            .entry((width, height))
            .or_insert_with(|| aspect_ratio(width, height))
    }

    pub fn target(&mut self, width: u32, height: u32) -> MonitorTarget {
        MonitorTarget {
            width,
            height,
            aspect: self.get(width, height),
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Resolution a cache bucket is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorTarget {
    pub width: u32,
    pub height: u32,
    pub aspect: AspectRatio,
}

impl MonitorTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            aspect: aspect_ratio(width, height),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Opaque output name handed back to the wallpaper setter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorHandle(pub String);

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub handle: MonitorHandle,
    pub target: MonitorTarget,
}

/// Source of the currently connected monitors, in display order.
pub trait MonitorProvider {
    fn monitors(&self) -> Result<Vec<Monitor>, MonitorError>;
}

/// Parse `WIDTHxHEIGHT`, e.g. `2560x1440`.
pub fn parse_geometry(s: &str) -> Result<(u32, u32), MonitorError> {
    let invalid = || MonitorError::InvalidGeometry(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.parse().map_err(|_| invalid())?;
    let height: u32 = h.parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

/// One configured monitor: resolution and optional output name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSpec {
    pub width: u32,
    pub height: u32,
    pub name: Option<String>,
}

/// Fixed monitor list from configuration or the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredMonitors {
    specs: Vec<MonitorSpec>,
}

impl ConfiguredMonitors {
    pub fn new(specs: Vec<MonitorSpec>) -> Self {
        Self { specs }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl MonitorProvider for ConfiguredMonitors {
    fn monitors(&self) -> Result<Vec<Monitor>, MonitorError> {
        if self.specs.is_empty() {
            return Err(MonitorError::NoMonitors);
        }
        let mut ratios = AspectRatios::new();
        Ok(self
            .specs
            .iter()
            .enumerate()
            .map(|(i, spec)| Monitor {
                handle: MonitorHandle(
                    spec.name
                        .clone()
                        .unwrap_or_else(|| format!("monitor-{}", i)),
                ),
                target: ratios.target(spec.width, spec.height),
            })
            .collect())
    }
}

/// Queries X11 through `xrandr --listactivemonitors`.
#[derive(Debug, Clone)]
pub struct XrandrMonitors {
    program: String,
}

impl Default for XrandrMonitors {
    fn default() -> Self {
        Self {
            program: "xrandr".to_string(),
        }
    }
}

impl XrandrMonitors {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MonitorProvider for XrandrMonitors {
    fn monitors(&self) -> Result<Vec<Monitor>, MonitorError> {
        let output = Command::new(&self.program)
            .arg("--listactivemonitors")
            .output()
            .map_err(|source| MonitorError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MonitorError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let monitors = parse_xrandr(&String::from_utf8_lossy(&output.stdout));
        if monitors.is_empty() {
            return Err(MonitorError::NoMonitors);
        }
        Ok(monitors)
    }
}

/// Parse the body of `xrandr --listactivemonitors`.
///
/// ```text
/// Monitors: 2
///  0: +*DP-1 2560/597x1440/336+0+0  DP-1
///  1: +HDMI-1 1920/527x1080/296+2560+0  HDMI-1
/// ```
///
/// Lines that do not look like a monitor entry are ignored.
pub fn parse_xrandr(output: &str) -> Vec<Monitor> {
    let mut ratios = AspectRatios::new();
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 || !fields[0].ends_with(':') {
                return None;
            }
            let (width, height) = parse_xrandr_geometry(fields[2])?;
            let name = fields
                .get(3)
                .copied()
                .unwrap_or_else(|| fields[1].trim_start_matches(['+', '*']));
            Some(Monitor {
                handle: MonitorHandle(name.to_string()),
                target: ratios.target(width, height),
            })
        })
        .collect()
}

/// `2560/597x1440/336+0+0` → `(2560, 1440)`. Physical sizes are optional.
fn parse_xrandr_geometry(field: &str) -> Option<(u32, u32)> {
    let (w, rest) = field.split_once('x')?;
    let h = rest.split(['+', '-']).next()?;
    let width = w.split('/').next()?.parse().ok()?;
    let height = h.split('/').next()?.parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Distinct resolutions in first-seen order.
pub fn unique_targets(monitors: &[Monitor]) -> Vec<MonitorTarget> {
    let mut targets: Vec<MonitorTarget> = Vec::new();
    for m in monitors {
        if !targets.contains(&m.target) {
            targets.push(m.target);
        }
    }
    targets
}
