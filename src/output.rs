//! CLI output formatting for every command.
//!
//! Each command has a `format_*` function returning display lines, and a
//! `print_*` wrapper that writes them to stdout. Format functions are pure,
//! so the exact text is covered by unit tests. Diagnostics go through `log`
//! instead and never appear here.
//!
//! # Output Format
//!
//! ## Sync
//!
//! ```text
//! Syncing 412 originals for 1920x1080, 2560x1440
//!     1920x1080 a/sunset.jpg
//!     2560x1440 a/sunset.jpg (reused upscale)
//!     failed b/broken.png: could not decode ...
//! 200/412 originals checked
//! ...
//! 820 cached, 4 rendered, 1 failed (825 total)
//! Pruned 3 entries
//! ```
//!
//! ## Monitors
//!
//! ```text
//! DP-1    2560x1440 (16:9)
//! HDMI-1  1920x1080 (16:9)
//! ```

use crate::cache::CacheStats;
use crate::monitors::{AspectRatio, Monitor};
use crate::properties::ImageProperties;
use crate::sync::{SyncEvent, SyncOutcome};
use crate::wallpaper::Assignment;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{} {}", n, if n == 1 { one } else { many })
}

// ============================================================================
// Sync
// ============================================================================

/// Format a single sync progress event as display lines.
pub fn format_sync_event(event: &SyncEvent) -> Vec<String> {
    match event {
        SyncEvent::Started { originals, targets } => {
            let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
            vec![format!(
                "Syncing {} for {}",
                plural(*originals, "original", "originals"),
                if targets.is_empty() {
                    "no monitors".to_string()
                } else {
                    targets.join(", ")
                }
            )]
        }
        SyncEvent::Rendered {
            identity,
            target,
            reused_intermediate,
        } => {
            let suffix = if *reused_intermediate {
                " (reused upscale)"
            } else {
                ""
            };
            vec![format!("{}{} {}{}", indent(1), target, identity, suffix)]
        }
        SyncEvent::Failed { identity, error } => {
            vec![format!("{}failed {}: {}", indent(1), identity, error)]
        }
        SyncEvent::BatchFinished { done, total } => {
            vec![format!("{}/{} originals checked", done, total)]
        }
        SyncEvent::ScratchCleared { .. } => Vec::new(),
        SyncEvent::LimitReached => {
            vec!["Render limit reached, remaining entries left as they are".to_string()]
        }
    }
}

/// Final lines after a sync: totals, pruning and failures.
pub fn format_sync_summary(outcome: &SyncOutcome) -> Vec<String> {
    let report = outcome.report();
    let mut lines = vec![format_stats(&report.stats)];

    if outcome.is_cancelled() {
        lines.push("Cancelled, nothing pruned".to_string());
    } else if let Some(pruned) = &report.pruned {
        if !pruned.removed.is_empty() || !pruned.removed_buckets.is_empty() {
            let mut line = format!(
                "Pruned {}",
                plural(pruned.removed.len(), "entry", "entries")
            );
            if !pruned.removed_buckets.is_empty() {
                line.push_str(&format!(
                    " and {}",
                    plural(
                        pruned.removed_buckets.len(),
                        "empty bucket",
                        "empty buckets"
                    )
                ));
            }
            lines.push(line);
        }
    }

    if !report.failures.is_empty() {
        lines.push(format!(
            "{} could not be rendered:",
            plural(report.failures.len(), "original", "originals")
        ));
        for failure in &report.failures {
            lines.push(format!(
                "{}{} ({})",
                indent(1),
                failure.identity,
                failure.path.display()
            ));
        }
    }
    lines
}

pub fn format_stats(stats: &CacheStats) -> String {
    stats.to_string()
}

pub fn print_sync_summary(outcome: &SyncOutcome) {
    for line in format_sync_summary(outcome) {
        println!("{}", line);
    }
}

// ============================================================================
// Monitors and wallpapers
// ============================================================================

/// One line per monitor, names padded to a common width.
pub fn format_monitors(monitors: &[Monitor]) -> Vec<String> {
    let width = monitors
        .iter()
        .map(|m| m.handle.0.len())
        .max()
        .unwrap_or(0);
    monitors
        .iter()
        .map(|m| {
            format!(
                "{:<width$}  {} ({})",
                m.handle.0,
                m.target,
                m.target.aspect,
                width = width
            )
        })
        .collect()
}

pub fn print_monitors(monitors: &[Monitor]) {
    for line in format_monitors(monitors) {
        println!("{}", line);
    }
}

pub fn format_assignment(assignment: &Assignment) -> Vec<String> {
    assignment
        .iter()
        .map(|(handle, path)| format!("{} \u{2192} {}", handle, path.display()))
        .collect()
}

pub fn print_assignment(assignment: &Assignment) {
    for line in format_assignment(assignment) {
        println!("{}", line);
    }
}

// ============================================================================
// Properties and check
// ============================================================================

/// Property entries whose identity matches no original.
pub fn format_unmatched(unmatched: &[(String, Option<AspectRatio>)]) -> Vec<String> {
    if unmatched.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!(
        "Properties without a matching original ({}):",
        unmatched.len()
    )];
    for (identity, aspect) in unmatched {
        match aspect {
            Some(aspect) => lines.push(format!("{}{} [{}]", indent(1), identity, aspect)),
            None => lines.push(format!("{}{}", indent(1), identity)),
        }
    }
    lines
}

pub fn print_unmatched(unmatched: &[(String, Option<AspectRatio>)]) {
    for line in format_unmatched(unmatched) {
        println!("{}", line);
    }
}

/// Summary printed by `check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub roots: usize,
    pub originals: usize,
    pub property_entries: usize,
    pub unmatched: Vec<(String, Option<AspectRatio>)>,
}

pub fn format_check(summary: &CheckSummary) -> Vec<String> {
    let mut lines = vec![
        "Config OK".to_string(),
        format!(
            "{}Originals: {} in {}",
            indent(1),
            summary.originals,
            plural(summary.roots, "root", "roots")
        ),
        format!("{}Properties: {}", indent(1), summary.property_entries),
    ];
    lines.extend(format_unmatched(&summary.unmatched));
    lines
}

pub fn print_check(summary: &CheckSummary) {
    for line in format_check(summary) {
        println!("{}", line);
    }
}

// ============================================================================
// Interactive
// ============================================================================

/// A `.properties.toml` table for `identity`, ready to paste.
///
/// With an aspect ratio the header is `["id".W.H]`, otherwise the image-wide
/// `["id"]`. Only fields that differ from the default are listed.
pub fn format_properties_toml(
    identity: &str,
    aspect: Option<AspectRatio>,
    props: &ImageProperties,
) -> Vec<String> {
    let key = toml::Value::String(identity.to_string());
    let mut lines = vec![match aspect {
        Some(a) => format!("[{}.{}.{}]", key, a.x, a.y),
        None => format!("[{}]", key),
    }];
    for (name, value) in [("vertical", props.vertical), ("horizontal", props.horizontal)] {
        if value != 0.0 {
            lines.push(format!("{} = {}", name, toml::Value::Float(value)));
        }
    }
    for (name, value) in [
        ("top", props.top),
        ("bottom", props.bottom),
        ("left", props.left),
        ("right", props.right),
    ] {
        if value != 0 {
            lines.push(format!("{} = {}", name, value));
        }
    }
    if let Some(background) = &props.background {
        lines.push(format!(
            "background = {}",
            toml::Value::String(background.clone())
        ));
    }
    if let Some(denoise) = props.denoise {
        lines.push(format!("denoise = {}", denoise));
    }
    lines
}
