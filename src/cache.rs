//! Cache identity: keys, paths and staleness.
//!
//! Every cache entry is a pure function of (original identity, monitor
//! resolution, effective image properties):
//!
//! ```text
//! <cache_root>/<W>x<H>/<sha256-hex>.png
//! ```
//!
//! ## Cache keys
//!
//! The key is the SHA-256 of the identity alone when the properties are the
//! neutral default, so unconfigured images keep a stable key regardless of
//! how the encoding evolves. Otherwise the hash covers
//! `identity + "\0" + encode_properties(props)`. Paths cannot contain NUL, so
//! the concatenation is unambiguous.
//!
//! The encoding is a short canonical string:
//!
//! - `crop=T,B,L,R,<colour>` when any margin is non-zero. `<colour>` is the
//!   first 8 hex digits of SHA-256 over the trimmed, lower-cased background,
//!   or `-` when none is configured. With all margins zero the background
//!   never reaches the pixels and is left out.
//! - `offset=H,V` with six decimals when either offset is non-zero.
//! - `denoise=N` when the noise level differs from the default, `denoise=off`
//!   when denoising is disabled.
//!
//! Parts are joined by `;`.
//!
//! ## Staleness
//!
//! An entry is stale when it is missing, or when the original's modification
//! time is not strictly earlier than the entry's. Equal timestamps count as
//! stale, so a rewrite within the filesystem's timestamp granularity is never
//! mistaken for a fresh render.

use crate::imaging::Dimensions;
use crate::monitors::MonitorTarget;
use crate::properties::{DEFAULT_NOISE_LEVEL, ImageProperties};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Extension of finished cache entries.
pub const ENTRY_EXTENSION: &str = "png";

/// Suffix of an entry still being written.
pub const WIP_SUFFIX: &str = "-wip";

/// SHA-256 of a string, as lowercase hex.
pub fn hash_str(s: &str) -> String {
    format!("{:x}", Sha256::digest(s.as_bytes()))
}

/// SHA-256 of a path's raw bytes, as lowercase hex.
///
/// Used to name scratch files, so two originals never share intermediates.
pub fn hash_path(path: &Path) -> String {
    format!("{:x}", Sha256::digest(path.as_os_str().as_encoded_bytes()))
}

/// 32-bit token standing in for a background colour.
///
/// A collision between two colours used on the same image and aspect ratio
/// would make them share an entry; at 2^-32 this is accepted.
pub fn colour_token(colour: Option<&str>) -> String {
    match colour {
        None => "-".to_string(),
        Some(c) => {
            let digest = Sha256::digest(c.trim().to_lowercase().as_bytes());
            format!("{:x}", digest)[..8].to_string()
        }
    }
}

/// Canonical encoding of non-default properties. Empty for the default.
pub fn encode_properties(props: &ImageProperties) -> String {
    let mut parts = Vec::with_capacity(3);
    let margins = props.margins();
    if !margins.is_zero() {
        parts.push(format!(
            "crop={},{},{},{},{}",
            margins.top,
            margins.bottom,
            margins.left,
            margins.right,
            colour_token(props.background.as_deref())
        ));
    }
    let offset = props.offset();
    if !offset.is_zero() {
        parts.push(format!(
            "offset={:.6},{:.6}",
            offset.horizontal, offset.vertical
        ));
    }
    match props.noise_level() {
        Some(DEFAULT_NOISE_LEVEL) => {}
        Some(level) => parts.push(format!("denoise={}", level)),
        None => parts.push("denoise=off".to_string()),
    }
    parts.join(";")
}

/// Cache key for an identity with its effective properties.
pub fn derive_key(identity: &str, props: &ImageProperties) -> String {
    if props.is_default() {
        hash_str(identity)
    } else {
        hash_str(&format!("{}\0{}", identity, encode_properties(props)))
    }
}

/// Name of the bucket directory for a resolution, `WxH`.
pub fn bucket_name(width: u32, height: u32) -> String {
    format!("{}x{}", width, height)
}

/// Recognise a bucket directory name. Only canonical `WxH` decimal names
/// (no sign, no leading zero, both sides non-zero) qualify.
pub fn parse_bucket(name: &str) -> Option<Dimensions> {
    let (w, h) = name.split_once('x')?;
    let canonical = |s: &str| {
        !s.is_empty() && !s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !canonical(w) || !canonical(h) {
        return None;
    }
    Some(Dimensions::new(w.parse().ok()?, h.parse().ok()?))
}

/// Path of the temporary file an entry is written to before the rename.
pub fn wip_path(entry: &Path) -> PathBuf {
    let mut s = entry.as_os_str().to_owned();
    s.push(WIP_SUFFIX);
    PathBuf::from(s)
}

/// Layout of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, target: &MonitorTarget) -> PathBuf {
        self.root.join(bucket_name(target.width, target.height))
    }

    pub fn entry_path(
        &self,
        identity: &str,
        props: &ImageProperties,
        target: &MonitorTarget,
    ) -> PathBuf {
        self.bucket_dir(target)
            .join(format!("{}.{}", derive_key(identity, props), ENTRY_EXTENSION))
    }
}

/// Whether `entry` must be (re)rendered from `original`.
///
/// A missing entry is stale. Any other stat failure on either file is
/// returned to the caller.
pub fn is_stale(original: &Path, entry: &Path) -> io::Result<bool> {
    let entry_mtime = match std::fs::metadata(entry) {
        Ok(m) => m.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    let original_mtime = std::fs::metadata(original)?.modified()?;
    Ok(original_mtime >= entry_mtime)
}

/// Summary of cache activity for a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub rendered: u32,
    pub failed: u32,
    /// Stale entries left alone because the budget ran out.
    pub skipped: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn render(&mut self) {
        self.rendered += 1;
    }

    pub fn fail(&mut self) {
        self.failed += 1;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.rendered += other.rendered;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.rendered + self.failed + self.skipped
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cached, {} rendered", self.hits, self.rendered)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.skipped > 0 {
            write!(f, ", {} over limit", self.skipped)?;
        }
        write!(f, " ({} total)", self.total())
    }
}
