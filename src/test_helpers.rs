//! Shared test utilities for the wallpaper-cache test suite.
//!
//! File fixtures for tests that touch the filesystem: tiny real images,
//! placeholder files and explicit modification times for staleness checks.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let original = tmp.path().join("walls/a.png");
//! write_png(&original, 40, 30);
//! set_mtime(&original, 1_000);
//! ```

use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

// =========================================================================
// Fixture files
// =========================================================================

/// Write a real `width`x`height` PNG, creating parent directories.
pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save_with_format(path, image::ImageFormat::Png).unwrap();
}

/// Write a placeholder file, creating parent directories.
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"x").unwrap();
}

/// Set the modification time to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_png_produces_readable_image() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/a.png");
        write_png(&path, 12, 7);
        assert_eq!(image::image_dimensions(&path).unwrap(), (12, 7));
    }

    #[test]
    fn set_mtime_is_observable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        touch(&path);
        set_mtime(&path, 42);
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(mtime, SystemTime::UNIX_EPOCH + Duration::from_secs(42));
    }
}
