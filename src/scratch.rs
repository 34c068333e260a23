//! Process-lifetime scratch directory for intermediate files.
//!
//! Created once per run (prefix `wallpapers`, inside `temp_directory` when
//! configured) and removed when the [`ScratchSpace`] is dropped, which covers
//! normal exit, errors and cancellation alike.
//!
//! File names are derived from a hash of the input path plus the crop
//! descriptor and scale, so two monitors needing the same intermediate for
//! the same original compute the same name and the second one reuses it.

use crate::cache::hash_path;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("wallpapers");
        let dir = match parent {
            Some(p) => builder.tempdir_in(p)?,
            None => builder.tempdir()?,
        };
        log::debug!("scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// PNG re-encoding of an input the local decoder could not read.
    pub fn converted_path(&self, input: &Path) -> PathBuf {
        self.path()
            .join(format!("{}-converted.png", hash_path(input)))
    }

    pub fn cropped_path(&self, input: &Path, crop: &str) -> PathBuf {
        self.path()
            .join(format!("{}-{}-cropped.bmp", hash_path(input), crop))
    }

    /// Upscaled intermediate. `n` stands for no denoising in the name.
    pub fn intermediate_path(
        &self,
        input: &Path,
        scale: u32,
        noise_level: Option<u8>,
        crop: &str,
    ) -> PathBuf {
        let noise = noise_level.map_or_else(|| "n".to_string(), |l| l.to_string());
        self.path().join(format!(
            "{}-{}-{}-{}-intermediate.bmp",
            hash_path(input),
            scale,
            noise,
            crop
        ))
    }

    /// Where a preview render of `input` for `target` lands.
    pub fn preview_path(&self, input: &Path, target: &str) -> PathBuf {
        self.path()
            .join(format!("{}-{}-preview.png", hash_path(input), target))
    }

    /// Delete everything inside the scratch directory, keeping the directory.
    pub fn partial_cleanup(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(self.path())? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        log::debug!("cleared {} scratch files", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_inside_configured_parent() {
        let parent = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(parent.path())).unwrap();
        assert!(scratch.path().starts_with(parent.path()));
        let name = scratch.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("wallpapers"));
    }

    #[test]
    fn dropped_scratch_is_removed() {
        let parent = TempDir::new().unwrap();
        let scratch = ScratchSpace::create(Some(parent.path())).unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("f.bmp"), b"x").unwrap();
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn names_are_deterministic_per_input() {
        let scratch = ScratchSpace::create(None).unwrap();
        let a = Path::new("/walls/a.png");
        let b = Path::new("/walls/b.png");
        assert_eq!(
            scratch.intermediate_path(a, 4, Some(1), ""),
            scratch.intermediate_path(a, 4, Some(1), "")
        );
        assert_ne!(
            scratch.intermediate_path(a, 4, Some(1), ""),
            scratch.intermediate_path(b, 4, Some(1), "")
        );
        assert_ne!(
            scratch.intermediate_path(a, 4, Some(1), ""),
            scratch.intermediate_path(a, 8, Some(1), "")
        );
        assert_ne!(
            scratch.intermediate_path(a, 4, Some(1), ""),
            scratch.intermediate_path(a, 4, Some(1), "10x10+1+1!")
        );
        assert_ne!(
            scratch.intermediate_path(a, 4, Some(1), ""),
            scratch.intermediate_path(a, 4, Some(2), "")
        );
        assert_ne!(
            scratch.intermediate_path(a, 4, Some(1), ""),
            scratch.intermediate_path(a, 4, None, "")
        );
        assert!(
            scratch
                .cropped_path(a, "x")
                .to_string_lossy()
                .ends_with("-x-cropped.bmp")
        );
        assert!(
            scratch
                .converted_path(a)
                .to_string_lossy()
                .ends_with("-converted.png")
        );
    }

    #[test]
    fn partial_cleanup_empties_but_keeps_dir() {
        let scratch = ScratchSpace::create(None).unwrap();
        std::fs::write(scratch.path().join("a.bmp"), b"x").unwrap();
        std::fs::write(scratch.path().join("b.bmp"), b"x").unwrap();
        std::fs::create_dir(scratch.path().join("sub")).unwrap();

        assert_eq!(scratch.partial_cleanup().unwrap(), 3);
        assert!(scratch.path().is_dir());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
