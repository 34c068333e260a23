//! Per-image crop, pad, recentring and denoise properties.
//!
//! Each originals root may carry a `.properties.toml` file. Keys are the
//! image path relative to that root. Values at the image level apply to every
//! aspect ratio; a nested `W.H` table replaces them for monitors of that
//! aspect ratio:
//!
//! ```toml
//! ["landscapes/fjord.jpg"]
//! denoise = 2          # waifu2x noise level, -1 disables denoising
//!
//! ["landscapes/fjord.jpg".16.9]
//! vertical = 12.5      # percent, positive moves the viewport up
//! top = 40             # pixels cropped from the top edge
//!
//! ["portraits/cat.png".16.9]
//! left = -300          # negative pads
//! right = -300
//! background = "#202020"
//! ```
//!
//! An aspect table is not merged with the image-level values, it stands on
//! its own. Anything not listed uses the all-zero default, which leaves the
//! image untouched apart from the default denoise pass.

use crate::config::OriginalsSource;
use crate::imaging::{Margins, Offset};
use crate::monitors::AspectRatio;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in each originals root.
pub const PROPERTIES_FILENAME: &str = ".properties.toml";

/// Default pad colour when none is configured.
pub const DEFAULT_BACKGROUND: &str = "black";

/// waifu2x noise level used when an image sets none.
pub const DEFAULT_NOISE_LEVEL: u8 = 1;

/// Accepted values of `denoise`. Negative disables denoising.
pub const DENOISE_RANGE: std::ops::RangeInclusive<i32> = -1..=3;

#[derive(Error, Debug)]
pub enum PropertiesError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{}: invalid aspect ratio {key:?} for {image}", path.display())]
    InvalidAspect {
        path: PathBuf,
        image: String,
        key: String,
    },
    #[error("{}: denoise level {level} for {image} is outside -1..=3", path.display())]
    InvalidDenoise {
        path: PathBuf,
        image: String,
        level: i32,
    },
}

/// Effective properties of one image on one aspect ratio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageProperties {
    pub vertical: f64,
    pub horizontal: f64,
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
    pub background: Option<String>,
    /// waifu2x noise level. Unset means [`DEFAULT_NOISE_LEVEL`].
    pub denoise: Option<i32>,
}

impl ImageProperties {
    pub fn margins(&self) -> Margins {
        Margins {
            top: self.top,
            bottom: self.bottom,
            left: self.left,
            right: self.right,
        }
    }

    pub fn offset(&self) -> Offset {
        Offset {
            horizontal: self.horizontal,
            vertical: self.vertical,
        }
    }

    /// Noise level handed to the upscaler, `None` when denoising is off.
    pub fn noise_level(&self) -> Option<u8> {
        match self.denoise {
            None => Some(DEFAULT_NOISE_LEVEL),
            Some(n) if n < 0 => None,
            Some(n) => u8::try_from(n.min(*DENOISE_RANGE.end())).ok(),
        }
    }

    /// True when neither margins nor offsets are set and the noise level is
    /// the default. The background alone has no effect without padding.
    pub fn is_default(&self) -> bool {
        self.margins().is_zero()
            && self.offset().is_zero()
            && self.noise_level() == Some(DEFAULT_NOISE_LEVEL)
    }

    pub fn background_or_default(&self) -> &str {
        self.background.as_deref().unwrap_or(DEFAULT_BACKGROUND)
    }
}

/// Properties of one image: image-wide values and per-aspect replacements.
#[derive(Debug, Clone, Default)]
struct ImageEntry {
    all: Option<ImageProperties>,
    by_aspect: HashMap<AspectRatio, ImageProperties>,
}

/// All per-image properties, keyed by identity and aspect ratio.
#[derive(Debug, Clone, Default)]
pub struct PropertiesTable {
    entries: HashMap<String, ImageEntry>,
}

impl PropertiesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `.properties.toml` from every originals root. Missing files are
    /// fine; unreadable or malformed ones are errors.
    pub fn load(sources: &[OriginalsSource]) -> Result<Self, PropertiesError> {
        let mut table = Self::new();
        for source in sources {
            let path = source.path.join(PROPERTIES_FILENAME);
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| PropertiesError::Io {
                path: path.clone(),
                source: e,
            })?;
            table.merge_str(&content, &source.prefix, &path)?;
            log::debug!("loaded image properties from {}", path.display());
        }
        Ok(table)
    }

    /// Parse one properties file, prefixing its keys with `prefix`.
    ///
    /// Inside an image table, table-valued keys are aspect widths and
    /// everything else is an image-wide property.
    pub fn merge_str(
        &mut self,
        content: &str,
        prefix: &str,
        path: &Path,
    ) -> Result<(), PropertiesError> {
        let parse_err = |source| PropertiesError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let raw: BTreeMap<String, toml::Table> = toml::from_str(content).map_err(parse_err)?;

        for (image, table) in raw {
            let identity = format!("{}{}", prefix, image);
            let invalid_aspect = |key: String| PropertiesError::InvalidAspect {
                path: path.to_path_buf(),
                image: image.clone(),
                key,
            };

            let mut own = toml::Table::new();
            let mut widths = Vec::new();
            for (key, value) in table {
                match value {
                    toml::Value::Table(heights) => widths.push((key, heights)),
                    other => {
                        own.insert(key, other);
                    }
                }
            }

            if !own.is_empty() {
                let props: ImageProperties =
                    toml::Value::Table(own).try_into().map_err(parse_err)?;
                check_denoise(&props, &image, path)?;
                self.insert_image(&identity, props);
            }

            for (w, heights) in widths {
                for (h, value) in heights {
                    let key = format!("{}.{}", w, h);
                    let (Ok(x), Ok(y)) = (w.parse::<u32>(), h.parse::<u32>()) else {
                        return Err(invalid_aspect(key));
                    };
                    let toml::Value::Table(props) = value else {
                        return Err(invalid_aspect(key));
                    };
                    let props: ImageProperties =
                        toml::Value::Table(props).try_into().map_err(parse_err)?;
                    check_denoise(&props, &image, path)?;
                    self.insert(&identity, AspectRatio { x, y }, props);
                }
            }
        }
        Ok(())
    }

    /// Properties for `identity` on one aspect ratio.
    pub fn insert(&mut self, identity: &str, aspect: AspectRatio, props: ImageProperties) {
        self.entries
            .entry(identity.to_string())
            .or_default()
            .by_aspect
            .insert(aspect, props);
    }

    /// Properties for `identity` on every aspect ratio without its own table.
    pub fn insert_image(&mut self, identity: &str, props: ImageProperties) {
        self.entries.entry(identity.to_string()).or_default().all = Some(props);
    }

    /// Properties for `identity` on `aspect`: the aspect table, then the
    /// image-wide table, then the default.
    pub fn lookup(&self, identity: &str, aspect: AspectRatio) -> ImageProperties {
        self.entries
            .get(identity)
            .and_then(|entry| entry.by_aspect.get(&aspect).or(entry.all.as_ref()))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of tables, image-wide and per-aspect.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.by_aspect.len() + usize::from(e.all.is_some()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tables whose identity matches no known original, sorted. Image-wide
    /// tables have no aspect ratio.
    pub fn unmatched<'a>(
        &self,
        identities: impl IntoIterator<Item = &'a str>,
    ) -> Vec<(String, Option<AspectRatio>)> {
        let known: HashSet<&str> = identities.into_iter().collect();
        let mut out: Vec<(String, Option<AspectRatio>)> = self
            .entries
            .iter()
            .filter(|(identity, _)| !known.contains(identity.as_str()))
            .flat_map(|(identity, entry)| {
                let all = entry.all.as_ref().map(|_| (identity.clone(), None));
                all.into_iter().chain(
                    entry
                        .by_aspect
                        .keys()
                        .map(move |a| (identity.clone(), Some(*a))),
                )
            })
            .collect();
        out.sort();
        out
    }
}

fn check_denoise(
    props: &ImageProperties,
    image: &str,
    path: &Path,
) -> Result<(), PropertiesError> {
    match props.denoise {
        Some(level) if !DENOISE_RANGE.contains(&level) => Err(PropertiesError::InvalidDenoise {
            path: path.to_path_buf(),
            image: image.to_string(),
            level,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SIXTEEN_NINE: AspectRatio = AspectRatio { x: 16, y: 9 };

    fn parse(content: &str, prefix: &str) -> PropertiesTable {
        let mut t = PropertiesTable::new();
        t.merge_str(content, prefix, Path::new("test.toml")).unwrap();
        t
    }

    #[test]
    fn default_properties_are_neutral() {
        let p = ImageProperties::default();
        assert!(p.is_default());
        assert_eq!(p.background_or_default(), "black");
    }

    #[test]
    fn background_alone_is_still_default() {
        let p = ImageProperties {
            background: Some("white".into()),
            ..Default::default()
        };
        assert!(p.is_default());
    }

    #[test]
    fn lookup_by_identity_and_aspect() {
        let t = parse(
            r##"
["a/fjord.jpg".16.9]
vertical = 12.5
top = 40

["a/fjord.jpg".4.3]
left = -10
right = -10
background = "#202020"
"##,
            "",
        );
        let wide = t.lookup("a/fjord.jpg", SIXTEEN_NINE);
        assert_eq!(wide.vertical, 12.5);
        assert_eq!(wide.top, 40);
        assert!(!wide.is_default());

        let square = t.lookup("a/fjord.jpg", AspectRatio { x: 4, y: 3 });
        assert_eq!(square.margins().left, -10);
        assert_eq!(square.background_or_default(), "#202020");

        assert!(t.lookup("a/fjord.jpg", AspectRatio { x: 5, y: 4 }).is_default());
        assert!(t.lookup("other.jpg", SIXTEEN_NINE).is_default());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn prefix_is_prepended_to_keys() {
        let t = parse("[\"cat.png\".16.9]\nhorizontal = 5.0\n", "pets/");
        assert_eq!(t.lookup("pets/cat.png", SIXTEEN_NINE).horizontal, 5.0);
        assert!(t.lookup("cat.png", SIXTEEN_NINE).is_default());
    }

    #[test]
    fn unknown_property_is_rejected() {
        let mut t = PropertiesTable::new();
        let err = t
            .merge_str("[\"x.png\".16.9]\nzoom = 2\n", "", Path::new("p.toml"))
            .unwrap_err();
        assert!(matches!(err, PropertiesError::Parse { .. }));
    }

    #[test]
    fn non_numeric_aspect_is_rejected() {
        let mut t = PropertiesTable::new();
        let err = t
            .merge_str("[\"x.png\".wide.9]\ntop = 1\n", "", Path::new("p.toml"))
            .unwrap_err();
        assert!(matches!(
            err,
            PropertiesError::InvalidAspect { ref key, .. } if key == "wide.9"
        ));
    }

    #[test]
    fn unmatched_lists_orphans_sorted() {
        let t = parse(
            "[\"b.png\".16.9]\ntop = 1\n[\"a.png\".16.9]\ntop = 1\n[\"keep.png\".16.9]\ntop = 1\n",
            "",
        );
        let orphans = t.unmatched(["keep.png"]);
        assert_eq!(
            orphans,
            vec![
                ("a.png".to_string(), Some(SIXTEEN_NINE)),
                ("b.png".to_string(), Some(SIXTEEN_NINE))
            ]
        );
    }

    // =========================================================================
    // Image-wide tables
    // =========================================================================

    #[test]
    fn image_table_applies_to_aspects_without_their_own() {
        let t = parse(
            r##"
["a.jpg"]
vertical = 5.0
denoise = 2

["a.jpg".4.3]
top = 10
"##,
            "",
        );
        let wide = t.lookup("a.jpg", SIXTEEN_NINE);
        assert_eq!(wide.vertical, 5.0);
        assert_eq!(wide.noise_level(), Some(2));

        // The aspect table replaces the image table instead of merging
        let square = t.lookup("a.jpg", AspectRatio { x: 4, y: 3 });
        assert_eq!(square.top, 10);
        assert_eq!(square.vertical, 0.0);
        assert_eq!(square.noise_level(), Some(DEFAULT_NOISE_LEVEL));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn unknown_image_level_key_is_rejected() {
        let mut t = PropertiesTable::new();
        let err = t
            .merge_str("[\"x.png\"]\nzoom = 2\n", "", Path::new("p.toml"))
            .unwrap_err();
        assert!(matches!(err, PropertiesError::Parse { .. }));
    }

    #[test]
    fn unmatched_reports_image_tables_without_aspect() {
        let t = parse("[\"gone.png\"]\ntop = 1\n[\"gone.png\".16.9]\ntop = 2\n", "");
        assert_eq!(
            t.unmatched(["other.png"]),
            vec![
                ("gone.png".to_string(), None),
                ("gone.png".to_string(), Some(SIXTEEN_NINE))
            ]
        );
    }

    // =========================================================================
    // Denoise
    // =========================================================================

    #[test]
    fn noise_level_defaults_and_disables() {
        let mut p = ImageProperties::default();
        assert_eq!(p.noise_level(), Some(1));
        p.denoise = Some(3);
        assert_eq!(p.noise_level(), Some(3));
        assert!(!p.is_default());
        p.denoise = Some(-1);
        assert_eq!(p.noise_level(), None);
        assert!(!p.is_default());
        p.denoise = Some(1);
        assert!(p.is_default());
    }

    #[test]
    fn denoise_out_of_range_is_rejected() {
        let mut t = PropertiesTable::new();
        let err = t
            .merge_str("[\"x.png\".16.9]\ndenoise = 7\n", "", Path::new("p.toml"))
            .unwrap_err();
        assert!(matches!(err, PropertiesError::InvalidDenoise { level: 7, .. }));
    }

    #[test]
    fn load_reads_each_root() {
        let tmp = TempDir::new().unwrap();
        let one = tmp.path().join("one");
        let two = tmp.path().join("two");
        fs::create_dir_all(&one).unwrap();
        fs::create_dir_all(&two).unwrap();
        fs::write(one.join(PROPERTIES_FILENAME), "[\"x.png\".16.9]\ntop = 3\n").unwrap();

        let sources = vec![
            OriginalsSource {
                path: one,
                prefix: "one/".into(),
            },
            OriginalsSource {
                path: two,
                prefix: "two/".into(),
            },
        ];
        let t = PropertiesTable::load(&sources).unwrap();
        assert_eq!(t.lookup("one/x.png", SIXTEEN_NINE).top, 3);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn load_surfaces_parse_errors_with_path() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PROPERTIES_FILENAME), "not [valid").unwrap();
        let sources = vec![OriginalsSource {
            path: tmp.path().to_path_buf(),
            prefix: String::new(),
        }];
        let err = PropertiesTable::load(&sources).unwrap_err();
        assert!(err.to_string().contains(PROPERTIES_FILENAME));
    }
}
