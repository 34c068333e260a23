//! # wallpaper-cache
//!
//! Keeps a cache of wallpapers rendered for every connected monitor. Originals
//! are cropped or padded, recentred, upscaled by powers of two through waifu2x
//! and finally resized onto the monitor rectangle with ImageMagick. The cache
//! is refreshed incrementally and pruned of entries no original produces any
//! more.
//!
//! # Architecture
//!
//! ```text
//! originals ──scan──► identities ─┐
//! monitors  ──query─► targets  ───┼─► sync ──► <cache>/<W>x<H>/<sha256>.png
//! .properties.toml ──► properties ┘      └──► prune
//! ```
//!
//! A cache entry is a pure function of (identity, resolution, properties).
//! Its path is derived from a SHA-256 over the identity and the encoded
//! properties, so changing a crop produces a new entry and the old one is
//! pruned on the next completed sync. An entry is stale when it is missing or
//! its original was modified at or after the entry.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`sync`] | Batched parallel refresh of every entry, with a render budget and cancellation |
//! | [`prune`] | Mark-and-sweep deletion of entries the last completed sync did not mark |
//! | [`cache`] | Cache keys, entry paths, staleness and run statistics |
//! | [`imaging`] | Geometry math, the external tool backend and the render pipeline |
//! | [`originals`] | Walks the originals roots and assigns identities |
//! | [`properties`] | Per-image crop, pad and offset settings from `.properties.toml` |
//! | [`monitors`] | Monitor enumeration and aspect ratios |
//! | [`selection`] | Persistent pick-without-replacement for `random` |
//! | [`wallpaper`] | Setting wallpapers: the `random` and `preview` flows |
//! | [`interactive`] | Prompt loop tuning one image's properties on a live preview |
//! | [`config`] | `config.toml` loading, stock defaults, merging and validation |
//! | [`scratch`] | Process-lifetime directory for intermediate files |
//! | [`cancel`] | Cancellation token wired to SIGINT/SIGTERM |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## External Tools for Pixels
//!
//! Every pixel operation runs in ImageMagick or a waifu2x front end. The
//! crate decides geometry, naming and scheduling; the tools sit behind the
//! [`imaging::ImageBackend`] trait so the whole pipeline is testable with a
//! recording mock.
//!
//! ## One Upscale at a Time
//!
//! waifu2x saturates the GPU on its own, so upscales are serialized through a
//! single-permit gate while cropping and resizing run in parallel.
//!
//! ## Failures Stay Local
//!
//! An original that cannot be decoded or rendered is logged and reported at
//! the end of a sync; the rest of the pool is still processed. Errors on the
//! cache directory itself abort the run.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod imaging;
pub mod interactive;
pub mod monitors;
pub mod originals;
pub mod output;
pub mod properties;
pub mod prune;
pub mod scratch;
pub mod selection;
pub mod sync;
pub mod wallpaper;

#[cfg(test)]
pub(crate) mod test_helpers;
