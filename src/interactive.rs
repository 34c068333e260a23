//! Prompt loop for tuning one image on a live preview.
//!
//! Each edit re-renders the file for every monitor into scratch space and
//! sets it, exactly as `preview` does. `print` writes the current settings as
//! a `.properties.toml` table that can be pasted into the originals root.
//!
//! ```text
//! wallpapers> v 10
//! wallpapers> t 120
//! wallpapers> print
//! ["landscapes/dawn.jpg".16.9]
//! vertical = 10.0
//! top = 120
//! ```

use crate::cancel::CancelToken;
use crate::monitors::AspectRatio;
use crate::output;
use crate::properties::{DEFAULT_BACKGROUND, DEFAULT_NOISE_LEVEL, DENOISE_RANGE, ImageProperties};
use crate::wallpaper::{Assignment, PreviewOptions, WallpaperError};
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use thiserror::Error;

const PROMPT: &str = "wallpapers> ";

const HELP: &[&str] = &[
    "vertical | v <percent>    move the viewport up (negative: down)",
    "horizontal | h <percent>  move the viewport right (negative: left)",
    "top | t <pixels>          crop the top edge (negative: pad)",
    "bottom | b <pixels>       crop the bottom edge (negative: pad)",
    "left | l <pixels>         crop the left edge (negative: pad)",
    "right | r <pixels>        crop the right edge (negative: pad)",
    "background | bg <colour>  padding colour",
    "denoise | d <level>       waifu2x noise level, -1 to disable",
    "print                     show the settings as .properties.toml",
    "help                      show this list",
    "exit                      leave",
];

#[derive(Debug, Clone, PartialEq)]
pub enum InteractiveCommand {
    Vertical(f64),
    Horizontal(f64),
    Top(i32),
    Bottom(i32),
    Left(i32),
    Right(i32),
    Background(String),
    Denoise(i32),
    Help,
    Print,
    Exit,
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseCommandError {
    #[error("unknown command {0:?}, type 'help' for the list")]
    Unknown(String),
    #[error("{0} needs a value")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for {command}")]
    InvalidValue {
        command: &'static str,
        value: String,
    },
    #[error("denoise must be between -1 and 3, got {0}")]
    DenoiseOutOfRange(i32),
}

fn value<T: FromStr>(command: &'static str, raw: &str) -> Result<T, ParseCommandError> {
    if raw.is_empty() {
        return Err(ParseCommandError::MissingValue(command));
    }
    raw.parse().map_err(|_| ParseCommandError::InvalidValue {
        command,
        value: raw.to_string(),
    })
}

fn percent(command: &'static str, raw: &str) -> Result<f64, ParseCommandError> {
    let v: f64 = value(command, raw)?;
    if !v.is_finite() {
        return Err(ParseCommandError::InvalidValue {
            command,
            value: raw.to_string(),
        });
    }
    Ok(v)
}

impl FromStr for InteractiveCommand {
    type Err = ParseCommandError;

    /// `<word> [value]`. Words are case-insensitive, values are kept as typed.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, raw) = match line.split_once(char::is_whitespace) {
            Some((word, raw)) => (word, raw.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "vertical" | "v" => percent("vertical", raw).map(Self::Vertical),
            "horizontal" | "h" => percent("horizontal", raw).map(Self::Horizontal),
            "top" | "t" => value("top", raw).map(Self::Top),
            "bottom" | "b" => value("bottom", raw).map(Self::Bottom),
            "left" | "l" => value("left", raw).map(Self::Left),
            "right" | "r" => value("right", raw).map(Self::Right),
            "background" | "bg" => {
                if raw.is_empty() {
                    Err(ParseCommandError::MissingValue("background"))
                } else {
                    Ok(Self::Background(raw.to_string()))
                }
            }
            "denoise" | "d" => {
                let level = value("denoise", raw)?;
                if DENOISE_RANGE.contains(&level) {
                    Ok(Self::Denoise(level))
                } else {
                    Err(ParseCommandError::DenoiseOutOfRange(level))
                }
            }
            "help" => Ok(Self::Help),
            "print" => Ok(Self::Print),
            "exit" | "quit" => Ok(Self::Exit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

impl InteractiveCommand {
    /// Apply an edit to `props`. Returns false for commands that change
    /// nothing and need no new render.
    ///
    /// Setting a value back to its default clears it, so `print` only lists
    /// what was actually changed.
    pub fn apply(&self, props: &mut ImageProperties) -> bool {
        match self {
            Self::Vertical(v) => props.vertical = *v,
            Self::Horizontal(h) => props.horizontal = *h,
            Self::Top(t) => props.top = *t,
            Self::Bottom(b) => props.bottom = *b,
            Self::Left(l) => props.left = *l,
            Self::Right(r) => props.right = *r,
            Self::Background(bg) => {
                props.background =
                    (!bg.eq_ignore_ascii_case(DEFAULT_BACKGROUND)).then(|| bg.clone());
            }
            Self::Denoise(d) => {
                props.denoise = (*d != i32::from(DEFAULT_NOISE_LEVEL)).then_some(*d);
            }
            Self::Help | Self::Print | Self::Exit => return false,
        }
        true
    }
}

/// What `print` names the table after.
#[derive(Debug, Clone)]
pub struct Session<'a> {
    pub identity: String,
    /// Aspect ratio shared by every monitor, if there is exactly one.
    pub aspect: Option<AspectRatio>,
    pub cancel: &'a CancelToken,
}

/// Read commands from `input` until EOF, `exit` or cancellation.
///
/// `render` is called once up front and after every edit. A failed render is
/// reported and the session goes on, so a bad colour can be corrected;
/// [`WallpaperError::Cancelled`] ends it.
pub fn run<R, W, F>(
    session: &Session<'_>,
    options: &mut PreviewOptions,
    input: R,
    out: &mut W,
    mut render: F,
) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(&PreviewOptions) -> Result<Assignment, WallpaperError>,
{
    writeln!(out, "Previewing {}, type 'help' for commands", session.identity)?;
    if !show_render(out, render(options))? {
        return Ok(());
    }

    let mut lines = input.lines();
    loop {
        if session.cancel.is_cancelled() {
            return Ok(());
        }
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let Some(line) = lines.next() else {
            writeln!(out)?;
            return Ok(());
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if session.cancel.is_cancelled() {
            return Ok(());
        }

        let command = match line.parse::<InteractiveCommand>() {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };
        match command {
            InteractiveCommand::Exit => return Ok(()),
            InteractiveCommand::Help => {
                for line in HELP {
                    writeln!(out, "  {}", line)?;
                }
            }
            InteractiveCommand::Print => {
                let table = output::format_properties_toml(
                    &session.identity,
                    session.aspect,
                    &options.properties,
                );
                for line in table {
                    writeln!(out, "{}", line)?;
                }
            }
            edit => {
                if edit.apply(&mut options.properties) && !show_render(out, render(options))? {
                    return Ok(());
                }
            }
        }
    }
}

/// Report a render. Returns false when the session should stop.
fn show_render<W: Write>(
    out: &mut W,
    result: Result<Assignment, WallpaperError>,
) -> io::Result<bool> {
    match result {
        Ok(assignment) => {
            for line in output::format_assignment(&assignment) {
                log::debug!("{}", line);
            }
            Ok(true)
        }
        Err(WallpaperError::Cancelled) => Ok(false),
        Err(e) => {
            writeln!(out, "render failed: {}", e)?;
            Ok(true)
        }
    }
}
