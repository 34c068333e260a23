use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use wallpaper_cache::cache::CacheLayout;
use wallpaper_cache::cancel::{CancelToken, install_signal_handlers};
use wallpaper_cache::config::{self, Config};
use wallpaper_cache::imaging::{MagickBackend, Pipeline};
use wallpaper_cache::interactive;
use wallpaper_cache::monitors::{
    ConfiguredMonitors, Monitor, MonitorError, MonitorProvider, MonitorSpec, XrandrMonitors,
    parse_geometry, unique_targets,
};
use wallpaper_cache::originals::{self, OriginalImage};
use wallpaper_cache::output;
use wallpaper_cache::properties::{DEFAULT_BACKGROUND, ImageProperties, PropertiesTable};
use wallpaper_cache::scratch::ScratchSpace;
use wallpaper_cache::selection::{JsonSelectionStore, SelectionStore};
use wallpaper_cache::sync::{self, SyncInputs, SyncOutcome, SyncSettings};
use wallpaper_cache::wallpaper::{self, CommandSetter, PreviewOptions, RandomInputs};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "wallpaper-cache")]
#[command(about = "Per-monitor cache of upscaled, cropped wallpapers")]
#[command(long_about = "\
Per-monitor cache of upscaled, cropped wallpapers

Originals are scanned from the configured roots. For every monitor
resolution each original is cropped or padded, recentred, upscaled through
waifu2x and resized with ImageMagick into:

  <cache_directory>/<WIDTH>x<HEIGHT>/<sha256>.png

Per-image settings live in .properties.toml at the root of each originals
directory:

  [\"landscapes/dawn.jpg\".16.9]
  vertical = 10        # percent, positive moves the viewport up
  top = 120            # pixels, positive crops, negative pads
  background = \"white\"

A table without the aspect ratio, [\"landscapes/dawn.jpg\"], applies to every
aspect ratio that has no table of its own.

Run 'wallpaper-cache gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/wallpaper-cache/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Monitor resolution as WIDTHxHEIGHT, repeatable. Overrides detection.
    #[arg(long = "monitor", value_name = "WxH", global = true)]
    monitors: Vec<String>,

    /// Log debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render missing or stale entries for every monitor, then prune
    Sync {
        /// Render at most this many originals
        #[arg(long)]
        limit: Option<i64>,
        /// Also prune entries for monitors that are not connected
        #[arg(long)]
        clean_monitors: bool,
    },
    /// Set a random wallpaper on every monitor
    Random,
    /// Render one file with ad-hoc settings and set it on every monitor
    Preview {
        file: PathBuf,
        /// Vertical offset in percent, positive moves the viewport up
        #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
        vertical: f64,
        /// Horizontal offset in percent, positive moves the viewport right
        #[arg(short = 'x', long, default_value_t = 0.0, allow_negative_numbers = true)]
        horizontal: f64,
        /// Pixels to crop off the top, negative pads
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        top: i32,
        /// Pixels to crop off the bottom, negative pads
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        bottom: i32,
        /// Pixels to crop off the left side, negative pads
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        left: i32,
        /// Pixels to crop off the right side, negative pads
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        right: i32,
        /// Background colour for padding
        #[arg(long = "bg", default_value = DEFAULT_BACKGROUND)]
        background: String,
        /// waifu2x noise level, -1 disables denoising
        #[arg(
            short,
            long,
            allow_negative_numbers = true,
            value_parser = clap::value_parser!(i32).range(-1..=3)
        )]
        denoise: Option<i32>,
        /// Fit inside the monitor instead of filling it
        #[arg(long)]
        touch: bool,
    },
    /// Tune one file's properties at a prompt, previewing every change
    Interactive { file: PathBuf },
    /// Show the monitors wallpapers would be rendered for
    ListMonitors,
    /// Validate the config, originals and properties without rendering
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<ExitCode> {
    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_ref())?;
    let ctx = Context {
        monitor_overrides: parse_monitor_overrides(&cli.monitors)?,
        config,
    };

    match cli.command {
        Command::Sync {
            limit,
            clean_monitors,
        } => ctx.sync(limit, clean_monitors),
        Command::Random => ctx.random(),
        Command::Preview {
            file,
            vertical,
            horizontal,
            top,
            bottom,
            left,
            right,
            background,
            denoise,
            touch,
        } => {
            let options = PreviewOptions {
                properties: ImageProperties {
                    vertical,
                    horizontal,
                    top,
                    bottom,
                    left,
                    right,
                    background: Some(background),
                    denoise,
                },
                touch,
            };
            ctx.preview(file, &options)
        }
        Command::Interactive { file } => ctx.interactive(file),
        Command::ListMonitors => {
            output::print_monitors(&ctx.monitors()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => ctx.check(),
        Command::GenConfig => Ok(ExitCode::SUCCESS),
    }
}

fn load_config(path: Option<&PathBuf>) -> CliResult<Config> {
    let path = match path {
        Some(p) if !p.exists() => {
            return Err(format!("config file {} does not exist", p.display()).into());
        }
        Some(p) => p.clone(),
        None => config::default_config_path(),
    };
    log::debug!("loading config from {}", path.display());
    Ok(config::load_config(&path)?)
}

fn parse_monitor_overrides(values: &[String]) -> CliResult<Vec<MonitorSpec>> {
    let mut specs = Vec::with_capacity(values.len());
    for value in values {
        let (width, height) = parse_geometry(value)?;
        specs.push(MonitorSpec {
            width,
            height,
            name: None,
        });
    }
    Ok(specs)
}

/// Everything a command needs, built once from the config and flags.
struct Context {
    config: Config,
    monitor_overrides: Vec<MonitorSpec>,
}

impl Context {
    /// `--monitor` flags, then `[[monitors]]`, then xrandr.
    fn monitors(&self) -> Result<Vec<Monitor>, MonitorError> {
        if !self.monitor_overrides.is_empty() {
            return ConfiguredMonitors::new(self.monitor_overrides.clone()).monitors();
        }
        if !self.config.monitors.is_empty() {
            return ConfiguredMonitors::new(self.config.monitor_specs()).monitors();
        }
        XrandrMonitors::default().monitors()
    }

    fn scan(&self) -> CliResult<(Vec<OriginalImage>, PropertiesTable)> {
        let sources = self.config.originals_sources();
        if sources.is_empty() {
            log::warn!("no [[originals]] configured");
        }
        let originals = originals::scan(&sources, &self.config.image_extensions)?;
        let properties = PropertiesTable::load(&sources)?;
        Ok((originals, properties))
    }

    fn scratch(&self) -> CliResult<ScratchSpace> {
        Ok(ScratchSpace::create(self.config.temp_root().as_deref())?)
    }

    fn cancel_token(&self) -> CliResult<CancelToken> {
        let cancel = CancelToken::new();
        install_signal_handlers(&cancel)?;
        Ok(cancel)
    }

    fn sync(&self, limit: Option<i64>, clean_monitors: bool) -> CliResult<ExitCode> {
        let monitors = match self.monitors() {
            Ok(m) => m,
            Err(MonitorError::NoMonitors) => {
                log::warn!("no monitors detected, only pruning and compacting");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        let targets = unique_targets(&monitors);
        let (originals, properties) = self.scan()?;

        let cancel = self.cancel_token()?;
        let scratch = self.scratch()?;
        let backend = MagickBackend::from_config(&self.config);
        let pipeline = Pipeline::new(
            &backend,
            &scratch,
            cancel,
            self.config.processing.retry_delay(),
        );
        let layout = CacheLayout::new(self.config.cache_root());
        let settings = SyncSettings {
            limit,
            clean_monitors,
            ..SyncSettings::from_config(&self.config.processing)
        };

        let (tx, rx) = std::sync::mpsc::channel();
        let printer = std::thread::spawn(move || {
            for event in rx {
                for line in output::format_sync_event(&event) {
                    println!("{}", line);
                }
            }
        });
        let outcome = sync::sync_cache(
            &pipeline,
            SyncInputs {
                layout: &layout,
                properties: &properties,
                originals: &originals,
                targets: &targets,
            },
            &settings,
            Some(&tx),
        );
        drop(tx);
        printer.join().map_err(|_| "output thread panicked")?;
        let outcome = outcome?;
        output::print_sync_summary(&outcome);

        if let SyncOutcome::Completed(_) = &outcome {
            let identities: Vec<String> = originals.iter().map(|o| o.identity.clone()).collect();
            let mut store = JsonSelectionStore::open(self.config.database_path())?;
            store.compact(&identities)?;
            output::print_unmatched(
                &properties.unmatched(originals.iter().map(|o| o.identity.as_str())),
            );
        }

        Ok(match outcome {
            SyncOutcome::Cancelled(_) => ExitCode::from(130),
            SyncOutcome::Completed(report) if report.has_failures() => ExitCode::FAILURE,
            SyncOutcome::Completed(_) => ExitCode::SUCCESS,
        })
    }

    fn random(&self) -> CliResult<ExitCode> {
        let monitors = self.monitors()?;
        let (originals, properties) = self.scan()?;
        if originals.is_empty() {
            println!("No wallpapers found in the originals directories");
            return Ok(ExitCode::SUCCESS);
        }

        let scratch = self.scratch()?;
        let backend = MagickBackend::from_config(&self.config);
        let pipeline = Pipeline::new(
            &backend,
            &scratch,
            self.cancel_token()?,
            self.config.processing.retry_delay(),
        );
        let layout = CacheLayout::new(self.config.cache_root());
        let mut store = JsonSelectionStore::open(self.config.database_path())?;
        let setter = CommandSetter::new(self.config.wallpaper.command.clone());

        let assignment = wallpaper::apply_random(
            &pipeline,
            RandomInputs {
                layout: &layout,
                properties: &properties,
                originals: &originals,
                monitors: &monitors,
            },
            &mut store,
            &setter,
        )?;
        output::print_assignment(&assignment);
        Ok(ExitCode::SUCCESS)
    }

    fn preview(&self, file: PathBuf, options: &PreviewOptions) -> CliResult<ExitCode> {
        let file = std::fs::canonicalize(&file)
            .map_err(|e| format!("cannot open {}: {}", file.display(), e))?;
        let monitors = self.monitors()?;

        let scratch = self.scratch()?;
        let backend = MagickBackend::from_config(&self.config);
        let pipeline = Pipeline::new(
            &backend,
            &scratch,
            self.cancel_token()?,
            self.config.processing.retry_delay(),
        );
        let setter = CommandSetter::new(self.config.wallpaper.command.clone());

        let assignment = wallpaper::apply_preview(&pipeline, &file, options, &monitors, &setter)?;
        output::print_assignment(&assignment);
        Ok(ExitCode::SUCCESS)
    }

    fn interactive(&self, file: PathBuf) -> CliResult<ExitCode> {
        let file = std::fs::canonicalize(&file)
            .map_err(|e| format!("cannot open {}: {}", file.display(), e))?;
        let monitors = self.monitors()?;
        let aspects: BTreeSet<_> = monitors.iter().map(|m| m.target.aspect).collect();

        let cancel = self.cancel_token()?;
        let scratch = self.scratch()?;
        let backend = MagickBackend::from_config(&self.config);
        let pipeline = Pipeline::new(
            &backend,
            &scratch,
            cancel.clone(),
            self.config.processing.retry_delay(),
        );
        let setter = CommandSetter::new(self.config.wallpaper.command.clone());

        let session = interactive::Session {
            identity: self.identity_of(&file),
            aspect: match aspects.len() {
                1 => aspects.first().copied(),
                _ => None,
            },
            cancel: &cancel,
        };
        let mut options = PreviewOptions::default();
        interactive::run(
            &session,
            &mut options,
            std::io::stdin().lock(),
            &mut std::io::stdout(),
            |options| wallpaper::apply_preview(&pipeline, &file, options, &monitors, &setter),
        )?;

        Ok(if cancel.is_cancelled() {
            ExitCode::from(130)
        } else {
            ExitCode::SUCCESS
        })
    }

    /// Identity `file` has under the first originals root containing it,
    /// or its bare file name.
    fn identity_of(&self, file: &Path) -> String {
        for source in self.config.originals_sources() {
            let Ok(root) = std::fs::canonicalize(&source.path) else {
                continue;
            };
            if let Ok(relative) = file.strip_prefix(&root) {
                return originals::identity_for(&source.prefix, relative);
            }
        }
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn check(&self) -> CliResult<ExitCode> {
        let (originals, properties) = self.scan()?;
        let summary = output::CheckSummary {
            roots: self.config.originals.len(),
            originals: originals.len(),
            property_entries: properties.len(),
            unmatched: properties.unmatched(originals.iter().map(|o| o.identity.as_str())),
        };
        output::print_check(&summary);
        Ok(ExitCode::SUCCESS)
    }
}
