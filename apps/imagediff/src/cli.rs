//! # CLI
//!
//! Command definitions and handlers for the `imagediff` binary.
//!
//! Handlers are plain functions so they can be exercised without a
//! process boundary; [`run`] wires them to the parsed command line.

use crate::catalog::ScreenshotCatalog;
use crate::config::{AppConfig, SiteVariant};
use crate::error::{AppError, Result};
use crate::{api, dev};
use clap::{Parser, Subcommand};
use imagediff_core::DiffStats;
use imagediff_core::diff::{self, DEFAULT_THRESHOLD};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Screenshot catalog, pixel diffs and a dev front door.
#[derive(Parser, Debug)]
#[command(name = "imagediff", author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./imagediff.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the backend API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Screenshot root directory
        #[arg(long)]
        screenshots: Option<PathBuf>,
        /// Directory for saved diffs
        #[arg(long)]
        diff_output: Option<PathBuf>,
    },

    /// Run the dev server
    Dev {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Public directory with static files
        #[arg(long)]
        public: Option<PathBuf>,
        /// Site preset, ignored when the config file has a [site] section
        #[arg(long, value_enum)]
        variant: Option<SiteVariant>,
    },

    /// Diff two images locally
    Diff {
        image_a: PathBuf,
        image_b: PathBuf,
        /// Difference threshold in percent
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Where to write the diff PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the PNG as a data URI instead of writing a file
        #[arg(long)]
        base64: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List targets, builds, movies or frames
    List {
        target: Option<String>,
        build: Option<String>,
        movie: Option<String>,
        /// Screenshot root directory
        #[arg(long)]
        screenshots: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration
    Config {
        #[arg(long)]
        json: bool,
    },
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            screenshots,
            diff_output,
        } => {
            apply_server_overrides(&mut config, host, port, screenshots, diff_output);
            cmd_serve(&config).await
        }
        Commands::Dev {
            host,
            port,
            public,
            variant,
        } => {
            apply_dev_overrides(&mut config, host, port, public, variant);
            cmd_dev(&config).await
        }
        Commands::Diff {
            image_a,
            image_b,
            threshold,
            output,
            base64,
            json,
        } => {
            let report = cmd_diff(&image_a, &image_b, threshold, output.as_deref(), base64)?;
            println!("{}", report.render(json)?);
            Ok(())
        }
        Commands::List {
            target,
            build,
            movie,
            screenshots,
            json,
        } => {
            let root = screenshots.unwrap_or_else(|| config.server.screenshots_dir.clone());
            let entries = cmd_list(&root, target.as_deref(), build.as_deref(), movie.as_deref())?;
            if json {
                println!("{}", to_json(&entries)?);
            } else {
                for entry in entries {
                    println!("{}", entry);
                }
            }
            Ok(())
        }
        Commands::Config { json } => {
            println!("{}", cmd_config(&config, json)?);
            Ok(())
        }
    }
}

/// Apply `serve` flags on top of file values.
pub fn apply_server_overrides(
    config: &mut AppConfig,
    host: Option<String>,
    port: Option<u16>,
    screenshots: Option<PathBuf>,
    diff_output: Option<PathBuf>,
) {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(dir) = screenshots {
        config.server.screenshots_dir = dir;
    }
    if let Some(dir) = diff_output {
        config.server.diff_output_dir = dir;
    }
}

/// Apply `dev` flags on top of file values.
pub fn apply_dev_overrides(
    config: &mut AppConfig,
    host: Option<String>,
    port: Option<u16>,
    public: Option<PathBuf>,
    variant: Option<SiteVariant>,
) {
    if let Some(host) = host {
        config.dev.host = host;
    }
    if let Some(port) = port {
        config.dev.port = port;
    }
    if let Some(dir) = public {
        config.dev.public_dir = dir;
    }
    if let Some(variant) = variant {
        config.dev.variant = variant;
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    info!(
        api_key = config.server.api_key.is_some(),
        rate_limit = ?config.server.rate_limit_per_second,
        "Starting backend API"
    );
    api::serve(&config.server).await
}

pub async fn cmd_dev(config: &AppConfig) -> Result<()> {
    let site = config.site();
    info!(variant = ?config.dev.variant, explicit_site = config.site.is_some(), "Starting dev server");
    dev::serve(&config.dev, site).await
}

/// Result of a local diff.
#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub stats: DiffStats,
    /// File the diff PNG was written to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Diff PNG as a `data:` URI, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
}

impl DiffReport {
    /// Text or JSON form of the report.
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            return to_json(self);
        }
        let mut lines = vec![
            format!("Different pixels: {}", self.stats.different_pixels),
            format!("Total pixels:     {}", self.stats.total_pixels),
            format!(
                "Difference:       {}%",
                diff::format_percentage(self.stats.difference_percentage)
            ),
            format!("Size:             {}x{}", self.stats.width, self.stats.height),
        ];
        if let Some(path) = &self.output {
            lines.push(format!("Written to:       {}", path.display()));
        }
        if let Some(uri) = &self.data_uri {
            lines.push(uri.clone());
        }
        Ok(lines.join("\n"))
    }
}

/// Diff two image files.
///
/// Writes the PNG to `output`, or next to the working directory as
/// `<a>_vs_<b>.png` unless `base64` asks for a data URI instead.
pub fn cmd_diff(
    image_a: &Path,
    image_b: &Path,
    threshold: f64,
    output: Option<&Path>,
    base64: bool,
) -> Result<DiffReport> {
    let threshold = diff::check_threshold(threshold)?;
    let a = read_input(image_a)?;
    let b = read_input(image_b)?;
    let outcome = diff::generate(&a, &b, threshold)?;

    let output = match (output, base64) {
        (Some(path), _) => Some(path.to_path_buf()),
        (None, false) => Some(default_output(image_a, image_b)),
        (None, true) => None,
    };
    if let Some(path) = &output {
        std::fs::write(path, &outcome.png)?;
    }
    let data_uri = base64.then(|| diff::encode_base64_png(&outcome.png));

    info!(
        different_pixels = outcome.stats.different_pixels,
        threshold,
        "Computed diff"
    );
    Ok(DiffReport {
        stats: outcome.stats,
        output,
        data_uri,
    })
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| AppError::NotFound(format!("Cannot read {}: {}", path.display(), e)))
}

fn default_output(image_a: &Path, image_b: &Path) -> PathBuf {
    let stem = |p: &Path| {
        p.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string()
    };
    PathBuf::from(format!("{}_vs_{}.png", stem(image_a), stem(image_b)))
}

/// List the catalog level selected by the given segments.
pub fn cmd_list(
    root: &Path,
    target: Option<&str>,
    build: Option<&str>,
    movie: Option<&str>,
) -> Result<Vec<String>> {
    let catalog = ScreenshotCatalog::new(root);
    match (target, build, movie) {
        (None, _, _) => catalog.targets(),
        (Some(t), None, _) => catalog.builds(t),
        (Some(t), Some(b), None) => catalog.movies(t, b),
        (Some(t), Some(b), Some(m)) => catalog.frames(t, b, m),
    }
}

/// Resolved configuration as TOML or JSON.
///
/// The API key is masked.
pub fn cmd_config(config: &AppConfig, json: bool) -> Result<String> {
    let mut resolved = config.clone();
    if resolved.server.api_key.is_some() {
        resolved.server.api_key = Some(REDACTED.to_string());
    }
    if !json {
        return resolved.to_toml();
    }
    resolved.site = Some(config.site());
    to_json(&resolved)
}

const REDACTED: &str = "********";

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::Internal(e.to_string()))
}
