//! RDT strip reader: replays camera frames through the capture pipeline.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use rdt_reader::app::{RdtApp, ReplayOptions};
use rdt_reader::config::{AggregationMode, Config, EXAMPLE_CONFIG};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Directory of frames to replay, in file-name order
    #[arg(short, long)]
    frames: Option<PathBuf>,

    /// Display size as WIDTHxHEIGHT
    #[arg(long)]
    display: Option<String>,

    /// Sensor rotation in degrees (multiple of 90)
    #[arg(short, long, default_value = "0")]
    rotation: i32,

    /// Aggregate preview readings by majority vote instead of a single still
    #[arg(long)]
    voting: bool,

    /// Directory where the accepted still is written
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn parse_display(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("display '{value}' is not WIDTHxHEIGHT"))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    if args.print_config {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).unwrap_or_else(|e| {
                warn!("Failed to load config file: {e}. Using defaults.");
                Config::default()
            })
        }
        None => Config::default(),
    };

    if let Some(display) = &args.display {
        let (width, height) = parse_display(display)?;
        config.capture.display_width = width;
        config.capture.display_height = height;
    }
    if args.voting {
        config.capture.aggregation = AggregationMode::Voting;
    }
    if args.output_dir.is_some() {
        config.capture.output_dir.clone_from(&args.output_dir);
    }
    config.validate().context("invalid configuration")?;

    let Some(frames) = args.frames else {
        bail!("--frames is required unless --print-config is given");
    };

    let app = RdtApp::new(
        config,
        ReplayOptions {
            frames,
            rotation_degrees: args.rotation,
        },
    );
    let stdout = std::io::stdout();
    let summary = app.run(&mut stdout.lock())?;

    match summary.result {
        Some(result) => info!(
            "Result: control={} test_a={} test_b={}",
            result.control, result.test_a, result.test_b
        ),
        None => info!("No result after {} frames", summary.frames_read),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display() {
        assert_eq!(parse_display("720x1280").unwrap(), (720, 1280));
        assert_eq!(parse_display("480X640").unwrap(), (480, 640));
        assert!(parse_display("720").is_err());
        assert!(parse_display("axb").is_err());
    }
}
