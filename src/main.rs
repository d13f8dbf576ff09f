// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use scancam::scanner::DecoderMode;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "scancam")]
#[command(about = "Scan barcodes and QR codes from a camera")]
#[command(version = scancam::constants::app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Scan one code from a live camera
    Scan {
        /// Device to open (from 'scancam list'); defaults to the first back camera
        #[arg(short, long)]
        device: Option<String>,

        /// Zoom level applied once scanning starts
        #[arg(short, long)]
        zoom: Option<f64>,

        /// Decoder shape
        #[arg(short, long, value_enum)]
        mode: Option<DecoderMode>,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan codes from image files
    ScanImage {
        /// Image files to scan
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=scancam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Scan {
            device,
            zoom,
            mode,
            timeout,
            json,
        } => cli::scan(cli::ScanArgs {
            device,
            zoom,
            mode,
            timeout,
            json,
        }),
        Commands::ScanImage { files, json } => cli::scan_image(files, json),
    }
}
