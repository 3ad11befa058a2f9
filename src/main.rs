// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use hyperpos_scanner::ScannerVariant;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "hyperpos-scanner")]
#[command(about = "Camera barcode scanner for the HyperPOS point of sale")]
#[command(version, long_version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: ~/.config/hyperpos-scanner/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Open the scanner and print accepted barcodes
    Scan {
        /// Scanner front end: library, offline or web
        #[arg(short, long)]
        variant: Option<ScannerVariant>,

        /// Keep scanning after the first accepted barcode
        #[arg(short, long)]
        multi: bool,

        /// Feed these images through a virtual camera instead of a device
        #[arg(short, long)]
        image: Vec<PathBuf>,

        /// Preview container width, sizes the library scan region
        #[arg(long)]
        container_width: Option<u32>,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show the barcode waiting for the sale screen
    Pending {
        /// Consume the value instead of only showing it
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=hyperpos_scanner=debug, RUST_LOG=info
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
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Scan {
            variant,
            multi,
            image,
            container_width,
            timeout,
        } => {
            let mut config = config;
            if let Some(variant) = variant {
                config.variant = variant;
            }
            if multi {
                config.multi_scan = true;
            }
            if let Some(width) = container_width {
                config.container_width = width;
            }
            cli::scan(&config, &image, timeout)
        }
        Commands::Pending { clear } => cli::show_pending(&config, clear),
    }
}
