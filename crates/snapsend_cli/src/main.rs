//! Snapsend CLI
//!
//! Command-line tools for producing and inspecting send streams.
//!
//! # Commands
//!
//! - `send` - Build snapshots from a JSON image and write a send stream
//! - `dump` - Print every command of a stream with decoded attributes
//! - `verify` - Check stream framing, checksums and termination

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod image;

use clap::{Parser, Subcommand};
use commands::send::SendArgs;
use snapsend_core::SendConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Snapshot send stream tools.
#[derive(Parser)]
#[command(name = "snapsend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build snapshots from a JSON image and send one of them
    Send {
        /// JSON image describing the snapshots
        #[arg(short, long)]
        image: PathBuf,

        /// Snapshot to send
        #[arg(short, long)]
        target: String,

        /// Parent snapshot for an incremental send
        #[arg(short, long)]
        parent: Option<String>,

        /// Additional snapshot the receiver can clone from (repeatable)
        #[arg(short, long = "clone-source")]
        clone_source: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum framed command size in bytes
        #[arg(long)]
        max_command_size: Option<usize>,

        /// Maximum data bytes per WRITE command
        #[arg(long)]
        read_chunk_size: Option<usize>,

        /// Items walked between snapshot consistency checks
        #[arg(long)]
        lease_batch_items: Option<usize>,
    },

    /// Print the commands of a stream
    Dump {
        /// Stream file, or - for stdin
        stream: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify stream framing and checksums
    Verify {
        /// Stream file, or - for stdin
        stream: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so a stream on stdout stays intact
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Send {
            image,
            target,
            parent,
            clone_source,
            output,
            max_command_size,
            read_chunk_size,
            lease_batch_items,
        } => {
            let mut config = SendConfig::default();
            if let Some(size) = max_command_size {
                config = config.max_command_size(size);
            }
            if let Some(size) = read_chunk_size {
                config = config.read_chunk_size(size);
            }
            if let Some(items) = lease_batch_items {
                config = config.lease_batch_items(items);
            }
            commands::send::run(&SendArgs {
                image,
                target,
                parent,
                clone_sources: clone_source,
                output,
                config,
            })?;
        }
        Commands::Dump { stream, format } => {
            commands::dump::run(&stream, &format)?;
        }
        Commands::Verify { stream } => {
            commands::verify::run(&stream)?;
        }
        Commands::Version => {
            println!("snapsend CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("stream version {}", snapsend_stream::STREAM_VERSION);
        }
    }

    Ok(())
}
