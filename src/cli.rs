use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zipstream")]
#[command(version)]
#[command(about = "Stream ZIP archives of a directory, with HTTP Range support", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipstream pack photos -o photos.zip          archive a directory into a file\n  \
  zipstream pack photos -r 0-1023 | xxd        print the first KiB of the archive\n  \
  zipstream size photos                        print the exact archive length\n  \
  zipstream serve photos -l 0.0.0.0:8080       serve http://host:8080/archive.zip")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging (-vv => trace)
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the archive of DIR to a file or stdout
    Pack {
        /// Directory to archive
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Output file (default: stdout)
        #[arg(short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Only write the inclusive byte range START-END of the archive
        #[arg(short = 'r', long, value_name = "START-END", value_parser = parse_byte_range)]
        range: Option<(u64, u64)>,

        /// Time allowed for computing the archive length, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 5000)]
        budget_ms: u64,
    },

    /// Print the exact length of the archive of DIR
    Size {
        /// Directory to archive
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Time allowed for walking DIR, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 5000)]
        budget_ms: u64,
    },

    /// Serve the archive of DIR at /archive.zip
    Serve {
        /// Directory to archive
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Address to listen on
        #[arg(short = 'l', long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// Time allowed per request for computing Content-Length, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 5000)]
        budget_ms: u64,
    },
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (q, _) if q > 1 => "off",
            (1, _) => "error",
            (_, 0) => "warn",
            (_, 1) => "info",
            (_, 2) => "debug",
            _ => "trace",
        }
    }
}

impl Command {
    pub fn budget(&self) -> Duration {
        let ms = match self {
            Command::Pack { budget_ms, .. }
            | Command::Size { budget_ms, .. }
            | Command::Serve { budget_ms, .. } => *budget_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Parse `START-END` (inclusive). `END` may precede `START`, which selects nothing.
fn parse_byte_range(s: &str) -> Result<(u64, u64), String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got {s:?}"))?;
    let start = start
        .trim()
        .parse()
        .map_err(|e| format!("invalid range start {start:?}: {e}"))?;
    let end = end
        .trim()
        .parse()
        .map_err(|e| format!("invalid range end {end:?}: {e}"))?;
    Ok((start, end))
}
