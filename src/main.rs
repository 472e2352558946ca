//! Main entry point for the zipstream CLI application.
//!
//! This binary archives a directory on the fly, either into a file or
//! stdout, or as an HTTP resource that supports Range requests.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use zipstream::{ChecksumCache, Cli, Command, DirectoryProvider, ZipStream, serve};

/// Application entry point.
///
/// Parses command-line arguments, installs logging on stderr and
/// dispatches to the selected subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr: stdout may carry the archive itself
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let budget = cli.command.budget();
    match &cli.command {
        Command::Pack {
            dir, output, range, ..
        } => {
            let mut zip = ZipStream::new(DirectoryProvider::new(dir), Arc::new(ChecksumCache::new()));
            let total = zip.calculate_size(budget).await?;
            if let Some((start, end)) = range {
                zip.apply_range(*start, *end)?;
            }

            let written = match output {
                Some(path) => {
                    let file = tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    write_archive(&mut zip, file).await?
                }
                None => write_archive(&mut zip, tokio::io::stdout()).await?,
            };

            // Display transfer statistics
            if !cli.is_quiet() {
                eprintln!("Total bytes written: {}", format_size(written));
                if let Some(total) = total {
                    eprintln!("Archive size: {}", format_size(total));
                }
            }
        }
        Command::Size { dir, .. } => print_size(dir, budget).await?,
        Command::Serve { dir, listen, .. } => serve(dir.clone(), *listen, budget).await?,
    }

    Ok(())
}

/// Drain `zip` into `out`.
///
/// # Returns
///
/// The number of bytes written, which is the range length when a range was applied.
async fn write_archive<W: AsyncWrite + Unpin>(zip: &mut ZipStream, mut out: W) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = zip.next_chunk().await? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

/// Print the exact archive length of `dir`, or `unknown` if the walk did not finish in time.
async fn print_size(dir: &Path, budget: std::time::Duration) -> Result<()> {
    let mut zip = ZipStream::new(DirectoryProvider::new(dir), Arc::new(ChecksumCache::new()));
    match zip.calculate_size(budget).await? {
        Some(total) => println!("{total}"),
        None => println!("unknown"),
    }
    Ok(())
}

/// Human-readable byte count for the totals printed after `pack`.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
