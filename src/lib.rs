//! # zipstream
//!
//! Streaming ZIP archive generation with constant memory use.
//!
//! This library turns a sequence of file-like sources into a ZIP byte
//! stream, chunk by chunk, without buffering file contents, touching disk,
//! or rewriting bytes already emitted. Entries are stored uncompressed, and
//! ZIP64 records are added only where a classic field would overflow.
//!
//! Because the output is deterministic for unchanged sources, its exact
//! length can be computed up front and any byte range of it can be
//! generated on demand, which lets an HTTP server answer Range requests
//! against an archive that never exists as a whole.
//!
//! ## Features
//!
//! - Pull-based generation: one chunk per demand, at most one source open at a time
//! - Exact archive length from metadata alone, with a time budget
//! - Byte ranges of the generated archive, skipping untouched sources entirely
//!   when their checksum is already cached
//! - ZIP64 for entries, offsets and directories beyond 2^31 - 1 bytes
//! - Directory walking and an `axum` endpoint serving `/archive.zip`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zipstream::{ChecksumCache, DirectoryProvider, ZipStream};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Arc::new(ChecksumCache::new());
//!     let mut zip = ZipStream::new(DirectoryProvider::new("photos"), cache);
//!
//!     // Content-Length, if the directory could be walked within a second
//!     let total = zip.calculate_size(Duration::from_secs(1)).await?;
//!     println!("archive length: {total:?}");
//!
//!     // Only the first KiB of the archive
//!     zip.apply_range(0, 1023)?;
//!     while let Some(chunk) = zip.next_chunk().await? {
//!         println!("{} bytes", chunk.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod io;
pub mod zip;

pub use cli::{Cli, Command};
pub use io::{
    BytesSource, DirectoryProvider, FileSource, OpenSource, RangeRequest, SourceEntry, SourceList,
    SourceProvider, SourceReader, parse_range_header, serve,
};
pub use zip::{ArchiveOptions, CachedChecksum, ChecksumCache, RangeWindow, ZipStream, archive_len};
