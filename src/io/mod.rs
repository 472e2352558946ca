//! Sources that feed the archive generator, and the HTTP surface serving it.

pub mod http;
mod local;
mod memory;

pub use http::{RangeRequest, parse_range_header, serve};
pub use local::{DirectoryProvider, FileSource};
pub use memory::{BytesSource, SourceList};

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

/// Byte stream of one archive entry.
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

/// Deferred opening of an entry's bytes.
///
/// The generator calls [`open`](OpenSource::open) only when it starts
/// draining the entry, so at most one reader is alive at a time.
#[async_trait]
pub trait OpenSource: Send + Sync {
    async fn open(&self) -> Result<SourceReader>;
}

/// Single-pass sequence of archive entries.
///
/// Implementations must be cancellation safe: if a `next_source` future is
/// dropped before completing, no entry may be lost. The size estimator
/// relies on this to enforce its deadline.
#[async_trait]
pub trait SourceProvider: Send {
    /// Next entry, or `None` once the sequence is exhausted.
    async fn next_source(&mut self) -> Result<Option<SourceEntry>>;
}

/// One file to be stored in the archive.
pub struct SourceEntry {
    /// Archive-relative name, unique within one archive.
    pub path: String,
    /// Stable key for checksum caching; `None` disables caching for this entry.
    pub identity: Option<String>,
    /// Exact number of bytes `opener` yields.
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// POSIX permission bits, stored in the external attributes.
    pub mode: Option<u32>,
    pub opener: Box<dyn OpenSource>,
}

impl SourceEntry {
    pub fn new(
        path: impl Into<String>,
        size: u64,
        modified: DateTime<Utc>,
        opener: impl OpenSource + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            identity: None,
            size,
            modified,
            mode: None,
            opener: Box::new(opener),
        }
    }

    /// Entry backed by in-memory content.
    pub fn from_bytes(path: impl Into<String>, data: impl Into<Bytes>, modified: DateTime<Utc>) -> Self {
        let data = data.into();
        Self::new(path, data.len() as u64, modified, BytesSource::new(data))
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Value of the central directory's external attributes field.
    pub fn external_attrs(&self) -> u32 {
        self.mode.map(|mode| (mode & 0xFFFF) << 16).unwrap_or(0)
    }
}

impl fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceEntry")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
