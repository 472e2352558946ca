//! Exact archive length, computed from entry metadata alone.
//!
//! The estimator pulls entries ahead of the generator and parks them in a
//! replay queue; the generator drains that queue before it asks the
//! provider for more, so every entry is emitted exactly once.

use std::collections::VecDeque;

use anyhow::Result;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::io::{SourceEntry, SourceProvider};

use super::structures::{CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader};

/// Running totals of an archive's layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    /// Bytes of local headers and entry data, i.e. the central directory offset.
    pub data_len: u64,
    /// Bytes of the central directory.
    pub directory_len: u64,
    pub entries: u64,
}

impl SizeEstimate {
    /// Account for one more entry with a name of `name_len` bytes and `size` bytes of content.
    pub fn push(&mut self, name_len: usize, size: u64) {
        let lfh_offset = self.data_len;
        self.data_len += LocalFileHeader::encoded_len(name_len) + size;
        self.directory_len += CentralDirectoryHeader::encoded_len(name_len, size, lfh_offset);
        self.entries += 1;
    }

    /// Length of the complete archive.
    pub fn total(&self) -> u64 {
        self.data_len
            + self.directory_len
            + EndOfCentralDirectory::encoded_len(self.entries, self.data_len, self.directory_len)
    }
}

/// Exact length of an archive holding entries with the given `(name_len, size)` pairs, in order.
pub fn archive_len(entries: impl IntoIterator<Item = (usize, u64)>) -> u64 {
    let mut estimate = SizeEstimate::default();
    for (name_len, size) in entries {
        estimate.push(name_len, size);
    }
    estimate.total()
}

/// Pull entries from `provider` into `replay` until it is exhausted or `deadline` passes.
///
/// Returns `true` when the provider ran dry.
pub(crate) async fn prefetch(
    provider: &mut dyn SourceProvider,
    replay: &mut VecDeque<SourceEntry>,
    deadline: Instant,
) -> Result<bool> {
    loop {
        match timeout_at(deadline, provider.next_source()).await {
            Ok(Ok(Some(entry))) => replay.push_back(entry),
            Ok(Ok(None)) => return Ok(true),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(buffered = replay.len(), "size estimate ran out of time");
                return Ok(false);
            }
        }
    }
}
