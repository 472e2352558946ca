//! Byte-range slicing of the generated archive.

use bytes::Bytes;

/// Inclusive window `[start, end]` over the archive output.
///
/// Tracks how many bytes still have to be discarded from the front
/// (`skip`) and how many may still be forwarded (`limit`). Chunks are fed
/// in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    skip: u64,
    limit: u64,
}

impl RangeWindow {
    /// Window over the inclusive range; `None` when `end < start` (empty result).
    pub fn new(start: u64, end: u64) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(Self {
            skip: start,
            limit: end - start + 1,
        })
    }

    /// Trim `chunk` to the part inside the window, advancing both counters.
    pub fn slice(&mut self, mut chunk: Bytes) -> Option<Bytes> {
        if self.limit == 0 {
            return None;
        }

        let len = chunk.len() as u64;
        if self.skip >= len {
            self.skip -= len;
            return None;
        }

        let _ = chunk.split_to(self.skip as usize);
        self.skip = 0;
        if chunk.len() as u64 > self.limit {
            chunk.truncate(self.limit as usize);
        }
        self.limit -= chunk.len() as u64;
        Some(chunk)
    }

    /// Whether `len` bytes produced next would all be dropped.
    pub fn discards(&self, len: u64) -> bool {
        self.limit == 0 || self.skip >= len
    }

    /// Account for `len` bytes that were never produced because [`discards`](Self::discards) held.
    pub fn skip_unproduced(&mut self, len: u64) {
        self.skip = self.skip.saturating_sub(len);
    }

    /// The window has forwarded every byte it covers.
    pub fn is_satisfied(&self) -> bool {
        self.limit == 0
    }
}
