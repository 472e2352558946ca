//! Checksum cache shared by every archive a process generates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// Last known checksum of a source, valid only for the recorded modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedChecksum {
    pub modified: DateTime<Utc>,
    pub crc32: u32,
}

/// Maps a source identity (typically its filesystem path) to its last known checksum.
///
/// Entries are never evicted. Share one instance between generators with an
/// `Arc`; the internal lock serializes concurrent writers.
#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: Mutex<HashMap<String, CachedChecksum>>,
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, identity: &str) -> Option<CachedChecksum> {
        self.lock().get(identity).copied()
    }

    /// Checksum for `identity` if the cached entry was recorded for exactly `modified`.
    pub fn valid_for(&self, identity: &str, modified: &DateTime<Utc>) -> Option<u32> {
        self.lookup(identity)
            .filter(|cached| cached.modified == *modified)
            .map(|cached| cached.crc32)
    }

    pub fn store(&self, identity: &str, modified: DateTime<Utc>, crc32: u32) {
        self.lock()
            .insert(identity.to_string(), CachedChecksum { modified, crc32 });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedChecksum>> {
        // A panic while holding the lock cannot leave a half-written entry behind.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
