use std::collections::VecDeque;
use std::io::Cursor;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use super::{OpenSource, SourceEntry, SourceProvider, SourceReader};

/// Entry content held in memory.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl OpenSource for BytesSource {
    async fn open(&self) -> Result<SourceReader> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}

/// Provider over a fixed list of entries.
#[derive(Debug, Default)]
pub struct SourceList {
    entries: VecDeque<SourceEntry>,
}

impl SourceList {
    pub fn new(entries: impl IntoIterator<Item = SourceEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SourceProvider for SourceList {
    async fn next_source(&mut self) -> Result<Option<SourceEntry>> {
        Ok(self.entries.pop_front())
    }
}

impl FromIterator<SourceEntry> for SourceList {
    fn from_iter<I: IntoIterator<Item = SourceEntry>>(iter: I) -> Self {
        Self::new(iter)
    }
}
