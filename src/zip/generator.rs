//! Streaming ZIP generator.
//!
//! Entries are written in store mode. The local header of every entry is
//! emitted before its checksum is known, so it carries zero checksum and
//! sizes together with general purpose flag bit 3; the real values only
//! appear in the central directory. No data descriptor follows the entry
//! data, which means readers that walk local headers sequentially cannot
//! parse these archives. Readers that start from the central directory
//! (practically all of them) can.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, Take};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::io::{OpenSource, SourceEntry, SourceProvider, SourceReader};

use super::cache::ChecksumCache;
use super::estimator::{self, SizeEstimate};
use super::range::RangeWindow;
use super::structures::{
    CentralDirectoryHeader, DosDateTime, LocalFileHeader, encode_archive_end, exceeds_classic_limit,
};

/// Default upper bound for one data chunk read from a source.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Tuning knobs for [`ZipStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Largest data chunk read from a source at once.
    pub chunk_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Central directory record of an entry whose data has been fully accounted for.
#[derive(Debug, Clone)]
struct CentralEntry {
    file_name: Vec<u8>,
    size: u64,
    crc32: u32,
    lfh_offset: u64,
    modified: DosDateTime,
    external_attrs: u32,
}

impl CentralEntry {
    fn header(&self) -> CentralDirectoryHeader<'_> {
        CentralDirectoryHeader {
            modified: self.modified,
            crc32: self.crc32,
            size: self.size,
            lfh_offset: self.lfh_offset,
            external_attrs: self.external_attrs,
            file_name: &self.file_name,
        }
    }
}

/// An entry whose local header has been emitted but whose data has not.
struct PendingEntry {
    record: CentralEntry,
    identity: Option<String>,
    modified: DateTime<Utc>,
    /// Checksum from the cache, valid for this entry's modification time.
    cached_crc: Option<u32>,
    opener: Box<dyn OpenSource>,
}

/// Where an entry's final checksum comes from.
enum Checksum {
    Computing(crc32fast::Hasher),
    Cached(u32),
}

struct Draining {
    entry: PendingEntry,
    reader: Take<SourceReader>,
    checksum: Checksum,
    remaining: u64,
}

enum State {
    /// Between entries.
    Idle,
    /// Local header emitted; data not started.
    HeaderSent(PendingEntry),
    Draining(Box<Draining>),
    /// Emitting central directory records; `next` indexes the entry list.
    Directory { cd_offset: u64, next: usize },
    Closed,
}

/// Pull-based ZIP archive producer over a [`SourceProvider`].
///
/// Each call to [`next_chunk`](ZipStream::next_chunk) is one demand signal
/// and produces at most one chunk. Memory use is bounded by the chunk size
/// plus one central directory record per entry.
pub struct ZipStream {
    provider: Box<dyn SourceProvider>,
    provider_done: bool,
    /// Entries pulled ahead by [`calculate_size`](ZipStream::calculate_size).
    replay: VecDeque<SourceEntry>,
    cache: Arc<ChecksumCache>,
    options: ArchiveOptions,
    window: Option<RangeWindow>,
    /// Archive bytes accounted for so far, including bytes the window skipped without producing.
    written: u64,
    entries: Vec<CentralEntry>,
    state: State,
    started: bool,
}

impl ZipStream {
    pub fn new(provider: impl SourceProvider + 'static, cache: Arc<ChecksumCache>) -> Self {
        Self::with_options(provider, cache, ArchiveOptions::default())
    }

    pub fn with_options(
        provider: impl SourceProvider + 'static,
        cache: Arc<ChecksumCache>,
        options: ArchiveOptions,
    ) -> Self {
        Self {
            provider: Box::new(provider),
            provider_done: false,
            replay: VecDeque::new(),
            cache,
            options: ArchiveOptions {
                chunk_size: options.chunk_size.max(1),
            },
            window: None,
            written: 0,
            entries: Vec::new(),
            state: State::Idle,
            started: false,
        }
    }

    /// Exact length of the complete, unranged archive.
    ///
    /// Pulls entries from the provider until it is exhausted or `budget`
    /// elapses, without reading any entry content. Returns `Ok(None)` when
    /// the provider could not be exhausted in time. Pulled entries are kept
    /// and streamed later, so nothing is lost either way.
    pub async fn calculate_size(&mut self, budget: Duration) -> Result<Option<u64>> {
        if self.started {
            bail!("archive size must be calculated before streaming starts");
        }

        if !self.provider_done {
            let deadline = Instant::now() + budget;
            self.provider_done =
                estimator::prefetch(self.provider.as_mut(), &mut self.replay, deadline).await?;
        }
        if !self.provider_done {
            info!(buffered = self.replay.len(), ?budget, "archive size unknown");
            return Ok(None);
        }

        let mut estimate = SizeEstimate::default();
        for entry in &self.replay {
            estimate.push(entry.path.len(), entry.size);
        }
        let total = estimate.total();
        debug!(entries = estimate.entries, total, "archive size calculated");
        Ok(Some(total))
    }

    /// Restrict output to the inclusive byte range `[start, end]` of the archive.
    ///
    /// `end < start` ends the stream immediately without output.
    pub fn apply_range(&mut self, start: u64, end: u64) -> Result<()> {
        if self.started {
            bail!("range must be applied before streaming starts");
        }

        match RangeWindow::new(start, end) {
            Some(window) => {
                debug!(start, end, "archive range applied");
                self.window = Some(window);
            }
            None => {
                debug!(start, end, "empty archive range");
                self.early_close();
            }
        }
        Ok(())
    }

    /// End the stream now. Any open source is dropped and nothing further is emitted.
    pub fn early_close(&mut self) {
        self.state = State::Closed;
        self.entries.clear();
        self.replay.clear();
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Archive bytes accounted for so far, before range slicing.
    pub fn bytes_produced(&self) -> u64 {
        self.written
    }

    /// Number of entries whose data has been fully accounted for.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Next non-empty chunk of output, or `None` at end of stream.
    ///
    /// An error is returned once and closes the stream: a failed source
    /// aborts the whole archive rather than producing a corrupt one.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.started = true;
        loop {
            let chunk = match self.produce().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!(error = %e, "archive aborted");
                    self.early_close();
                    return Err(e);
                }
            };

            let Some(window) = self.window.as_mut() else {
                return Ok(Some(chunk));
            };
            let forwarded = window.slice(chunk);
            if window.is_satisfied() {
                debug!("archive range satisfied");
                self.early_close();
            }
            if let Some(part) = forwarded {
                return Ok(Some(part));
            }
        }
    }

    /// Adapt into a stream of chunks, e.g. for an HTTP response body.
    ///
    /// Dropping the stream drops any source that is being read.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        futures::stream::try_unfold(self, |mut zip| async move {
            let next = zip.next_chunk().await?;
            Ok::<_, anyhow::Error>(next.map(|chunk| (chunk, zip)))
        })
    }

    async fn next_source(&mut self) -> Result<Option<SourceEntry>> {
        if let Some(entry) = self.replay.pop_front() {
            return Ok(Some(entry));
        }
        if self.provider_done {
            return Ok(None);
        }
        let next = self.provider.next_source().await?;
        if next.is_none() {
            self.provider_done = true;
        }
        Ok(next)
    }

    /// Produce the next raw chunk of the archive, before range slicing.
    async fn produce(&mut self) -> Result<Option<Bytes>> {
        loop {
            // Taking the state leaves `Closed` behind if anything below fails.
            match std::mem::replace(&mut self.state, State::Closed) {
                State::Idle => match self.next_source().await? {
                    Some(source) => return Ok(Some(self.begin_entry(source))),
                    None => {
                        debug!(
                            entries = self.entries.len(),
                            cd_offset = self.written,
                            "writing central directory"
                        );
                        self.state = State::Directory {
                            cd_offset: self.written,
                            next: 0,
                        };
                    }
                },
                State::HeaderSent(entry) => self.start_data(entry).await?,
                State::Draining(draining) => {
                    if let Some(chunk) = self.read_data(draining).await? {
                        return Ok(Some(chunk));
                    }
                }
                State::Directory { cd_offset, next } => {
                    return Ok(Some(self.directory_chunk(cd_offset, next)));
                }
                State::Closed => return Ok(None),
            }
        }
    }

    /// Emit the local header for `source` and park it until its data is wanted.
    fn begin_entry(&mut self, source: SourceEntry) -> Bytes {
        let modified = DosDateTime::from_datetime(&source.modified);
        let external_attrs = source.external_attrs();
        let file_name = source.path.into_bytes();
        let header = LocalFileHeader {
            modified,
            file_name: &file_name,
        }
        .to_bytes();

        let cached_crc = source
            .identity
            .as_deref()
            .and_then(|identity| self.cache.valid_for(identity, &source.modified));

        debug!(
            name = %String::from_utf8_lossy(&file_name),
            size = source.size,
            offset = self.written,
            cached = cached_crc.is_some(),
            "entry started"
        );
        if exceeds_classic_limit(source.size) || exceeds_classic_limit(self.written) {
            debug!(name = %String::from_utf8_lossy(&file_name), "entry needs zip64 extra field");
        }

        let entry = PendingEntry {
            record: CentralEntry {
                file_name,
                size: source.size,
                crc32: 0,
                lfh_offset: self.written,
                modified,
                external_attrs,
            },
            identity: source.identity,
            modified: source.modified,
            cached_crc,
            opener: source.opener,
        };

        self.written += header.len() as u64;
        self.state = State::HeaderSent(entry);
        Bytes::from(header)
    }

    /// Open the entry's source, or skip it entirely when nothing of it would be sent.
    async fn start_data(&mut self, entry: PendingEntry) -> Result<()> {
        let size = entry.record.size;

        if let Some(crc32) = entry.cached_crc {
            if let Some(window) = self.window.as_mut().filter(|w| w.discards(size)) {
                window.skip_unproduced(size);
                self.written += size;
                debug!(
                    name = %String::from_utf8_lossy(&entry.record.file_name),
                    "entry outside range, source not opened"
                );
                self.finish_entry(entry, crc32);
                self.state = State::Idle;
                return Ok(());
            }
        }

        let reader = entry.opener.open().await?;
        let checksum = match entry.cached_crc {
            Some(crc32) => Checksum::Cached(crc32),
            None => Checksum::Computing(crc32fast::Hasher::new()),
        };
        self.state = State::Draining(Box::new(Draining {
            reader: reader.take(size),
            checksum,
            remaining: size,
            entry,
        }));
        Ok(())
    }

    /// Read one chunk of entry data; `None` once the entry is complete.
    async fn read_data(&mut self, mut draining: Box<Draining>) -> Result<Option<Bytes>> {
        if draining.remaining > 0 {
            let want = draining.remaining.min(self.options.chunk_size as u64) as usize;
            let mut buf = BytesMut::with_capacity(want);
            let n = read_some(&mut draining.reader, &mut buf, want).await?;
            if n == 0 {
                bail!(
                    "source {} ended {} bytes short of its declared size {}",
                    String::from_utf8_lossy(&draining.entry.record.file_name),
                    draining.remaining,
                    draining.entry.record.size
                );
            }

            let chunk = buf.freeze();
            if let Checksum::Computing(hasher) = &mut draining.checksum {
                hasher.update(&chunk);
            }
            draining.remaining -= n as u64;
            self.written += n as u64;
            self.state = State::Draining(draining);
            return Ok(Some(chunk));
        }

        let Draining { entry, checksum, .. } = *draining;
        let crc32 = match checksum {
            Checksum::Computing(hasher) => hasher.finalize(),
            Checksum::Cached(crc32) => crc32,
        };
        self.finish_entry(entry, crc32);
        self.state = State::Idle;
        Ok(None)
    }

    fn finish_entry(&mut self, entry: PendingEntry, crc32: u32) {
        let PendingEntry {
            mut record,
            identity,
            modified,
            ..
        } = entry;

        if let Some(identity) = identity.as_deref() {
            self.cache.store(identity, modified, crc32);
        }
        record.crc32 = crc32;
        self.entries.push(record);
    }

    /// Emit the central directory record at `next`, or the archive end once all are out.
    fn directory_chunk(&mut self, cd_offset: u64, next: usize) -> Bytes {
        if let Some(entry) = self.entries.get(next) {
            let record = entry.header().to_bytes();
            self.written += record.len() as u64;
            self.state = State::Directory {
                cd_offset,
                next: next + 1,
            };
            return Bytes::from(record);
        }

        let total_entries = self.entries.len() as u64;
        let cd_size = self.written - cd_offset;
        let tail = encode_archive_end(total_entries, cd_offset, cd_size, self.written);
        self.written += tail.len() as u64;
        info!(entries = total_entries, bytes = self.written, "archive complete");
        self.state = State::Closed;
        Bytes::from(tail)
    }
}

/// Append at most `limit` bytes from `reader` to `buf`.
async fn read_some<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut BytesMut, limit: usize) -> Result<usize> {
    let mut limited = reader.take(limit as u64);
    Ok(limited.read_buf(buf).await?)
}
