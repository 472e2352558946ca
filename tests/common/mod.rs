//! Shared helpers: a central-directory based ZIP reader and test sources.
//!
//! The reader works the way general-purpose archive tools do: it locates
//! the End of Central Directory at the end of the bytes, follows the ZIP64
//! locator when present, and parses central directory records. It never
//! trusts local headers for sizes.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncRead, ReadBuf};
use zipstream::{BytesSource, OpenSource, SourceEntry, SourceProvider, SourceReader, ZipStream};

pub const EOCD_SIZE: usize = 22;
pub const LOCATOR_SIZE: usize = 20;

/// One central directory record, with raw classic fields kept alongside the resolved values.
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub file_name: String,
    pub version_needed: u16,
    pub flags: u16,
    pub crc32: u32,
    pub raw_size: u32,
    pub raw_offset: u32,
    pub size: u64,
    pub lfh_offset: u64,
    pub external_attrs: u32,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub zip64_extra: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ListedArchive {
    pub entries: Vec<ListedEntry>,
    pub cd_offset: u64,
    pub zip64_end: bool,
}

/// Parse a complete archive.
pub fn list(archive: &[u8]) -> Result<ListedArchive> {
    list_tail(archive, 0)
}

/// Parse an archive from its final bytes; `tail_start` is the archive offset of `tail[0]`.
///
/// `tail` must cover the whole central directory.
pub fn list_tail(tail: &[u8], tail_start: u64) -> Result<ListedArchive> {
    if tail.len() < EOCD_SIZE {
        bail!("Not a valid ZIP file");
    }
    let eocd_pos = tail.len() - EOCD_SIZE;
    let mut cursor = Cursor::new(&tail[eocd_pos..]);
    if cursor.read_u32::<LittleEndian>()? != 0x0605_4b50 {
        bail!("Invalid End of Central Directory");
    }
    let _disk_number = cursor.read_u16::<LittleEndian>()?;
    let _disk_with_cd = cursor.read_u16::<LittleEndian>()?;
    let _disk_entries = cursor.read_u16::<LittleEndian>()?;
    let total_entries = cursor.read_u16::<LittleEndian>()?;
    let cd_size = cursor.read_u32::<LittleEndian>()?;
    let cd_offset = cursor.read_u32::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    if comment_len != 0 {
        bail!("unexpected archive comment");
    }

    let zip64_end = total_entries == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_offset == 0xFFFF_FFFF;
    let (total_entries, cd_size, cd_offset) = if zip64_end {
        let locator_pos = eocd_pos - LOCATOR_SIZE;
        let mut locator = Cursor::new(&tail[locator_pos..eocd_pos]);
        if locator.read_u32::<LittleEndian>()? != 0x0706_4b50 {
            bail!("Invalid ZIP64 locator");
        }
        let _disk = locator.read_u32::<LittleEndian>()?;
        let eocd64_offset = locator.read_u64::<LittleEndian>()?;
        let eocd64_pos = (eocd64_offset - tail_start) as usize;

        let mut eocd64 = Cursor::new(&tail[eocd64_pos..locator_pos]);
        if eocd64.read_u32::<LittleEndian>()? != 0x0606_4b50 {
            bail!("Invalid ZIP64 End of Central Directory");
        }
        let _record_size = eocd64.read_u64::<LittleEndian>()?;
        let _made_by = eocd64.read_u16::<LittleEndian>()?;
        let _needed = eocd64.read_u16::<LittleEndian>()?;
        let _disk = eocd64.read_u32::<LittleEndian>()?;
        let _disk_with_cd = eocd64.read_u32::<LittleEndian>()?;
        let _disk_entries = eocd64.read_u64::<LittleEndian>()?;
        let total = eocd64.read_u64::<LittleEndian>()?;
        let size = eocd64.read_u64::<LittleEndian>()?;
        let offset = eocd64.read_u64::<LittleEndian>()?;
        (total, size, offset)
    } else {
        (total_entries as u64, cd_size as u64, cd_offset as u64)
    };

    let cd_pos = (cd_offset - tail_start) as usize;
    let cd = &tail[cd_pos..cd_pos + cd_size as usize];
    let mut cursor = Cursor::new(cd);
    let mut entries = Vec::with_capacity(total_entries as usize);
    for _ in 0..total_entries {
        entries.push(parse_cdfh(&mut cursor)?);
    }
    if cursor.position() != cd_size {
        bail!("central directory has trailing bytes");
    }

    Ok(ListedArchive {
        entries,
        cd_offset,
        zip64_end,
    })
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ListedEntry> {
    if cursor.read_u32::<LittleEndian>()? != 0x0201_4b50 {
        bail!("Invalid Central Directory File Header");
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    if method != 0 {
        bail!("unexpected compression method {method}");
    }
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    if compressed_size != uncompressed_size {
        bail!("stored entry with differing sizes");
    }
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let _file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let raw_offset = cursor.read_u32::<LittleEndian>()?;

    let mut name = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut name)?;
    let file_name = String::from_utf8(name)?;

    let mut size = uncompressed_size as u64;
    let mut lfh_offset = raw_offset as u64;
    let mut zip64_extra = None;
    if extra_field_length > 0 {
        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra)?;

        let mut fields = Cursor::new(&extra[..]);
        let header_id = fields.read_u16::<LittleEndian>()?;
        let _field_size = fields.read_u16::<LittleEndian>()?;
        if header_id != 0x0001 {
            bail!("unexpected extra field {header_id:#06x}");
        }
        // Fields are present only if the classic field holds the sentinel
        if uncompressed_size == 0xFFFF_FFFF {
            size = fields.read_u64::<LittleEndian>()?;
            let compressed = fields.read_u64::<LittleEndian>()?;
            assert_eq!(compressed, size);
        }
        if raw_offset == 0xFFFF_FFFF {
            lfh_offset = fields.read_u64::<LittleEndian>()?;
        }
        zip64_extra = Some(extra);
    }

    Ok(ListedEntry {
        file_name,
        version_needed,
        flags,
        crc32,
        raw_size: uncompressed_size,
        raw_offset,
        size,
        lfh_offset,
        external_attrs,
        last_mod_time,
        last_mod_date,
        zip64_extra,
    })
}

/// Stored bytes of `entry`, located through its local header.
pub fn entry_data<'a>(archive: &'a [u8], entry: &ListedEntry) -> Result<&'a [u8]> {
    let lfh = entry.lfh_offset as usize;
    let mut cursor = Cursor::new(&archive[lfh..lfh + 30]);
    if cursor.read_u32::<LittleEndian>()? != 0x0403_4b50 {
        bail!("Invalid Local File Header");
    }
    cursor.set_position(26);
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
    let start = lfh + 30 + name_len + extra_len;
    Ok(&archive[start..start + entry.size as usize])
}

pub async fn drain(zip: &mut ZipStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = zip.next_chunk().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 29, 13, 37, 42).unwrap()
}

/// In-memory source that counts how often it is opened.
#[derive(Clone)]
pub struct CountingSource {
    inner: BytesSource,
    pub opens: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(data: &'static [u8]) -> Self {
        Self {
            inner: BytesSource::new(data),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpenSource for CountingSource {
    async fn open(&self) -> Result<SourceReader> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open().await
    }
}

/// Source standing in for content too large to read in a test; opening it fails.
pub struct Unreadable;

#[async_trait]
impl OpenSource for Unreadable {
    async fn open(&self) -> Result<SourceReader> {
        bail!("unreadable source opened")
    }
}

/// Provider that waits before every entry.
pub struct SlowProvider {
    pub entries: VecDeque<SourceEntry>,
    pub delay: Duration,
}

#[async_trait]
impl SourceProvider for SlowProvider {
    async fn next_source(&mut self) -> Result<Option<SourceEntry>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.entries.pop_front())
    }
}

/// Source whose reader raises `released` when it is dropped.
pub struct TrackedSource {
    data: Vec<u8>,
    pub released: Arc<AtomicBool>,
}

impl TrackedSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl OpenSource for TrackedSource {
    async fn open(&self) -> Result<SourceReader> {
        Ok(Box::new(TrackedReader {
            inner: std::io::Cursor::new(self.data.clone()),
            released: self.released.clone(),
        }))
    }
}

struct TrackedReader {
    inner: std::io::Cursor<Vec<u8>>,
    released: Arc<AtomicBool>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
