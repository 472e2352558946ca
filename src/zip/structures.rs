//! ZIP record layouts and the little-endian packing used to emit them.
//!
//! Every record is encoded into a buffer sized exactly for it; field
//! widths come from the Rust types, and writing past the end of a record
//! buffer panics rather than producing a malformed archive.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Largest value a classic (non-ZIP64) size or offset field is trusted with.
///
/// Classic fields are 32 bits wide, but values above the signed limit are
/// promoted as well since many readers treat these fields as signed.
pub const CLASSIC_LIMIT: u64 = i32::MAX as u64;

/// Placeholder stored in a 32-bit field whose real value lives in a ZIP64 record.
pub const SENTINEL_U32: u32 = 0xFFFF_FFFF;

/// Placeholder stored in a 16-bit entry count that overflowed.
pub const SENTINEL_U16: u16 = 0xFFFF;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;

/// Host system recorded in "version made by": Unix, so external attributes carry a POSIX mode.
const HOST_UNIX: u16 = 3 << 8;

/// Bit 3: sizes and checksum are only authoritative in the central directory.
pub const FLAG_DEFERRED_VALUES: u16 = 0x0008;
/// Bit 11: file names are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;
pub const GENERAL_FLAGS: u16 = FLAG_DEFERRED_VALUES | FLAG_UTF8;

/// Compression method 0: bytes are stored unmodified.
pub const METHOD_STORED: u16 = 0;

pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Returns `true` when `value` cannot be stored in a classic ZIP field.
pub fn exceeds_classic_limit(value: u64) -> bool {
    value > CLASSIC_LIMIT
}

/// Returns `true` when the archive end needs the ZIP64 end record and locator.
///
/// A count of exactly `0xFFFF` already collides with the sentinel.
pub fn needs_zip64_end(entries: u64, cd_offset: u64, cd_size: u64) -> bool {
    entries >= SENTINEL_U16 as u64 || exceeds_classic_limit(cd_offset) || exceeds_classic_limit(cd_size)
}

/// Timestamp in the MS-DOS encoding used by ZIP headers (2-second resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// Encode the UTC calendar fields of `ts`.
    ///
    /// The year is stored as an offset from 1980 masked to 7 bits, so years
    /// outside 1980..=2107 wrap instead of failing.
    pub fn from_datetime(ts: &DateTime<Utc>) -> Self {
        let year = (ts.year() - 1980) as u16 & 0x7F;
        let date = (year << 9) | ((ts.month() as u16) << 5) | ts.day() as u16;
        let time = ((ts.hour() as u16) << 11) | ((ts.minute() as u16) << 5) | (ts.second() as u16 / 2);
        Self { time, date }
    }
}

/// Local File Header - 30 bytes plus the name.
///
/// Checksum and sizes are always zero here; the central directory carries
/// the real values and no data descriptor follows the entry data.
pub struct LocalFileHeader<'a> {
    pub modified: DosDateTime,
    pub file_name: &'a [u8],
}

impl LocalFileHeader<'_> {
    pub const SIGNATURE: u32 = 0x0403_4b50;
    pub const SIZE: usize = 30;

    pub fn encoded_len(name_len: usize) -> u64 {
        (Self::SIZE + name_len) as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut fixed = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut fixed[0..4], Self::SIGNATURE);
        LittleEndian::write_u16(&mut fixed[4..6], VERSION_DEFAULT);
        LittleEndian::write_u16(&mut fixed[6..8], GENERAL_FLAGS);
        LittleEndian::write_u16(&mut fixed[8..10], METHOD_STORED);
        LittleEndian::write_u16(&mut fixed[10..12], self.modified.time);
        LittleEndian::write_u16(&mut fixed[12..14], self.modified.date);
        // crc32, compressed size and uncompressed size stay zero (bytes 14..26)
        LittleEndian::write_u16(&mut fixed[26..28], name_len_u16(self.file_name));
        // extra field length stays zero (bytes 28..30)

        let mut out = Vec::with_capacity(Self::SIZE + self.file_name.len());
        out.extend_from_slice(&fixed);
        out.extend_from_slice(self.file_name);
        out
    }
}

/// Central Directory File Header - 46 bytes plus name and optional ZIP64 extra field.
pub struct CentralDirectoryHeader<'a> {
    pub modified: DosDateTime,
    pub crc32: u32,
    pub size: u64,
    pub lfh_offset: u64,
    pub external_attrs: u32,
    pub file_name: &'a [u8],
}

impl CentralDirectoryHeader<'_> {
    pub const SIGNATURE: u32 = 0x0201_4b50;
    pub const SIZE: usize = 46;

    /// Length of the record for an entry with the given name length, size and offset.
    pub fn encoded_len(name_len: usize, size: u64, lfh_offset: u64) -> u64 {
        (Self::SIZE + name_len + zip64_extra_len(size, lfh_offset)) as u64
    }

    pub fn is_zip64(&self) -> bool {
        zip64_extra_len(self.size, self.lfh_offset) > 0
    }

    pub fn version_needed(&self) -> u16 {
        if self.is_zip64() { VERSION_ZIP64 } else { VERSION_DEFAULT }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let big_size = exceeds_classic_limit(self.size);
        let big_offset = exceeds_classic_limit(self.lfh_offset);
        let size32 = if big_size { SENTINEL_U32 } else { self.size as u32 };
        let offset32 = if big_offset { SENTINEL_U32 } else { self.lfh_offset as u32 };
        let version = self.version_needed();

        let extra = zip64_extra(self.size, self.lfh_offset);

        let mut fixed = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut fixed[0..4], Self::SIGNATURE);
        LittleEndian::write_u16(&mut fixed[4..6], HOST_UNIX | version);
        LittleEndian::write_u16(&mut fixed[6..8], version);
        LittleEndian::write_u16(&mut fixed[8..10], GENERAL_FLAGS);
        LittleEndian::write_u16(&mut fixed[10..12], METHOD_STORED);
        LittleEndian::write_u16(&mut fixed[12..14], self.modified.time);
        LittleEndian::write_u16(&mut fixed[14..16], self.modified.date);
        LittleEndian::write_u32(&mut fixed[16..20], self.crc32);
        LittleEndian::write_u32(&mut fixed[20..24], size32);
        LittleEndian::write_u32(&mut fixed[24..28], size32);
        LittleEndian::write_u16(&mut fixed[28..30], name_len_u16(self.file_name));
        LittleEndian::write_u16(&mut fixed[30..32], extra.len() as u16);
        // comment length, disk number start and internal attributes stay zero (bytes 32..38)
        LittleEndian::write_u32(&mut fixed[38..42], self.external_attrs);
        LittleEndian::write_u32(&mut fixed[42..46], offset32);

        let mut out = Vec::with_capacity(Self::SIZE + self.file_name.len() + extra.len());
        out.extend_from_slice(&fixed);
        out.extend_from_slice(self.file_name);
        out.extend_from_slice(&extra);
        out
    }
}

/// Length of the ZIP64 extended information field for an entry, zero when not needed.
pub fn zip64_extra_len(size: u64, lfh_offset: u64) -> usize {
    let mut payload = 0;
    if exceeds_classic_limit(size) {
        payload += 16;
    }
    if exceeds_classic_limit(lfh_offset) {
        payload += 8;
    }
    if payload == 0 { 0 } else { 4 + payload }
}

fn zip64_extra(size: u64, lfh_offset: u64) -> Vec<u8> {
    let len = zip64_extra_len(size, lfh_offset);
    if len == 0 {
        return Vec::new();
    }

    let mut buf = vec![0u8; len];
    LittleEndian::write_u16(&mut buf[0..2], ZIP64_EXTRA_ID);
    LittleEndian::write_u16(&mut buf[2..4], (len - 4) as u16);
    let mut pos = 4;
    if exceeds_classic_limit(size) {
        // uncompressed then compressed; identical in store mode
        LittleEndian::write_u64(&mut buf[pos..pos + 8], size);
        LittleEndian::write_u64(&mut buf[pos + 8..pos + 16], size);
        pos += 16;
    }
    if exceeds_classic_limit(lfh_offset) {
        LittleEndian::write_u64(&mut buf[pos..pos + 8], lfh_offset);
    }
    buf
}

/// End of Central Directory (EOCD) - 22 bytes, no comment.
pub struct EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIZE: usize = 22;

    pub fn is_zip64(&self) -> bool {
        needs_zip64_end(self.total_entries, self.cd_offset, self.cd_size)
    }

    /// Total length of the archive tail: ZIP64 records when needed, then the classic record.
    pub fn encoded_len(total_entries: u64, cd_offset: u64, cd_size: u64) -> u64 {
        let mut len = Self::SIZE as u64;
        if needs_zip64_end(total_entries, cd_offset, cd_size) {
            len += (Zip64EOCD::SIZE + Zip64EOCDLocator::SIZE) as u64;
        }
        len
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let zip64 = self.is_zip64();
        let entries16 = if self.total_entries >= SENTINEL_U16 as u64 {
            SENTINEL_U16
        } else {
            self.total_entries as u16
        };
        let (size32, offset32) = if zip64 {
            (SENTINEL_U32, SENTINEL_U32)
        } else {
            (self.cd_size as u32, self.cd_offset as u32)
        };

        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], Self::SIGNATURE);
        // disk number and disk with central directory stay zero (bytes 4..8)
        LittleEndian::write_u16(&mut buf[8..10], entries16);
        LittleEndian::write_u16(&mut buf[10..12], entries16);
        LittleEndian::write_u32(&mut buf[12..16], size32);
        LittleEndian::write_u32(&mut buf[16..20], offset32);
        // comment length stays zero (bytes 20..22)
        buf.to_vec()
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: u32 = 0x0706_4b50;
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], Self::SIGNATURE);
        LittleEndian::write_u32(&mut buf[4..8], 0);
        LittleEndian::write_u64(&mut buf[8..16], self.eocd64_offset);
        LittleEndian::write_u32(&mut buf[16..20], 1);
        buf.to_vec()
    }
}

/// ZIP64 End of Central Directory - 56 bytes
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: u32 = 0x0606_4b50;
    pub const SIZE: usize = 56;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], Self::SIGNATURE);
        // size of the remaining record, excluding signature and this field
        LittleEndian::write_u64(&mut buf[4..12], (Self::SIZE - 12) as u64);
        LittleEndian::write_u16(&mut buf[12..14], HOST_UNIX | VERSION_ZIP64);
        LittleEndian::write_u16(&mut buf[14..16], VERSION_ZIP64);
        // disk number and disk with central directory stay zero (bytes 16..24)
        LittleEndian::write_u64(&mut buf[24..32], self.total_entries);
        LittleEndian::write_u64(&mut buf[32..40], self.total_entries);
        LittleEndian::write_u64(&mut buf[40..48], self.cd_size);
        LittleEndian::write_u64(&mut buf[48..56], self.cd_offset);
        buf.to_vec()
    }
}

/// Encode everything after the central directory.
///
/// `position` is the archive offset at which the tail starts, i.e. the
/// end of the central directory.
pub fn encode_archive_end(total_entries: u64, cd_offset: u64, cd_size: u64, position: u64) -> Vec<u8> {
    let eocd = EndOfCentralDirectory {
        total_entries,
        cd_size,
        cd_offset,
    };

    let mut out = Vec::with_capacity(
        EndOfCentralDirectory::encoded_len(total_entries, cd_offset, cd_size) as usize,
    );
    if eocd.is_zip64() {
        let eocd64 = Zip64EOCD {
            total_entries,
            cd_size,
            cd_offset,
        };
        out.extend_from_slice(&eocd64.to_bytes());
        out.extend_from_slice(&Zip64EOCDLocator { eocd64_offset: position }.to_bytes());
    }
    out.extend_from_slice(&eocd.to_bytes());
    out
}

/// Names longer than a 16-bit length field can describe are a caller bug.
fn name_len_u16(name: &[u8]) -> u16 {
    assert!(
        name.len() <= u16::MAX as usize,
        "file name of {} bytes does not fit a ZIP header",
        name.len()
    );
    name.len() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classic_limit_boundary() {
        assert!(!exceeds_classic_limit(0));
        assert!(!exceeds_classic_limit(2_147_483_647));
        assert!(exceeds_classic_limit(2_147_483_648));
        assert!(exceeds_classic_limit(3_000_000_000));
    }

    #[test]
    fn dos_time_truncates_to_two_seconds() {
        let ts = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 27).unwrap();
        let dos = DosDateTime::from_datetime(&ts);
        assert_eq!(dos.date, (41 << 9) | (3 << 5) | 14);
        assert_eq!(dos.time, (15 << 11) | (9 << 5) | 13);
    }

    #[test]
    fn dos_year_wraps_to_seven_bits() {
        let ts = Utc.with_ymd_and_hms(1979, 12, 31, 0, 0, 0).unwrap();
        let dos = DosDateTime::from_datetime(&ts);
        assert_eq!(dos.date >> 9, 0x7F);
    }

    #[test]
    fn local_header_defers_sizes() {
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let bytes = LocalFileHeader {
            modified: DosDateTime::from_datetime(&ts),
            file_name: b"a.txt",
        }
        .to_bytes();

        assert_eq!(bytes.len(), 35);
        assert_eq!(&bytes[0..4], b"PK\x03\x04");
        assert_eq!(LittleEndian::read_u16(&bytes[4..6]), 20);
        assert_eq!(LittleEndian::read_u16(&bytes[6..8]) & FLAG_DEFERRED_VALUES, FLAG_DEFERRED_VALUES);
        assert_eq!(&bytes[14..26], &[0u8; 12]);
        assert_eq!(LittleEndian::read_u16(&bytes[26..28]), 5);
        assert_eq!(&bytes[30..], b"a.txt");
    }

    #[test]
    fn central_header_without_zip64() {
        let header = CentralDirectoryHeader {
            modified: DosDateTime { time: 0, date: 0 },
            crc32: 0xDEAD_BEEF,
            size: 10,
            lfh_offset: 100,
            external_attrs: 0o644 << 16,
            file_name: b"x",
        };
        let bytes = header.to_bytes();

        assert_eq!(bytes.len() as u64, CentralDirectoryHeader::encoded_len(1, 10, 100));
        assert_eq!(bytes.len(), 47);
        assert_eq!(LittleEndian::read_u16(&bytes[6..8]), 20);
        assert_eq!(LittleEndian::read_u32(&bytes[16..20]), 0xDEAD_BEEF);
        assert_eq!(LittleEndian::read_u32(&bytes[24..28]), 10);
        assert_eq!(LittleEndian::read_u16(&bytes[30..32]), 0);
        assert_eq!(LittleEndian::read_u32(&bytes[38..42]), 0o644 << 16);
        assert_eq!(LittleEndian::read_u32(&bytes[42..46]), 100);
    }

    #[test]
    fn central_header_offset_only_zip64() {
        let header = CentralDirectoryHeader {
            modified: DosDateTime { time: 0, date: 0 },
            crc32: 1,
            size: 2,
            lfh_offset: 5_000_000_000,
            external_attrs: 0,
            file_name: b"b",
        };
        let bytes = header.to_bytes();

        assert_eq!(LittleEndian::read_u16(&bytes[6..8]), VERSION_ZIP64);
        assert_eq!(LittleEndian::read_u32(&bytes[24..28]), 2);
        assert_eq!(LittleEndian::read_u32(&bytes[42..46]), SENTINEL_U32);
        assert_eq!(LittleEndian::read_u16(&bytes[30..32]), 12);
        let extra = &bytes[47..];
        assert_eq!(LittleEndian::read_u16(&extra[0..2]), ZIP64_EXTRA_ID);
        assert_eq!(LittleEndian::read_u16(&extra[2..4]), 8);
        assert_eq!(LittleEndian::read_u64(&extra[4..12]), 5_000_000_000);
    }

    #[test]
    fn empty_archive_end() {
        let bytes = encode_archive_end(0, 0, 0, 0);
        assert_eq!(
            bytes,
            vec![
                0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0
            ]
        );
    }

    #[test]
    fn entry_count_sentinel_needs_zip64_end() {
        assert!(!needs_zip64_end(0xFFFE, 0, 0));
        assert!(needs_zip64_end(0xFFFF, 0, 0));

        let bytes = encode_archive_end(0xFFFF, 100, 200, 300);
        assert_eq!(bytes.len(), 56 + 20 + 22);
        assert_eq!(LittleEndian::read_u64(&bytes[32..40]), 0xFFFF);
        let eocd = &bytes[76..];
        assert_eq!(LittleEndian::read_u16(&eocd[10..12]), SENTINEL_U16);
    }

    #[test]
    fn zip64_end_when_directory_moves_past_limit() {
        let bytes = encode_archive_end(3, 3_000_000_100, 150, 3_000_000_250);
        assert_eq!(bytes.len(), 56 + 20 + 22);
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), Zip64EOCD::SIGNATURE);
        assert_eq!(LittleEndian::read_u64(&bytes[48..56]), 3_000_000_100);
        assert_eq!(LittleEndian::read_u32(&bytes[56..60]), Zip64EOCDLocator::SIGNATURE);
        assert_eq!(LittleEndian::read_u64(&bytes[64..72]), 3_000_000_250);
        let eocd = &bytes[76..];
        assert_eq!(LittleEndian::read_u16(&eocd[10..12]), 3);
        assert_eq!(LittleEndian::read_u32(&eocd[16..20]), SENTINEL_U32);
    }
}
