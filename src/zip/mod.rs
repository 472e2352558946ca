//! Streaming ZIP archive generation.
//!
//! This module produces ZIP archives incrementally, one chunk per demand,
//! without buffering file contents or seeking back into emitted output.
//!
//! ## Architecture
//!
//! - [`structures`]: record layouts and little-endian packing (headers, EOCD, ZIP64 records)
//! - [`cache`]: checksums remembered across archives, keyed by source identity
//! - [`estimator`]: exact archive length computed from entry metadata
//! - [`range`]: byte-range slicing of the generated output
//! - [`generator`]: the [`ZipStream`] state machine tying them together
//!
//! ## Output Layout
//!
//! A generated archive consists of:
//! 1. For each entry, a local file header (zero checksum and sizes, flag bit 3) followed by the stored bytes
//! 2. The central directory, carrying the real checksum, sizes and offsets
//! 3. ZIP64 end record and locator, only when the directory moved past the classic limits
//! 4. The End of Central Directory (EOCD) record, without comment
//!
//! ZIP64 extra fields are added per entry only when its size or offset
//! exceeds 2^31 - 1, so small archives stay classic ZIP byte for byte.
//!
//! ## Limitations
//!
//! - Store mode only, no compression
//! - No encryption
//! - No data descriptors: sequential (local-header-walking) readers are not supported

pub mod cache;
pub mod estimator;
mod generator;
pub mod range;
pub mod structures;

pub use cache::{CachedChecksum, ChecksumCache};
pub use estimator::{SizeEstimate, archive_len};
pub use generator::{ArchiveOptions, DEFAULT_CHUNK_SIZE, ZipStream};
pub use range::RangeWindow;
pub use structures::{DosDateTime, exceeds_classic_limit};
