//! # Bitmap Format
//!
//! A bitmap file stores one packed presence row per k-mer start position for
//! every chromosome of an anchor genome, concatenated in chromosome table
//! order with no separators. Each row is `ceil(G / 8)` bytes, one bit per
//! genome, least-significant bit first.
//!
//! ## File Structure
//!
//! The row stream is cut into blocks of at most [`MAX_BLOCK_SIZE`] decompressed
//! bytes. Each block is a single ZSTD frame preceded by a fixed-size
//! [`BlockHeader`]:
//!
//! ```text
//! ┌───────────────────┐
//! │   Block Header    │ 16 bytes
//! ├───────────────────┤
//! │   ZSTD frame      │ Variable size
//! ├───────────────────┤
//! │       ...         │ More blocks
//! └───────────────────┘
//! ```
//!
//! ## Block Index
//!
//! Each bitmap file has a companion [`BlockIndex`] file:
//!
//! ```text
//! [u64 n][u64 compressed_start, u64 decompressed_start] x n
//! ```
//!
//! All integers are little-endian. A `(0, 0)` entry for the first block is
//! implied and not stored. Combined with the block headers this lets a reader
//! jump to any decompressed byte offset by decompressing a single block.
//!
//! One bitmap file and one index file are written per stored step; step 1 is
//! always present.

mod block;
mod index;
mod pack;
mod read;
mod write;

pub use block::BlockHeader;
pub use index::{BlockEntry, BlockIndex};
pub use pack::{bytes_per_row, num_groups, pack_counters, PackedRows, PresenceMatrix};
pub use read::BitmapReader;
pub use write::{BlockWriter, MultiResWriter};

pub(crate) use block::VirtualPosition;
pub(crate) use write::{bitmap_path, index_path};

/// The magic number for bitmap blocks.
pub const BLOCK_MAGIC: &[u8; 3] = b"PBB";

/// The current block version.
pub const BLOCK_VERSION: u8 = 1;

/// The largest decompressed block size addressable by a virtual position.
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize;

/// The default decompressed block size.
pub const DEFAULT_BLOCK_SIZE: usize = 0xff00;

/// The default ZSTD compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Extension of the block-compressed row stream.
pub const BITMAP_SUFFIX: &str = "pbz";

/// Extension of the block index companion file.
pub const INDEX_SUFFIX: &str = "pbi";
