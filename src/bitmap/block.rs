use std::io;

use bytemuck::{Pod, Zeroable};
use zstd::zstd_safe;

use super::{BLOCK_MAGIC, BLOCK_VERSION};
use crate::error::{FormatError, Result};

/// Header preceding every compressed block.
///
/// This is stored identically in memory and on disk.
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct BlockHeader {
    magic: [u8; 3],
    version: u8,

    /// Length of the compressed frame following the header
    pub(crate) z_len: u32,

    /// Length of the block once decompressed
    pub(crate) u_len: u32,

    reserved: [u8; 4],
}
impl BlockHeader {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(z_len: usize, u_len: usize) -> Self {
        Self {
            magic: *BLOCK_MAGIC,
            version: BLOCK_VERSION,
            z_len: z_len as u32,
            u_len: u_len as u32,
            reserved: [0; 4],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads a header from `bytes`, which need not be aligned.
    ///
    /// `offset` is the compressed offset of the block and only used for error reporting.
    pub fn from_bytes(bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(FormatError::TruncatedBlock(offset).into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..Self::SIZE]);
        if header.magic != *BLOCK_MAGIC {
            return Err(FormatError::InvalidBlockMagic(offset).into());
        }
        Ok(header)
    }

    /// Total length of the block on disk, header included
    pub fn block_len(&self) -> usize {
        Self::SIZE + self.z_len as usize
    }
}

/// A composite position in a block-compressed stream.
///
/// The upper 48 bits hold the compressed offset of a block header, the lower
/// 16 bits an offset into that block's decompressed bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualPosition(u64);
impl VirtualPosition {
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        Self((compressed << 16) | u64::from(uncompressed))
    }

    pub fn compressed(self) -> u64 {
        self.0 >> 16
    }

    pub fn uncompressed(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}
impl From<u64> for VirtualPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
impl From<VirtualPosition> for u64 {
    fn from(value: VirtualPosition) -> Self {
        value.0
    }
}

/// Compresses `src` into `dst` as a single ZSTD frame using a reusable context
pub(crate) fn compress_block(
    dst: &mut Vec<u8>,
    src: &[u8],
    level: i32,
    cctx: &mut zstd_safe::CCtx,
) -> Result<()> {
    // determine the maximum compressed size
    dst.resize(zstd_safe::compress_bound(src.len()), 0);

    let true_size = cctx
        .compress(dst.as_mut_slice(), src, level)
        .map_err(|e| io::Error::other(zstd_safe::get_error_name(e)))?;

    // clip to the true compressed size
    dst.truncate(true_size);
    Ok(())
}

/// Decompresses the frame of a block whose header starts at `offset`
pub(crate) fn decompress_block(
    dst: &mut Vec<u8>,
    frame: &[u8],
    header: BlockHeader,
    offset: u64,
    dctx: &mut zstd_safe::DCtx,
) -> Result<()> {
    let expected = header.u_len as usize;
    dst.resize(expected, 0);
    let found = dctx
        .decompress(dst.as_mut_slice(), frame)
        .map_err(|e| io::Error::other(zstd_safe::get_error_name(e)))?;
    if found != expected {
        return Err(FormatError::BlockSizeMismatch {
            offset,
            expected,
            found,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(BlockHeader::SIZE, 16);
    }

    #[test]
    fn test_header_roundtrip_unaligned() -> crate::Result<()> {
        let header = BlockHeader::new(123, 4567);
        let mut buf = vec![0u8; 1];
        buf.extend_from_slice(header.as_bytes());
        let parsed = BlockHeader::from_bytes(&buf[1..], 0)?;
        assert_eq!(parsed, header);
        assert_eq!(parsed.block_len(), 16 + 123);
        Ok(())
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut bytes = BlockHeader::new(1, 1).as_bytes().to_vec();
        bytes[0] = b'X';
        assert!(BlockHeader::from_bytes(&bytes, 99).is_err());
    }

    #[test]
    fn test_header_truncated() {
        let bytes = BlockHeader::new(1, 1).as_bytes().to_vec();
        assert!(BlockHeader::from_bytes(&bytes[..10], 0).is_err());
    }

    #[test]
    fn test_virtual_position() {
        let vpos = VirtualPosition::new(123_456, 789);
        assert_eq!(vpos.compressed(), 123_456);
        assert_eq!(vpos.uncompressed(), 789);
        assert_eq!(u64::from(vpos), (123_456 << 16) | 789);
        assert_eq!(VirtualPosition::from(u64::from(vpos)), vpos);
    }

    #[test]
    fn test_compress_decompress_block() -> crate::Result<()> {
        let src: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        let mut cctx = zstd_safe::CCtx::create();
        let mut dctx = zstd_safe::DCtx::create();

        let mut zbuf = Vec::new();
        compress_block(&mut zbuf, &src, 3, &mut cctx)?;
        let header = BlockHeader::new(zbuf.len(), src.len());

        let mut ubuf = Vec::new();
        decompress_block(&mut ubuf, &zbuf, header, 0, &mut dctx)?;
        assert_eq!(ubuf, src);
        Ok(())
    }
}
