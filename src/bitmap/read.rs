use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use zstd::zstd_safe;

use super::block::{decompress_block, BlockHeader};
use super::{BlockIndex, VirtualPosition};
use crate::error::{Error, FormatError, Result};

/// Random-access reader for a block-compressed bitmap stream.
///
/// The compressed stream is memory-mapped and a single block is held
/// decompressed at a time. A reader keeps a seek cursor, so it must not be
/// shared between concurrent callers; clone it to obtain an independent handle
/// over the same mapping and index.
pub struct BitmapReader {
    inner: Arc<Mmap>,
    index: Arc<BlockIndex>,

    /// Length of the decompressed stream
    total: u64,

    /// Decompressed bytes of the current block
    ubuf: Vec<u8>,

    /// Compressed offset of the block held in `ubuf`
    current: Option<u64>,

    /// Compressed offset of the block following the current one
    next: u64,

    /// Read cursor within `ubuf`
    cursor: usize,

    /// Reusable decompression context
    dctx: zstd_safe::DCtx<'static>,
}
impl Clone for BitmapReader {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            index: self.index.clone(),
            total: self.total,
            ubuf: Vec::new(),
            current: None,
            next: 0,
            cursor: 0,
            dctx: zstd_safe::DCtx::create(),
        }
    }
}
impl BitmapReader {
    /// Opens a bitmap stream and its block index.
    ///
    /// The index is validated against the stream: its last entry must point
    /// at the final block, and that block must end exactly at end of file.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(bitmap: P, index: Q) -> Result<Self> {
        let bitmap = bitmap.as_ref();
        let index = BlockIndex::load(index)?;
        let file = File::open(bitmap).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FormatError::MissingFile(bitmap.display().to_string()).into(),
            _ => Error::from(e),
        })?;

        // Load the mmap
        let inner = unsafe { Mmap::map(&file) }?;
        let total = stream_length(&inner, &index)?;

        Ok(Self {
            inner: Arc::new(inner),
            index: Arc::new(index),
            total,
            ubuf: Vec::new(),
            current: None,
            next: 0,
            cursor: 0,
            dctx: zstd_safe::DCtx::create(),
        })
    }

    /// Length of the decompressed stream in bytes
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Reads `length` bytes starting at decompressed offset `start`
    pub fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_range_into(start, &mut buf)?;
        Ok(buf)
    }

    /// Fills `buf` with the bytes starting at decompressed offset `start`
    pub fn read_range_into(&mut self, start: u64, buf: &mut [u8]) -> Result<()> {
        if start + buf.len() as u64 > self.total {
            return Err(FormatError::ReadPastEnd {
                offset: start,
                length: buf.len(),
                total: self.total,
            }
            .into());
        }
        if buf.is_empty() {
            return Ok(());
        }
        let vpos = self.index.locate(start)?;
        self.seek(vpos)?;
        self.read_exact(buf)
    }

    /// Positions the cursor at a composite block position
    pub(crate) fn seek(&mut self, vpos: VirtualPosition) -> Result<()> {
        let compressed = vpos.compressed();
        if self.current != Some(compressed) {
            self.load_block(compressed)?;
        }
        let cursor = usize::from(vpos.uncompressed());
        if cursor > self.ubuf.len() {
            return Err(FormatError::ReadPastEnd {
                offset: u64::from(vpos),
                length: 0,
                total: self.total,
            }
            .into());
        }
        self.cursor = cursor;
        Ok(())
    }

    /// Reads from the cursor, continuing into following blocks as needed
    pub(crate) fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            if self.cursor == self.ubuf.len() {
                if self.next as usize >= self.inner.len() {
                    return Err(FormatError::ReadPastEnd {
                        offset: self.next,
                        length: buf.len(),
                        total: self.total,
                    }
                    .into());
                }
                self.load_block(self.next)?;
            }
            let take = (self.ubuf.len() - self.cursor).min(buf.len());
            buf[..take].copy_from_slice(&self.ubuf[self.cursor..self.cursor + take]);
            self.cursor += take;
            buf = &mut buf[take..];
        }
        Ok(())
    }

    fn load_block(&mut self, offset: u64) -> Result<()> {
        // ubuf is overwritten in place, so nothing is cached until it succeeds
        self.current = None;
        let (header, frame) = block_at(&self.inner, offset)?;
        decompress_block(&mut self.ubuf, frame, header, offset, &mut self.dctx)?;
        self.current = Some(offset);
        self.next = offset + header.block_len() as u64;
        self.cursor = 0;
        Ok(())
    }
}

/// Header and compressed frame of the block starting at `offset`
fn block_at(bytes: &[u8], offset: u64) -> Result<(BlockHeader, &[u8])> {
    let start = offset as usize;
    if start >= bytes.len() {
        return Err(FormatError::TruncatedBlock(offset).into());
    }
    let header = BlockHeader::from_bytes(&bytes[start..], offset)?;
    let frame_start = start + BlockHeader::SIZE;
    let frame_end = frame_start + header.z_len as usize;
    if frame_end > bytes.len() {
        return Err(FormatError::TruncatedBlock(offset).into());
    }
    Ok((header, &bytes[frame_start..frame_end]))
}

/// Derives the decompressed stream length from the final indexed block
fn stream_length(bytes: &[u8], index: &BlockIndex) -> Result<u64> {
    let last = index.last();
    if bytes.is_empty() {
        return if index.num_blocks() == 1 {
            Ok(0)
        } else {
            Err(FormatError::TruncatedBlock(last.compressed).into())
        };
    }
    let (header, _) = block_at(bytes, last.compressed)?;
    if last.compressed as usize + header.block_len() != bytes.len() {
        return Err(FormatError::TruncatedBlock(last.compressed).into());
    }
    Ok(last.decompressed + u64::from(header.u_len))
}
