use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zstd::zstd_safe;

use super::block::{compress_block, BlockHeader};
use super::{BlockEntry, BlockIndex, PackedRows, BITMAP_SUFFIX, INDEX_SUFFIX, MAX_BLOCK_SIZE};
use crate::error::{ConfigError, Result};

/// Block-compressing writer for a single bitmap stream.
///
/// Bytes are buffered until a block is full, then compressed as one ZSTD frame
/// and appended to the inner writer behind a [`BlockHeader`]. The start of
/// every block after the first is recorded in a [`BlockIndex`].
pub struct BlockWriter<W: Write> {
    /// Internal writer for the compressed stream
    inner: W,

    /// Decompressed block size
    block_size: usize,

    /// Compression level
    level: i32,

    /// Uncompressed buffer
    ubuf: Vec<u8>,

    /// Compressed buffer
    zbuf: Vec<u8>,

    /// Compression context for the writer
    cctx: zstd_safe::CCtx<'static>,

    /// Bytes written to the compressed stream
    compressed: u64,

    /// Bytes flushed from the decompressed stream
    decompressed: u64,

    index: BlockIndex,
}
impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W, block_size: usize, level: i32) -> Result<Self> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::InvalidBlockSize(block_size, MAX_BLOCK_SIZE).into());
        }
        Ok(Self {
            inner,
            block_size,
            level,
            ubuf: Vec::with_capacity(block_size),
            zbuf: Vec::with_capacity(block_size),
            cctx: zstd_safe::CCtx::create(),
            compressed: 0,
            decompressed: 0,
            index: BlockIndex::new(),
        })
    }

    /// Total decompressed bytes written so far, buffered bytes included
    pub fn bytes_written(&self) -> u64 {
        self.decompressed + self.ubuf.len() as u64
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let take = (self.block_size - self.ubuf.len()).min(bytes.len());
            self.ubuf.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.ubuf.len() == self.block_size {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    /// Compresses and writes the buffered bytes as one block
    pub fn flush_block(&mut self) -> Result<()> {
        if self.ubuf.is_empty() {
            return Ok(());
        }
        if self.compressed > 0 {
            self.index
                .push(BlockEntry::new(self.compressed, self.decompressed));
        }

        compress_block(&mut self.zbuf, &self.ubuf, self.level, &mut self.cctx)?;
        let header = BlockHeader::new(self.zbuf.len(), self.ubuf.len());
        self.inner.write_all(header.as_bytes())?;
        self.inner.write_all(&self.zbuf)?;

        self.compressed += header.block_len() as u64;
        self.decompressed += self.ubuf.len() as u64;
        self.ubuf.clear();
        Ok(())
    }

    /// Flushes the final block and returns the inner writer and the block index
    pub fn finish(mut self) -> Result<(W, BlockIndex)> {
        self.flush_block()?;
        self.inner.flush()?;
        Ok((self.inner, self.index))
    }
}

/// Writes one bitmap stream per stored step for a single anchor genome.
pub struct MultiResWriter {
    steps: Vec<u64>,
    writers: Vec<BlockWriter<BufWriter<File>>>,
    index_paths: Vec<PathBuf>,
}
impl MultiResWriter {
    /// Creates `bitmap.<step>.pbz` files in `dir`, one per step
    pub fn create<P: AsRef<Path>>(
        dir: P,
        steps: &[u64],
        block_size: usize,
        level: i32,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let mut writers = Vec::with_capacity(steps.len());
        let mut index_paths = Vec::with_capacity(steps.len());
        for &step in steps {
            let handle = BufWriter::new(File::create(bitmap_path(dir, step))?);
            writers.push(BlockWriter::new(handle, block_size, level)?);
            index_paths.push(index_path(dir, step));
        }
        Ok(Self {
            steps: steps.to_vec(),
            writers,
            index_paths,
        })
    }

    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    /// Appends the rows of one chromosome to every step's stream.
    ///
    /// Step `s` receives rows `0, s, 2s, ...`.
    pub fn write_chromosome(&mut self, rows: &PackedRows) -> Result<()> {
        for (&step, writer) in self.steps.iter().zip(self.writers.iter_mut()) {
            if step == 1 {
                writer.write_all(rows.as_bytes())?;
            } else {
                for row in rows.rows_step(step as usize) {
                    writer.write_all(row)?;
                }
            }
        }
        Ok(())
    }

    /// Decompressed bytes written so far for each step
    pub fn bytes_written(&self) -> Vec<(u64, u64)> {
        self.steps
            .iter()
            .zip(self.writers.iter())
            .map(|(&step, writer)| (step, writer.bytes_written()))
            .collect()
    }

    /// Flushes all streams and persists their block indices
    pub fn finish(self) -> Result<()> {
        for ((step, writer), path) in self
            .steps
            .into_iter()
            .zip(self.writers)
            .zip(self.index_paths)
        {
            let total = writer.bytes_written();
            let (_, index) = writer.finish()?;
            index.save(&path)?;
            debug!(
                "Wrote step {step}: {total} bytes in {} blocks",
                index.num_blocks()
            );
        }
        Ok(())
    }
}

/// Path of the bitmap stream for `step` in a genome directory
pub(crate) fn bitmap_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("bitmap.{step}.{BITMAP_SUFFIX}"))
}

/// Path of the block index for `step` in a genome directory
pub(crate) fn index_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("bitmap.{step}.{INDEX_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_block_size() {
        assert!(BlockWriter::new(Vec::new(), 0, 3).is_err());
        assert!(BlockWriter::new(Vec::new(), MAX_BLOCK_SIZE + 1, 3).is_err());
        assert!(BlockWriter::new(Vec::new(), MAX_BLOCK_SIZE, 3).is_ok());
    }

    #[test]
    fn test_empty_writer() -> crate::Result<()> {
        let writer = BlockWriter::new(Vec::new(), 16, 3)?;
        let (inner, index) = writer.finish()?;
        assert!(inner.is_empty());
        assert_eq!(index.num_blocks(), 1);
        Ok(())
    }

    #[test]
    fn test_block_boundaries() -> crate::Result<()> {
        let mut writer = BlockWriter::new(Vec::new(), 10, 3)?;
        writer.write_all(&[1u8; 25])?;
        assert_eq!(writer.bytes_written(), 25);
        let (inner, index) = writer.finish()?;

        // blocks of 10, 10, 5 decompressed bytes
        assert_eq!(index.num_blocks(), 3);
        let entries = index.entries();
        assert_eq!(entries[0], BlockEntry::new(0, 0));
        assert_eq!(entries[1].decompressed, 10);
        assert_eq!(entries[2].decompressed, 20);

        // each entry points at a valid header
        for entry in entries {
            let header = BlockHeader::from_bytes(&inner[entry.compressed as usize..], entry.compressed)?;
            assert!(header.u_len <= 10);
        }
        Ok(())
    }

    #[test]
    fn test_exact_block_fill_has_no_trailing_entry() -> crate::Result<()> {
        let mut writer = BlockWriter::new(Vec::new(), 8, 3)?;
        writer.write_all(&[7u8; 16])?;
        let (_, index) = writer.finish()?;
        assert_eq!(index.num_blocks(), 2);
        assert_eq!(index.last().decompressed, 8);
        Ok(())
    }
}
