use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytemuck::{Pod, Zeroable};

use super::{VirtualPosition, MAX_BLOCK_SIZE};
use crate::error::{FormatError, Result};

/// A block boundary recorded in the [`BlockIndex`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BlockEntry {
    /// Byte offset of the block header in the compressed stream
    pub compressed: u64,

    /// Offset of the block's first byte in the decompressed stream
    pub decompressed: u64,
}
impl BlockEntry {
    #[must_use]
    pub fn new(compressed: u64, decompressed: u64) -> Self {
        Self {
            compressed,
            decompressed,
        }
    }
}

/// Maps decompressed byte offsets to compressed block starts.
///
/// The first entry is always the implicit `(0, 0)` block start; it is never
/// written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndex {
    entries: Vec<BlockEntry>,
}
impl Default for BlockIndex {
    fn default() -> Self {
        Self {
            entries: vec![BlockEntry::default()],
        }
    }
}
impl BlockIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a block after the first
    pub(crate) fn push(&mut self, entry: BlockEntry) {
        debug_assert!(self
            .entries
            .last()
            .is_none_or(|last| last.compressed < entry.compressed
                && last.decompressed < entry.decompressed));
        self.entries.push(entry);
    }

    /// Number of blocks covered by the index, including the implicit first block
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    #[must_use]
    pub fn last(&self) -> BlockEntry {
        self.entries.last().copied().unwrap_or_default()
    }

    /// Finds the block containing `offset` in the decompressed stream.
    ///
    /// Selects the last entry whose decompressed start is `<= offset`; an exact
    /// match selects that entry.
    #[must_use]
    pub fn find(&self, offset: u64) -> BlockEntry {
        self.entries[self.position(offset)]
    }

    fn position(&self, offset: u64) -> usize {
        self.entries
            .partition_point(|entry| entry.decompressed <= offset)
            .saturating_sub(1)
    }

    /// Composite seek position for a decompressed `offset` that lies within the stream
    pub(crate) fn locate(&self, offset: u64) -> Result<VirtualPosition> {
        let position = self.position(offset);
        let entry = self.entries[position];
        let delta = offset - entry.decompressed;
        match u16::try_from(delta) {
            Ok(delta) => Ok(VirtualPosition::new(entry.compressed, delta)),
            Err(_) => Err(FormatError::OversizedBlock {
                entry: position,
                span: delta,
            }
            .into()),
        }
    }

    /// Writes the persisted entries (all but the implicit first)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let stored = &self.entries[1..];
        writer.write_u64::<LittleEndian>(stored.len() as u64)?;
        for entry in stored {
            writer.write_u64::<LittleEndian>(entry.compressed)?;
            writer.write_u64::<LittleEndian>(entry.decompressed)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let expected = reader.read_u64::<LittleEndian>()?;
        let mut index = Self::default();
        for found in 0..expected {
            let pair = reader
                .read_u64::<LittleEndian>()
                .and_then(|c| reader.read_u64::<LittleEndian>().map(|d| (c, d)));
            let (compressed, decompressed) = match pair {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(FormatError::TruncatedIndex { expected, found }.into());
                }
                Err(e) => return Err(e.into()),
            };
            let last = index.last();
            if compressed <= last.compressed || decompressed <= last.decompressed {
                return Err(FormatError::UnorderedIndex(index.entries.len()).into());
            }
            let span = decompressed - last.decompressed;
            if span > MAX_BLOCK_SIZE as u64 {
                return Err(FormatError::OversizedBlock {
                    entry: index.entries.len() - 1,
                    span,
                }
                .into());
            }
            index.entries.push(BlockEntry::new(compressed, decompressed));
        }
        Ok(index)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FormatError::MissingFile(path.display().to_string()).into(),
            _ => crate::Error::from(e),
        })?;
        Self::read_from(&mut BufReader::new(file))
    }
}
