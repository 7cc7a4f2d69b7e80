use std::ops::Range;

use crate::error::{FormatError, Result};

/// Number of bytes in a packed presence row for `ngenomes` genomes
#[must_use]
pub fn bytes_per_row(ngenomes: usize) -> usize {
    ngenomes.div_ceil(8)
}

/// Number of 32-genome counter groups needed to cover `ngenomes` genomes
#[must_use]
pub fn num_groups(ngenomes: usize) -> usize {
    ngenomes.div_ceil(32)
}

/// Packs per-group membership counters into presence rows.
///
/// `groups[g][pos]` holds the membership bits of genomes `32g..32g+32` for the
/// k-mer starting at `pos`. Each group contributes its low-order little-endian
/// bytes, and the final group only as many bytes as needed to reach
/// `ceil(ngenomes / 8)`.
pub fn pack_counters<C: AsRef<[u32]>>(groups: &[C], ngenomes: usize) -> Result<PackedRows> {
    let nbytes = bytes_per_row(ngenomes);
    let expected = num_groups(ngenomes);
    if groups.len() != expected || expected == 0 {
        return Err(FormatError::GroupCountMismatch {
            expected,
            found: groups.len(),
            ngenomes,
        }
        .into());
    }

    let npos = groups[0].as_ref().len();
    for (group, counters) in groups.iter().enumerate() {
        let found = counters.as_ref().len();
        if found != npos {
            return Err(FormatError::CounterLengthMismatch {
                group,
                expected: npos,
                found,
            }
            .into());
        }
    }

    let widths: Vec<usize> = (0..expected).map(|g| (nbytes - 4 * g).min(4)).collect();

    let mut data = Vec::with_capacity(npos * nbytes);
    for pos in 0..npos {
        for (counters, &width) in groups.iter().zip(widths.iter()) {
            data.extend_from_slice(&counters.as_ref()[pos].to_le_bytes()[..width]);
        }
    }
    Ok(PackedRows { nbytes, data })
}

/// Row-major packed presence rows
///
/// Every row is `nbytes` long; bit `i` of a row (least-significant bit of the
/// first byte first) records presence in genome `i + 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedRows {
    nbytes: usize,
    data: Vec<u8>,
}
impl PackedRows {
    #[must_use]
    pub fn new(nbytes: usize) -> Self {
        Self {
            nbytes,
            data: Vec::new(),
        }
    }

    /// Wraps raw row bytes, checking that they hold a whole number of rows
    pub fn from_bytes(nbytes: usize, data: Vec<u8>) -> Result<Self> {
        if nbytes == 0 || data.len() % nbytes != 0 {
            return Err(FormatError::MalformedTable {
                path: "<rows>".to_string(),
                reason: format!("{} bytes is not a multiple of row width {nbytes}", data.len()),
            }
            .into());
        }
        Ok(Self { nbytes, data })
    }

    /// Packs boolean rows, one `bool` per genome
    #[must_use]
    pub fn from_presence<R: AsRef<[bool]>>(rows: &[R], ngenomes: usize) -> Self {
        let nbytes = bytes_per_row(ngenomes);
        let mut packed = Self::new(nbytes);
        let mut buf = vec![0u8; nbytes];
        for row in rows {
            buf.fill(0);
            for (genome, _) in row
                .as_ref()
                .iter()
                .take(ngenomes)
                .enumerate()
                .filter(|(_, present)| **present)
            {
                buf[genome / 8] |= 1 << (genome % 8);
            }
            packed.push_row(&buf);
        }
        packed
    }

    #[must_use]
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        if self.nbytes == 0 {
            0
        } else {
            self.data.len() / self.nbytes
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn row(&self, idx: usize) -> &[u8] {
        &self.data[idx * self.nbytes..(idx + 1) * self.nbytes]
    }

    pub fn push_row(&mut self, row: &[u8]) {
        debug_assert_eq!(row.len(), self.nbytes);
        self.data.extend_from_slice(row);
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.nbytes.max(1))
    }

    /// Iterates rows `0, step, 2 * step, ...`
    pub fn rows_step(&self, step: usize) -> impl Iterator<Item = &[u8]> {
        self.rows().step_by(step.max(1))
    }

    /// Keeps every `step`-th row starting at row 0
    #[must_use]
    pub fn subsample(&self, step: usize) -> Self {
        if step <= 1 {
            return self.clone();
        }
        let mut out = Self::new(self.nbytes);
        out.data.reserve(self.len().div_ceil(step) * self.nbytes);
        for row in self.rows_step(step) {
            out.push_row(row);
        }
        out
    }

    /// Number of genomes set in each row, ignoring padding bits past `ngenomes`
    #[must_use]
    pub fn occurrence_counts(&self, ngenomes: usize) -> Vec<u32> {
        let mask = last_byte_mask(ngenomes);
        self.rows()
            .map(|row| match row.split_last() {
                Some((last, head)) => {
                    head.iter().map(|b| b.count_ones()).sum::<u32>() + (last & mask).count_ones()
                }
                None => 0,
            })
            .collect()
    }

    /// Expands packed rows into a boolean matrix truncated to `ngenomes` columns
    #[must_use]
    pub fn unpack(&self, ngenomes: usize) -> PresenceMatrix {
        let mut bits = Vec::with_capacity(self.len() * ngenomes);
        for row in self.rows() {
            bits.extend((0..ngenomes).map(|genome| (row[genome / 8] >> (genome % 8)) & 1 == 1));
        }
        PresenceMatrix { ngenomes, bits }
    }
}

fn last_byte_mask(ngenomes: usize) -> u8 {
    match ngenomes % 8 {
        0 => u8::MAX,
        r => (1u8 << r) - 1,
    }
}

/// Boolean presence matrix: one row per position, one column per genome
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenceMatrix {
    ngenomes: usize,
    bits: Vec<bool>,
}
impl PresenceMatrix {
    /// Builds a matrix from row-major booleans, checking that they hold a whole number of rows
    pub fn new(ngenomes: usize, bits: Vec<bool>) -> Result<Self> {
        if ngenomes == 0 || bits.len() % ngenomes != 0 {
            return Err(FormatError::MalformedTable {
                path: "<matrix>".to_string(),
                reason: format!("{} cells is not a multiple of {ngenomes} genomes", bits.len()),
            }
            .into());
        }
        Ok(Self { ngenomes, bits })
    }

    #[must_use]
    pub fn empty(ngenomes: usize) -> Self {
        Self {
            ngenomes,
            bits: Vec::new(),
        }
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.ngenomes
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        if self.ngenomes == 0 {
            0
        } else {
            self.bits.len() / self.ngenomes
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[must_use]
    pub fn row(&self, idx: usize) -> &[bool] {
        &self.bits[idx * self.ngenomes..(idx + 1) * self.ngenomes]
    }

    /// Presence of genome column `genome` (0-based) at row `idx`
    #[must_use]
    pub fn get(&self, idx: usize, genome: usize) -> bool {
        self.row(idx)[genome]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[bool]> {
        self.bits.chunks_exact(self.ngenomes.max(1))
    }

    /// Copies rows `range` into a new matrix
    #[must_use]
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            ngenomes: self.ngenomes,
            bits: self.bits[range.start * self.ngenomes..range.end * self.ngenomes].to_vec(),
        }
    }

    /// Number of genomes present in each row
    #[must_use]
    pub fn row_counts(&self) -> Vec<u32> {
        self.rows()
            .map(|row| row.iter().filter(|b| **b).count() as u32)
            .collect()
    }

    #[must_use]
    pub fn pack(&self) -> PackedRows {
        PackedRows::from_presence(&self.rows().collect::<Vec<_>>(), self.ngenomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_matrix_shape() -> crate::Result<()> {
        let matrix = PresenceMatrix::new(3, vec![true, false, true, false, false, true])?;
        assert_eq!(matrix.nrows(), 2);
        assert!(PresenceMatrix::new(3, vec![true; 4])
            .unwrap_err()
            .is_format_error());
        assert!(PresenceMatrix::new(0, Vec::new()).unwrap_err().is_format_error());
        Ok(())
    }

    #[test]
    fn test_bytes_per_row() {
        assert_eq!(bytes_per_row(1), 1);
        assert_eq!(bytes_per_row(8), 1);
        assert_eq!(bytes_per_row(9), 2);
        assert_eq!(bytes_per_row(33), 5);
        assert_eq!(num_groups(32), 1);
        assert_eq!(num_groups(33), 2);
    }

    #[test]
    fn test_pack_single_group() -> crate::Result<()> {
        // genomes A,B,C: bits 0,1,2
        let counters = vec![0b111u32, 0b011, 0b001, 0b110, 0b111];
        let rows = pack_counters(&[counters], 3)?;
        assert_eq!(rows.nbytes(), 1);
        assert_eq!(rows.as_bytes(), &[0b111, 0b011, 0b001, 0b110, 0b111]);
        Ok(())
    }

    #[test]
    fn test_pack_truncates_final_group() -> crate::Result<()> {
        // 40 genomes: 5 bytes per row, 4 from group 0 and 1 from group 1
        let g0 = vec![0xDDCC_BBAAu32, 0x0403_0201];
        let g1 = vec![0xFFFF_FF11u32, 0xFFFF_FF22];
        let rows = pack_counters(&[g0, g1], 40)?;
        assert_eq!(rows.nbytes(), 5);
        assert_eq!(rows.row(0), &[0xAA, 0xBB, 0xCC, 0xDD, 0x11]);
        assert_eq!(rows.row(1), &[0x01, 0x02, 0x03, 0x04, 0x22]);
        Ok(())
    }

    #[test]
    fn test_pack_rejects_wrong_group_count() {
        let g0 = vec![1u32; 4];
        assert!(pack_counters(&[g0.clone(), g0], 3).is_err());
        let none: [Vec<u32>; 0] = [];
        assert!(pack_counters(&none, 3).is_err());
    }

    #[test]
    fn test_pack_rejects_ragged_groups() {
        let g0 = vec![1u32; 4];
        let g1 = vec![1u32; 3];
        assert!(pack_counters(&[g0, g1], 40).is_err());
    }

    #[test]
    fn test_unpack_lsb_first() {
        let rows = PackedRows::from_bytes(1, vec![0b011, 0b110]).unwrap();
        let matrix = rows.unpack(3);
        assert_eq!(matrix.nrows(), 2);
        assert_eq!(matrix.row(0), &[true, true, false]);
        assert_eq!(matrix.row(1), &[false, true, true]);
    }

    #[test]
    fn test_unpack_discards_padding_bits() {
        // bits above genome 3 are padding
        let rows = PackedRows::from_bytes(1, vec![0b1111_1001]).unwrap();
        let matrix = rows.unpack(3);
        assert_eq!(matrix.ngenomes(), 3);
        assert_eq!(matrix.row(0), &[true, false, false]);
        assert_eq!(rows.occurrence_counts(3), vec![1]);
        assert_eq!(matrix.row_counts(), vec![1]);
    }

    #[test]
    fn test_from_presence_roundtrip() {
        let presence = vec![
            vec![true, true, true],
            vec![true, true, false],
            vec![true, false, false],
            vec![false, true, true],
            vec![true, true, true],
        ];
        let rows = PackedRows::from_presence(&presence, 3);
        assert_eq!(rows.as_bytes(), &[0b111, 0b011, 0b001, 0b110, 0b111]);
        let matrix = rows.unpack(3);
        for (i, row) in presence.iter().enumerate() {
            assert_eq!(matrix.row(i), row.as_slice());
        }
        assert_eq!(matrix.pack(), rows);
    }

    #[test]
    fn test_subsample() {
        let rows = PackedRows::from_bytes(1, (0..10).collect()).unwrap();
        assert_eq!(rows.subsample(3).as_bytes(), &[0, 3, 6, 9]);
        assert_eq!(rows.subsample(1), rows);
        assert_eq!(rows.subsample(20).as_bytes(), &[0]);
    }

    #[test]
    fn test_slice_rows() {
        let rows = PackedRows::from_bytes(1, vec![0b001, 0b010, 0b100]).unwrap();
        let matrix = rows.unpack(3).slice_rows(1..3);
        assert_eq!(matrix.nrows(), 2);
        assert_eq!(matrix.row(0), &[false, true, false]);
    }

    #[test]
    fn test_from_bytes_rejects_partial_row() {
        assert!(PackedRows::from_bytes(2, vec![0, 1, 2]).is_err());
        assert!(PackedRows::from_bytes(0, Vec::new()).is_err());
    }
}
