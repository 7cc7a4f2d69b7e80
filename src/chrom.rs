//! Chromosome tables and per-step row offsets.
//!
//! The row offsets computed here must follow exactly the chromosome order
//! used when the bitmap streams were written; both sides iterate the same
//! [`ChromTable`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use seq_io::fasta::{self, Record};
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, IntoPanbitmapError, Result};

/// A chromosome of an anchor genome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chromosome {
    pub name: String,

    /// 0-based id, unique within the genome
    pub id: usize,

    /// Number of k-mer start positions (`sequence_length - k + 1`)
    pub size: u64,
}
impl Chromosome {
    #[must_use]
    pub fn new(name: impl Into<String>, id: usize, size: u64) -> Self {
        Self {
            name: name.into(),
            id,
            size,
        }
    }

    /// Number of k-mer start positions in a sequence of `seq_len` bases
    #[must_use]
    pub fn kmer_positions(seq_len: u64, k: usize) -> u64 {
        (seq_len + 1).saturating_sub(k as u64)
    }

    /// Number of rows stored for this chromosome at `step`
    #[must_use]
    pub fn rows(&self, step: u64) -> u64 {
        self.size.div_ceil(step)
    }
}

/// Ordered chromosomes of one genome with cumulative row offsets for every stored step
#[derive(Clone, Debug, Default)]
pub struct ChromTable {
    chroms: Vec<Chromosome>,
    by_name: HashMap<String, usize>,
    steps: Vec<u64>,

    /// `offsets[s][c]` = rows preceding chromosome `c` in the stream of `steps[s]`
    offsets: Vec<Vec<u64>>,

    /// Total rows in the stream of each step
    totals: Vec<u64>,
}
impl ChromTable {
    pub fn new(chroms: Vec<Chromosome>, steps: &[u64]) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(chroms.len());
        for (idx, chrom) in chroms.iter().enumerate() {
            if by_name.insert(chrom.name.clone(), idx).is_some() {
                return Err(FormatError::MalformedTable {
                    path: "chromosome table".to_string(),
                    reason: format!("duplicate chromosome {}", chrom.name),
                }
                .into());
            }
        }

        let mut offsets = Vec::with_capacity(steps.len());
        let mut totals = Vec::with_capacity(steps.len());
        for &step in steps {
            let mut running = 0;
            let step_offsets = chroms
                .iter()
                .map(|chrom| {
                    let offset = running;
                    running += chrom.rows(step);
                    offset
                })
                .collect();
            offsets.push(step_offsets);
            totals.push(running);
        }

        Ok(Self {
            chroms,
            by_name,
            steps: steps.to_vec(),
            offsets,
            totals,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chroms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chroms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chromosome> {
        self.chroms.iter()
    }

    #[must_use]
    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chroms
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Chromosome> {
        self.by_name.get(name).map(|&idx| &self.chroms[idx])
    }

    #[must_use]
    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    fn step_idx(&self, step: u64) -> Option<usize> {
        self.steps.iter().position(|&s| s == step)
    }

    /// Rows preceding chromosome `name` in the stream of a stored `step`
    #[must_use]
    pub fn row_offset(&self, name: &str, step: u64) -> Option<u64> {
        let chrom = *self.by_name.get(name)?;
        let step = self.step_idx(step)?;
        Some(self.offsets[step][chrom])
    }

    /// Total rows in the stream of a stored `step`
    #[must_use]
    pub fn total_rows(&self, step: u64) -> Option<u64> {
        self.step_idx(step).map(|idx| self.totals[idx])
    }

    /// Sum of chromosome sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.chroms.iter().map(|c| c.size).sum()
    }

    /// Writes `name`, `id`, `size` as a tab-separated table
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        for chrom in &self.chroms {
            writer.serialize(chrom)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, steps: &[u64]) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FormatError::MissingFile(path.display().to_string()).into());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let chroms = reader
            .deserialize()
            .collect::<std::result::Result<Vec<Chromosome>, _>>()?;
        Self::new(chroms, steps)
    }

    /// Builds the table from a FASTA index (`.fai`): name and sequence length columns
    pub fn from_fai<P: AsRef<Path>>(path: P, k: usize, steps: &[u64]) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut chroms = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(name), Some(len)) = (fields.next(), fields.next()) else {
                return Err(malformed_fai(path, &line));
            };
            let len: u64 = len.parse().map_err(|_| malformed_fai(path, &line))?;
            chroms.push(Chromosome::new(
                name,
                chroms.len(),
                Chromosome::kmer_positions(len, k),
            ));
        }
        Self::new(chroms, steps)
    }

    /// Builds the table by scanning a (possibly compressed) FASTA file
    pub fn from_fasta<P: AsRef<Path>>(path: P, k: usize, steps: &[u64]) -> Result<Self> {
        let (handle, _format) =
            niffler::send::from_path(path.as_ref()).map_err(IntoPanbitmapError::into_panbitmap_error)?;
        let mut reader = fasta::Reader::new(handle);
        let mut chroms = Vec::new();
        while let Some(record) = reader.next() {
            let record = record.map_err(IntoPanbitmapError::into_panbitmap_error)?;
            let name = record
                .id()
                .map_err(IntoPanbitmapError::into_panbitmap_error)?
                .to_string();
            let len: usize = record.seq_lines().map(<[u8]>::len).sum();
            chroms.push(Chromosome::new(
                name,
                chroms.len(),
                Chromosome::kmer_positions(len as u64, k),
            ));
        }
        Self::new(chroms, steps)
    }
}

fn malformed_fai(path: &Path, line: &str) -> crate::Error {
    FormatError::MalformedTable {
        path: path.display().to_string(),
        reason: format!("invalid FASTA index line: {line}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn table() -> ChromTable {
        ChromTable::new(
            vec![
                Chromosome::new("chr1", 0, 250),
                Chromosome::new("chr2", 1, 101),
                Chromosome::new("chr3", 2, 0),
                Chromosome::new("chr4", 3, 7),
            ],
            &[1, 100],
        )
        .unwrap()
    }

    #[test]
    fn test_kmer_positions() {
        assert_eq!(Chromosome::kmer_positions(100, 21), 80);
        assert_eq!(Chromosome::kmer_positions(21, 21), 1);
        assert_eq!(Chromosome::kmer_positions(10, 21), 0);
    }

    #[test]
    fn test_row_offsets() {
        let table = table();
        assert_eq!(table.row_offset("chr1", 1), Some(0));
        assert_eq!(table.row_offset("chr2", 1), Some(250));
        assert_eq!(table.row_offset("chr3", 1), Some(351));
        assert_eq!(table.row_offset("chr4", 1), Some(351));
        assert_eq!(table.total_rows(1), Some(358));

        // ceil(250/100) = 3, ceil(101/100) = 2, ceil(0/100) = 0
        assert_eq!(table.row_offset("chr2", 100), Some(3));
        assert_eq!(table.row_offset("chr4", 100), Some(5));
        assert_eq!(table.total_rows(100), Some(6));

        assert_eq!(table.row_offset("chr1", 10), None);
        assert_eq!(table.row_offset("chrX", 1), None);
        assert_eq!(table.total_size(), 358);
    }

    #[test]
    fn test_duplicate_chromosome() {
        let chroms = vec![Chromosome::new("a", 0, 1), Chromosome::new("a", 1, 2)];
        assert!(ChromTable::new(chroms, &[1]).is_err());
    }

    #[test]
    fn test_save_load() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chrs.tsv");
        let table = table();
        table.save(&path)?;

        let text = fs::read_to_string(&path)?;
        assert!(text.starts_with("name\tid\tsize\n"));

        let loaded = ChromTable::load(&path, &[1, 100])?;
        assert_eq!(loaded.chromosomes(), table.chromosomes());
        assert_eq!(loaded.row_offset("chr4", 100), Some(5));
        Ok(())
    }

    #[test]
    fn test_load_missing() {
        let err = ChromTable::load("/nonexistent/chrs.tsv", &[1]).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_from_fai() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("genome.fa.fai");
        fs::write(&path, "chrA\t100\t6\t60\t61\nchrB\t30\t200\t60\t61\n")?;
        let table = ChromTable::from_fai(&path, 21, &[1])?;
        assert_eq!(table.get("chrA").map(|c| c.size), Some(80));
        assert_eq!(table.get("chrB").map(|c| (c.id, c.size)), Some((1, 10)));
        Ok(())
    }

    #[test]
    fn test_from_fasta() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("genome.fa");
        fs::write(&path, ">chrA desc\nACGTACGTAC\nGTACG\n>chrB\nACG\n")?;
        let table = ChromTable::from_fasta(&path, 5, &[1])?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("chrA").map(|c| c.size), Some(11));
        assert_eq!(table.get("chrB").map(|c| c.size), Some(0));
        Ok(())
    }
}
