//! Occurrence histograms and the per-bin occurrence table.
//!
//! A histogram counts, for a set of positions, how many positions are shared
//! by exactly `k` genomes for every `k` in `1..=G`. Positions shared by no
//! genome carry no data and are never tabulated.

use std::collections::HashMap;
use std::ops::{Add, AddAssign};
use std::path::Path;

use crate::bitmap::PresenceMatrix;
use crate::error::{FormatError, Result};

/// Fixed-length occurrence histogram indexed `1..=G`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    /// `counts[k - 1]` = positions shared by exactly `k` genomes
    counts: Vec<u64>,
}
impl Histogram {
    /// An all-zero histogram for `ngenomes` genomes
    #[must_use]
    pub fn new(ngenomes: usize) -> Self {
        Self {
            counts: vec![0; ngenomes],
        }
    }

    /// Builds a histogram from its `1..=G` entries
    #[must_use]
    pub fn from_vec(counts: Vec<u64>) -> Self {
        Self { counts }
    }

    /// Tabulates per-position genome counts.
    ///
    /// Zero counts are skipped. Counts above `ngenomes` cannot come from a
    /// presence row truncated to `G` columns and are skipped as well.
    #[must_use]
    pub fn from_counts(counts: &[u32], ngenomes: usize) -> Self {
        let mut hist = Self::new(ngenomes);
        for &count in counts {
            hist.record(count);
        }
        hist
    }

    /// Histogram of the row-wise population counts of a presence matrix
    #[must_use]
    pub fn summarize(matrix: &PresenceMatrix) -> Self {
        Self::from_counts(&matrix.row_counts(), matrix.ngenomes())
    }

    /// Records one position shared by `count` genomes
    pub fn record(&mut self, count: u32) {
        let count = count as usize;
        if count > 0 && count <= self.counts.len() {
            self.counts[count - 1] += 1;
        }
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.counts.len()
    }

    /// Positions shared by exactly `k` genomes (0 outside `1..=G`)
    #[must_use]
    pub fn get(&self, k: usize) -> u64 {
        match k {
            0 => 0,
            k => self.counts.get(k - 1).copied().unwrap_or(0),
        }
    }

    /// The `1..=G` entries in order
    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.counts
    }

    /// Iterates `(k, count)` pairs for `k` in `1..=G`
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().enumerate().map(|(i, &c)| (i + 1, c))
    }

    /// Number of positions summarized
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Entries normalised to sum to 1 (all zero for an empty histogram)
    #[must_use]
    pub fn frequencies(&self) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts
            .iter()
            .map(|&c| c as f64 / total as f64)
            .collect()
    }

    /// Average number of genomes sharing a position (0 for an empty histogram)
    #[must_use]
    pub fn mean_occurrence(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let weighted: f64 = self.iter().map(|(k, c)| k as f64 * c as f64).sum();
        weighted / total as f64
    }
}

impl AddAssign<&Histogram> for Histogram {
    /// # Panics
    ///
    /// Panics if the histograms cover different genome counts
    fn add_assign(&mut self, rhs: &Histogram) {
        assert_eq!(
            self.counts.len(),
            rhs.counts.len(),
            "histograms cover different genome counts"
        );
        for (lhs, rhs) in self.counts.iter_mut().zip(&rhs.counts) {
            *lhs += rhs;
        }
    }
}
impl AddAssign for Histogram {
    fn add_assign(&mut self, rhs: Histogram) {
        *self += &rhs;
    }
}
impl Add for Histogram {
    type Output = Histogram;
    fn add(mut self, rhs: Histogram) -> Histogram {
        self += &rhs;
        self
    }
}
impl Add<&Histogram> for &Histogram {
    type Output = Histogram;
    fn add(self, rhs: &Histogram) -> Histogram {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

/// Histograms of consecutive `bin_len`-long bins covering `counts`.
///
/// The final bin is shortened to the end of `counts`.
#[must_use]
pub fn bin_histograms(counts: &[u32], bin_len: u64, ngenomes: usize) -> Vec<(u64, u64, Histogram)> {
    let bin_len = bin_len.max(1) as usize;
    counts
        .chunks(bin_len)
        .enumerate()
        .map(|(i, chunk)| {
            let start = (i * bin_len) as u64;
            (
                start,
                start + chunk.len() as u64,
                Histogram::from_counts(chunk, ngenomes),
            )
        })
        .collect()
}

/// One row of the bin occurrence table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinRow {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub hist: Histogram,
}

/// Per-bin occurrence histograms of one anchor genome.
///
/// Persisted as a tab-separated table with columns `chr`, `start`, `end`,
/// then one column per genome count `1..=G`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinTable {
    ngenomes: usize,
    bin_len: u64,
    rows: Vec<BinRow>,
}
impl BinTable {
    #[must_use]
    pub fn new(ngenomes: usize, bin_len: u64) -> Self {
        Self {
            ngenomes,
            bin_len,
            rows: Vec::new(),
        }
    }

    /// File name of the table for a bin size in kilobases
    #[must_use]
    pub fn file_name(chr_bin_kbp: u64) -> String {
        format!("bitsum.{chr_bin_kbp}kb.tsv")
    }

    /// Appends the bins of one chromosome from its per-position genome counts
    pub fn push_chromosome(&mut self, chrom: &str, counts: &[u32]) {
        for (start, end, hist) in bin_histograms(counts, self.bin_len, self.ngenomes) {
            self.rows.push(BinRow {
                chrom: chrom.to_string(),
                start,
                end,
                hist,
            });
        }
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.ngenomes
    }

    #[must_use]
    pub fn bin_len(&self) -> u64 {
        self.bin_len
    }

    #[must_use]
    pub fn rows(&self) -> &[BinRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bins of `chrom` overlapping `[start, end)`
    pub fn query<'a>(
        &'a self,
        chrom: &'a str,
        start: u64,
        end: u64,
    ) -> impl Iterator<Item = &'a BinRow> + 'a {
        self.rows
            .iter()
            .filter(move |row| row.chrom == chrom && row.start < end && start < row.end)
    }

    /// Sum of the bins of every chromosome, in table order
    #[must_use]
    pub fn chrom_totals(&self) -> Vec<(String, Histogram)> {
        let mut order: Vec<String> = Vec::new();
        let mut sums: HashMap<&str, Histogram> = HashMap::new();
        for row in &self.rows {
            *sums.entry(row.chrom.as_str()).or_insert_with(|| {
                order.push(row.chrom.clone());
                Histogram::new(self.ngenomes)
            }) += &row.hist;
        }
        order
            .into_iter()
            .filter_map(|chrom| sums.remove(chrom.as_str()).map(|hist| (chrom, hist)))
            .collect()
    }

    /// Sum of the bins of one chromosome
    #[must_use]
    pub fn chrom_total(&self, chrom: &str) -> Option<Histogram> {
        let mut bins = self.rows.iter().filter(|row| row.chrom == chrom).peekable();
        bins.peek()?;
        let mut total = Histogram::new(self.ngenomes);
        for row in bins {
            total += &row.hist;
        }
        Some(total)
    }

    /// Sum of every bin of the genome
    #[must_use]
    pub fn total(&self) -> Histogram {
        let mut total = Histogram::new(self.ngenomes);
        for row in &self.rows {
            total += &row.hist;
        }
        total
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let mut header = vec!["chr".to_string(), "start".to_string(), "end".to_string()];
        header.extend((1..=self.ngenomes).map(|k| k.to_string()));
        writer.write_record(&header)?;
        for row in &self.rows {
            let mut record = vec![row.chrom.clone(), row.start.to_string(), row.end.to_string()];
            record.extend(row.hist.as_slice().iter().map(u64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, ngenomes: usize, bin_len: u64) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FormatError::MissingFile(path.display().to_string()).into());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;

        let columns = reader.headers()?.len();
        if columns != 3 + ngenomes {
            return Err(malformed(
                path,
                format!("expected {} columns for {ngenomes} genomes, found {columns}", 3 + ngenomes),
            ));
        }

        let mut table = Self::new(ngenomes, bin_len);
        for record in reader.records() {
            let record = record?;
            let (chrom, start, end) = (&record[0], &record[1], &record[2]);
            let parse = |field: &str| -> Result<u64> {
                field
                    .parse()
                    .map_err(|_| malformed(path, format!("invalid number {field:?}")))
            };
            let counts = record
                .iter()
                .skip(3)
                .map(parse)
                .collect::<Result<Vec<u64>>>()?;
            table.rows.push(BinRow {
                chrom: chrom.to_string(),
                start: parse(start)?,
                end: parse(end)?,
                hist: Histogram::from_vec(counts),
            });
        }
        Ok(table)
    }
}

pub(crate) fn malformed(path: &Path, reason: String) -> crate::Error {
    FormatError::MalformedTable {
        path: path.display().to_string(),
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PackedRows;

    fn scenario() -> PresenceMatrix {
        PackedRows::from_bytes(1, vec![0b111, 0b011, 0b001, 0b110, 0b111])
            .unwrap()
            .unpack(3)
    }

    #[test]
    fn test_summarize() {
        let hist = Histogram::summarize(&scenario());
        assert_eq!(hist.as_slice(), &[1, 2, 2]);
        assert_eq!(hist.get(3), 2);
        assert_eq!(hist.get(2), 2);
        assert_eq!(hist.get(1), 1);
        assert_eq!(hist.get(0), 0);
        assert_eq!(hist.get(4), 0);
        assert_eq!(hist.total(), 5);
    }

    #[test]
    fn test_zero_rows_excluded() {
        let hist = Histogram::from_counts(&[0, 0, 1, 3, 0], 3);
        assert_eq!(hist.total(), 2);
        assert_eq!(hist.as_slice(), &[1, 0, 1]);
    }

    #[test]
    fn test_additivity() {
        let matrix = scenario();
        let whole = Histogram::summarize(&matrix);
        for split in 0..=matrix.nrows() {
            let left = Histogram::summarize(&matrix.slice_rows(0..split));
            let right = Histogram::summarize(&matrix.slice_rows(split..matrix.nrows()));
            assert_eq!(&left + &right, whole, "split at {split}");
        }
    }

    #[test]
    fn test_frequencies_and_mean() {
        let hist = Histogram::from_vec(vec![1, 2, 2]);
        let freqs = hist.frequencies();
        assert!((freqs[0] - 0.2).abs() < 1e-12);
        assert!((freqs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        // (1 + 2*2 + 3*2) / 5
        assert!((hist.mean_occurrence() - 2.2).abs() < 1e-12);

        let empty = Histogram::new(3);
        assert!(empty.is_empty());
        assert_eq!(empty.frequencies(), vec![0.0; 3]);
        assert_eq!(empty.mean_occurrence(), 0.0);
    }

    #[test]
    #[should_panic(expected = "different genome counts")]
    fn test_add_mismatched() {
        let _ = Histogram::new(2) + Histogram::new(3);
    }

    #[test]
    fn test_bin_histograms() {
        let counts = [1, 1, 2, 2, 3, 0, 1];
        let bins = bin_histograms(&counts, 3, 3);
        assert_eq!(bins.len(), 3);
        assert_eq!((bins[0].0, bins[0].1), (0, 3));
        assert_eq!(bins[0].2.as_slice(), &[2, 1, 0]);
        assert_eq!((bins[2].0, bins[2].1), (6, 7));
        assert_eq!(bins[2].2.as_slice(), &[1, 0, 0]);

        let sum = bins
            .iter()
            .fold(Histogram::new(3), |acc, (_, _, h)| &acc + h);
        assert_eq!(sum, Histogram::from_counts(&counts, 3));
    }

    fn bin_table() -> BinTable {
        let mut table = BinTable::new(3, 2);
        table.push_chromosome("chr1", &[1, 2, 3, 3, 1]);
        table.push_chromosome("chr2", &[2, 2]);
        table
    }

    #[test]
    fn test_bin_table_totals() {
        let table = bin_table();
        assert_eq!(table.len(), 4);

        let totals = table.chrom_totals();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].0, "chr1");
        assert_eq!(totals[0].1.as_slice(), &[2, 1, 2]);
        assert_eq!(totals[1].1.as_slice(), &[0, 2, 0]);
        assert_eq!(table.chrom_total("chr2"), Some(totals[1].1.clone()));
        assert_eq!(table.chrom_total("chr3"), None);
        assert_eq!(table.total().as_slice(), &[2, 3, 2]);
    }

    #[test]
    fn test_bin_table_query() {
        let table = bin_table();
        let bins: Vec<_> = table.query("chr1", 1, 3).map(|r| r.start).collect();
        assert_eq!(bins, vec![0, 2]);
        assert_eq!(table.query("chr1", 5, 10).count(), 0);
        assert_eq!(table.query("chrX", 0, 10).count(), 0);
    }

    #[test]
    fn test_bin_table_save_load() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(BinTable::file_name(200));
        let table = bin_table();
        table.save(&path)?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("chr\tstart\tend\t1\t2\t3\n"));
        assert_eq!(BinTable::load(&path, 3, 2)?, table);

        // genome count must match the header
        assert!(BinTable::load(&path, 4, 2).is_err());
        Ok(())
    }
}
