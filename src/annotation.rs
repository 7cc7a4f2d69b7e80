//! Gene and annotation intervals overlaid on occurrence data.
//!
//! Gene histograms are computed once while anchoring and persisted in the
//! [`GeneTable`]; the [`AnnotationOverlay`] only joins them with interval
//! metadata at query time.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, IntoPanbitmapError, Result};
use crate::occurrence::{malformed, Histogram};

/// Name of the persisted gene occurrence table
pub const GENES_FILE: &str = "genes.tsv";

/// Name of the persisted annotation intervals
pub const ANNO_FILE: &str = "anno.tsv";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
    #[default]
    #[serde(rename = ".")]
    Unknown,
}
impl FromStr for Strand {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "+" => Self::Forward,
            "-" => Self::Reverse,
            _ => Self::Unknown,
        })
    }
}
impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "+"),
            Self::Reverse => write!(f, "-"),
            Self::Unknown => write!(f, "."),
        }
    }
}

/// A gene or annotation interval, 0-based half-open
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalRow {
    #[serde(rename = "chr")]
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub strand: Strand,

    /// Free-form `key=value;` attributes
    pub attr: String,
}
impl IntervalRow {
    #[must_use]
    pub fn new(chrom: impl Into<String>, start: u64, end: u64, kind: impl Into<String>) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
            kind: kind.into(),
            strand: Strand::Unknown,
            attr: String::new(),
        }
    }

    #[must_use]
    pub fn with_strand(mut self, strand: Strand) -> Self {
        self.strand = strand;
        self
    }

    #[must_use]
    pub fn with_attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = attr.into();
        self
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the interval overlaps `[start, end)`
    #[must_use]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    /// Value of attribute `key`, matched case-insensitively
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attr.split(';').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
        })
    }

    /// The `Name` attribute, falling back to `ID`
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.attribute("name").or_else(|| self.attribute("id"))
    }
}

/// Interval lookup by range.
///
/// A lookup that matches nothing, including one on an unknown chromosome,
/// returns an empty vector.
#[auto_impl(&, Box, Arc)]
pub trait IntervalSource {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<IntervalRow>>;
}

/// In-memory interval store, sorted by start within each chromosome
#[derive(Clone, Debug, Default)]
pub struct MemoryIntervals {
    chroms: HashMap<String, Vec<IntervalRow>>,
}
impl MemoryIntervals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<I: IntoIterator<Item = IntervalRow>>(rows: I) -> Self {
        let mut store = Self::new();
        for row in rows {
            store.chroms.entry(row.chrom.clone()).or_default().push(row);
        }
        for rows in store.chroms.values_mut() {
            rows.sort_by_key(|row| (row.start, row.end));
        }
        store
    }

    pub fn insert(&mut self, row: IntervalRow) {
        let rows = self.chroms.entry(row.chrom.clone()).or_default();
        let idx = rows.partition_point(|r| (r.start, r.end) <= (row.start, row.end));
        rows.insert(idx, row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chroms.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chroms.values().all(Vec::is_empty)
    }

    /// Every interval, grouped by chromosome
    pub fn iter(&self) -> impl Iterator<Item = &IntervalRow> {
        self.chroms.values().flatten()
    }

    /// Intervals of one chromosome in start order
    #[must_use]
    pub fn chromosome(&self, chrom: &str) -> &[IntervalRow] {
        self.chroms.get(chrom).map_or(&[], Vec::as_slice)
    }

    /// Reads a persisted tab-separated interval table
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FormatError::MissingFile(path.display().to_string()).into());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<IntervalRow>, _>>()?;
        Ok(Self::from_rows(rows))
    }

    /// Writes intervals sorted by chromosome then start
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let mut names: Vec<&String> = self.chroms.keys().collect();
        names.sort();
        for name in names {
            for row in &self.chroms[name] {
                writer.serialize(row)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
impl IntervalSource for MemoryIntervals {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<IntervalRow>> {
        let rows = self.chromosome(chrom);
        let upper = rows.partition_point(|row| row.start < end);
        Ok(rows[..upper]
            .iter()
            .filter(|row| row.overlaps(start, end))
            .cloned()
            .collect())
    }
}

/// Reads the features of a (possibly compressed) GFF3 file.
///
/// GFF coordinates are 1-based inclusive and are converted to 0-based
/// half-open intervals.
pub fn read_gff<P: AsRef<Path>>(path: P) -> Result<Vec<IntervalRow>> {
    let path = path.as_ref();
    let (handle, _format) =
        niffler::send::from_path(path).map_err(IntoPanbitmapError::into_panbitmap_error)?;
    let reader = BufReader::new(handle);

    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.starts_with("##FASTA") {
            break;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(malformed(path, format!("expected at least 8 GFF columns: {line}")));
        }
        let parse = |field: &str| -> Result<u64> {
            field
                .parse()
                .map_err(|_| malformed(path, format!("invalid coordinate {field:?}")))
        };
        let start = parse(fields[3])?;
        let end = parse(fields[4])?;
        if start == 0 || end < start {
            return Err(malformed(path, format!("invalid interval {start}..={end}")));
        }
        let strand = fields[6].parse().unwrap_or_default();
        rows.push(
            IntervalRow::new(fields[0], start - 1, end, fields[2])
                .with_strand(strand)
                .with_attr(fields.get(8).copied().unwrap_or_default()),
        );
    }
    Ok(rows)
}

/// An interval with its stored occurrence histogram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneOccurrence {
    pub interval: IntervalRow,
    pub hist: Histogram,
}
impl GeneOccurrence {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.interval.name()
    }
}

/// Per-gene occurrence histograms of one anchor genome.
///
/// Persisted with the interval columns of [`IntervalRow`] followed by one
/// column per genome count `1..=G`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneTable {
    ngenomes: usize,
    genes: Vec<GeneOccurrence>,
}
impl GeneTable {
    #[must_use]
    pub fn new(ngenomes: usize) -> Self {
        Self {
            ngenomes,
            genes: Vec::new(),
        }
    }

    /// Records the genes of one chromosome from its per-position genome counts.
    ///
    /// Gene bounds are clipped to the chromosome.
    pub fn push_chromosome<'a, I>(&mut self, genes: I, counts: &[u32])
    where
        I: IntoIterator<Item = &'a IntervalRow>,
    {
        let size = counts.len();
        for gene in genes {
            let start = (gene.start as usize).min(size);
            let end = (gene.end as usize).clamp(start, size);
            self.genes.push(GeneOccurrence {
                interval: gene.clone(),
                hist: Histogram::from_counts(&counts[start..end], self.ngenomes),
            });
        }
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.ngenomes
    }

    #[must_use]
    pub fn genes(&self) -> &[GeneOccurrence] {
        &self.genes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Gene intervals as a lookup store
    #[must_use]
    pub fn intervals(&self) -> MemoryIntervals {
        MemoryIntervals::from_rows(self.genes.iter().map(|g| g.interval.clone()))
    }

    /// Sum of gene histograms of every chromosome, in table order
    #[must_use]
    pub fn chrom_totals(&self) -> Vec<(String, Histogram)> {
        let mut totals: Vec<(String, Histogram)> = Vec::new();
        for gene in &self.genes {
            match totals.iter_mut().find(|(chrom, _)| *chrom == gene.interval.chrom) {
                Some((_, hist)) => *hist += &gene.hist,
                None => totals.push((gene.interval.chrom.clone(), gene.hist.clone())),
            }
        }
        totals
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let mut header: Vec<String> = ["chr", "start", "end", "type", "strand", "attr"]
            .iter()
            .map(ToString::to_string)
            .collect();
        header.extend((1..=self.ngenomes).map(|k| k.to_string()));
        writer.write_record(&header)?;
        for gene in &self.genes {
            let row = &gene.interval;
            let mut record = vec![
                row.chrom.clone(),
                row.start.to_string(),
                row.end.to_string(),
                row.kind.clone(),
                row.strand.to_string(),
                row.attr.clone(),
            ];
            record.extend(gene.hist.as_slice().iter().map(u64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, ngenomes: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FormatError::MissingFile(path.display().to_string()).into());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let columns = reader.headers()?.len();
        if columns != 6 + ngenomes {
            return Err(malformed(
                path,
                format!("expected {} columns for {ngenomes} genomes, found {columns}", 6 + ngenomes),
            ));
        }

        let parse = |field: &str| -> Result<u64> {
            field
                .parse()
                .map_err(|_| malformed(path, format!("invalid number {field:?}")))
        };
        let mut table = Self::new(ngenomes);
        for record in reader.records() {
            let record = record?;
            let interval = IntervalRow::new(&record[0], parse(&record[1])?, parse(&record[2])?, &record[3])
                .with_strand(record[4].parse().unwrap_or_default())
                .with_attr(&record[5]);
            let counts = record
                .iter()
                .skip(6)
                .map(parse)
                .collect::<Result<Vec<u64>>>()?;
            table.genes.push(GeneOccurrence {
                interval,
                hist: Histogram::from_vec(counts),
            });
        }
        Ok(table)
    }
}

/// Joins interval lookups with the gene histograms stored at build time
pub struct AnnotationOverlay<S: IntervalSource = MemoryIntervals> {
    ngenomes: usize,
    genes: S,
    annos: S,
    hists: HashMap<(String, u64, u64), Histogram>,
}
impl AnnotationOverlay<MemoryIntervals> {
    /// Overlay serving gene intervals from the gene table itself
    #[must_use]
    pub fn from_table(table: &GeneTable, annos: MemoryIntervals) -> Self {
        Self::new(table, table.intervals(), annos)
    }

    /// An overlay without genes or annotations
    #[must_use]
    pub fn empty(ngenomes: usize) -> Self {
        Self::from_table(&GeneTable::new(ngenomes), MemoryIntervals::new())
    }
}
impl<S: IntervalSource> AnnotationOverlay<S> {
    pub fn new(table: &GeneTable, genes: S, annos: S) -> Self {
        let hists = table
            .genes()
            .iter()
            .map(|gene| {
                let row = &gene.interval;
                ((row.chrom.clone(), row.start, row.end), gene.hist.clone())
            })
            .collect();
        Self {
            ngenomes: table.ngenomes(),
            genes,
            annos,
            hists,
        }
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.ngenomes
    }

    /// Genes overlapping `[start, end)` with their stored histograms
    pub fn query_genes(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<GeneOccurrence>> {
        self.genes
            .fetch(chrom, start, end)?
            .into_iter()
            .map(|interval| {
                let key = (interval.chrom.clone(), interval.start, interval.end);
                match self.hists.get(&key) {
                    Some(hist) => Ok(GeneOccurrence {
                        hist: hist.clone(),
                        interval,
                    }),
                    None => Err(FormatError::MalformedTable {
                        path: GENES_FILE.to_string(),
                        reason: format!(
                            "no stored histogram for gene {}:{}-{}",
                            interval.chrom, interval.start, interval.end
                        ),
                    }
                    .into()),
                }
            })
            .collect()
    }

    /// Annotation intervals overlapping `[start, end)`
    pub fn query_anno(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<IntervalRow>> {
        self.annos.fetch(chrom, start, end)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;

    fn gene(chrom: &str, start: u64, end: u64, name: &str) -> IntervalRow {
        IntervalRow::new(chrom, start, end, "gene")
            .with_strand(Strand::Forward)
            .with_attr(format!("ID=gene:{name};Name={name}"))
    }

    #[test]
    fn test_attribute_lookup() {
        let row = IntervalRow::new("chr1", 0, 10, "gene").with_attr("ID=g1; NAME=abc;note=x=y");
        assert_eq!(row.attribute("name"), Some("abc"));
        assert_eq!(row.attribute("Id"), Some("g1"));
        assert_eq!(row.attribute("note"), Some("x=y"));
        assert_eq!(row.attribute("missing"), None);
        assert_eq!(row.name(), Some("abc"));

        let row = IntervalRow::new("chr1", 0, 10, "gene").with_attr("ID=g2");
        assert_eq!(row.name(), Some("g2"));
    }

    #[test]
    fn test_memory_fetch() -> crate::Result<()> {
        let store = MemoryIntervals::from_rows([
            gene("chr1", 50, 60, "c"),
            gene("chr1", 0, 10, "a"),
            gene("chr1", 5, 30, "b"),
            gene("chr2", 0, 100, "d"),
        ]);
        assert_eq!(store.len(), 4);

        let names: Vec<_> = store
            .fetch("chr1", 8, 20)?
            .iter()
            .filter_map(|r| r.name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        // half-open bounds
        assert!(store.fetch("chr1", 10, 50)?.iter().all(|r| r.name() == Some("b")));
        assert!(store.fetch("chr1", 60, 70)?.is_empty());
        assert!(store.fetch("chrX", 0, 100)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_memory_insert_keeps_order() -> crate::Result<()> {
        let mut store = MemoryIntervals::new();
        store.insert(gene("chr1", 20, 30, "b"));
        store.insert(gene("chr1", 0, 5, "a"));
        let starts: Vec<_> = store.chromosome("chr1").iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![0, 20]);
        Ok(())
    }

    #[test]
    fn test_source_forwarding() -> crate::Result<()> {
        let store = Arc::new(MemoryIntervals::from_rows([gene("chr1", 0, 10, "a")]));
        let boxed: Box<dyn IntervalSource> = Box::new(store.clone());
        assert_eq!(boxed.fetch("chr1", 0, 1)?.len(), 1);
        assert_eq!((&*store).fetch("chr1", 0, 1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_memory_save_load() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(ANNO_FILE);
        let store = MemoryIntervals::from_rows([
            gene("chr2", 0, 100, "d"),
            IntervalRow::new("chr1", 3, 9, "exon").with_attr("Parent=a;note=with space"),
        ]);
        store.save(&path)?;
        let text = fs::read_to_string(&path)?;
        assert!(text.starts_with("chr\tstart\tend\ttype\tstrand\tattr\n"));

        let loaded = MemoryIntervals::load(&path)?;
        assert_eq!(loaded.chromosome("chr1"), store.chromosome("chr1"));
        assert_eq!(loaded.chromosome("chr2"), store.chromosome("chr2"));
        Ok(())
    }

    #[test]
    fn test_read_gff() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("genes.gff3");
        fs::write(
            &path,
            "##gff-version 3\n\
             chr1\tsrc\tgene\t11\t20\t.\t+\t.\tID=g1;Name=alpha\n\
             chr1\tsrc\texon\t11\t15\t.\t-\t.\tParent=g1\n\
             # comment\n\
             chr2\tsrc\tgene\t1\t1\t.\t.\t.\tID=g2\n\
             ##FASTA\n\
             >chr1\nACGT\n",
        )?;
        let rows = read_gff(&path)?;
        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].start, rows[0].end), (10, 20));
        assert_eq!(rows[0].strand, Strand::Forward);
        assert_eq!(rows[0].name(), Some("alpha"));
        assert_eq!(rows[1].kind, "exon");
        assert_eq!(rows[1].strand, Strand::Reverse);
        assert_eq!((rows[2].start, rows[2].end), (0, 1));
        Ok(())
    }

    #[test]
    fn test_read_gff_rejects_bad_coordinates() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.gff3");
        fs::write(&path, "chr1\tsrc\tgene\t0\t20\t.\t+\t.\tID=g1\n")?;
        assert!(read_gff(&path).is_err());
        fs::write(&path, "chr1\tsrc\tgene\tten\t20\t.\t+\t.\tID=g1\n")?;
        assert!(read_gff(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_read_gff_column_count() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("short.gff3");
        fs::write(&path, "chr1\tsrc\tgene\t1\t20\t.\t+\n")?;
        let err = read_gff(&path).unwrap_err();
        assert!(err.to_string().contains("at least 8 GFF columns"));

        // the attribute column may be left out
        fs::write(&path, "chr1\tsrc\tgene\t1\t20\t.\t+\t.\n")?;
        let rows = read_gff(&path)?;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].attr.is_empty());
        Ok(())
    }

    fn gene_table() -> GeneTable {
        // counts of 30 positions: [10, 20) holds seven 2s and three 1s
        let mut counts = vec![3u32; 30];
        counts[10..20].copy_from_slice(&[2, 2, 1, 2, 2, 1, 2, 2, 1, 2]);
        let genes = [gene("chr1", 10, 20, "a"), gene("chr1", 25, 40, "b")];
        let mut table = GeneTable::new(3);
        table.push_chromosome(&genes, &counts);
        table
    }

    #[test]
    fn test_gene_histograms() {
        let table = gene_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.genes()[0].hist.as_slice(), &[3, 7, 0]);

        // clipped to the 30 positions of the chromosome
        assert_eq!(table.genes()[1].hist.as_slice(), &[0, 0, 5]);
        assert_eq!(table.chrom_totals()[0].1.as_slice(), &[3, 7, 5]);
    }

    #[test]
    fn test_gene_table_save_load() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(GENES_FILE);
        let table = gene_table();
        table.save(&path)?;
        assert_eq!(GeneTable::load(&path, 3)?, table);
        assert!(GeneTable::load(&path, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_overlay_returns_stored_histograms() -> crate::Result<()> {
        let table = gene_table();
        let annos = MemoryIntervals::from_rows([IntervalRow::new("chr1", 12, 14, "exon")]);
        let overlay = AnnotationOverlay::from_table(&table, annos);

        let genes = overlay.query_genes("chr1", 0, 15)?;
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].name(), Some("a"));
        assert_eq!(genes[0].hist.get(2), 7);
        assert_eq!(genes[0].hist.get(1), 3);

        assert!(overlay.query_genes("chr2", 0, 100)?.is_empty());
        assert_eq!(overlay.query_anno("chr1", 0, 100)?.len(), 1);
        assert!(overlay.query_anno("chr1", 14, 100)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_overlay_with_external_source() -> crate::Result<()> {
        let table = gene_table();
        let source = MemoryIntervals::from_rows([gene("chr1", 0, 5, "unknown")]);
        let overlay = AnnotationOverlay::new(&table, source, MemoryIntervals::new());
        assert!(overlay.query_genes("chr1", 0, 5).is_err());
        Ok(())
    }

    #[test]
    fn test_empty_overlay() -> crate::Result<()> {
        let overlay = AnnotationOverlay::empty(3);
        assert!(overlay.query_genes("chr1", 0, 100)?.is_empty());
        assert!(overlay.query_anno("chr1", 0, 100)?.is_empty());
        Ok(())
    }
}
