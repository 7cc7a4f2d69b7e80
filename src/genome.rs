//! Per-genome read session over the multi-resolution bitmaps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::annotation::{
    AnnotationOverlay, GeneOccurrence, GeneTable, IntervalRow, MemoryIntervals, ANNO_FILE,
    GENES_FILE,
};
use crate::bitmap::{
    bitmap_path, bytes_per_row, index_path, BitmapReader, PackedRows, PresenceMatrix,
};
use crate::chrom::{ChromTable, Chromosome};
use crate::config::IndexConfig;
use crate::error::{FormatError, RangeError, Result};
use crate::occurrence::{BinTable, Histogram};

/// Name of the persisted chromosome table
pub const CHROMS_FILE: &str = "chrs.tsv";

/// Read session over the bitmaps and tables of one anchor genome.
///
/// Queries reposition the underlying decoders and take `&mut self`. Clone
/// the session to query the same genome from several threads; clones share
/// the memory maps and loaded tables.
#[derive(Clone)]
pub struct GenomeIndex {
    name: String,
    dir: PathBuf,
    ngenomes: usize,
    nbytes: usize,
    chroms: Arc<ChromTable>,

    /// One decoder per stored step, in configuration order
    readers: Vec<(u64, BitmapReader)>,

    bins: Arc<BinTable>,
    overlay: Arc<AnnotationOverlay>,

    /// Summed gene histograms per chromosome, in gene table order
    gene_totals: Arc<Vec<(String, Histogram)>>,
}
impl std::fmt::Debug for GenomeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenomeIndex")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("ngenomes", &self.ngenomes)
            .finish_non_exhaustive()
    }
}
impl GenomeIndex {
    /// Opens the anchor directory of genome `name`.
    ///
    /// Every stored step must be present and hold exactly the rows implied by
    /// the chromosome table.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        name: &str,
        config: &IndexConfig,
        ngenomes: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let nbytes = bytes_per_row(ngenomes);
        let chroms = ChromTable::load(dir.join(CHROMS_FILE), &config.steps)?;

        let mut readers = Vec::with_capacity(config.steps.len());
        for &step in &config.steps {
            let reader = BitmapReader::open(bitmap_path(dir, step), index_path(dir, step))?;
            let expected = chroms.total_rows(step).unwrap_or_default() * nbytes as u64;
            if reader.total_len() != expected {
                return Err(FormatError::RowCountMismatch {
                    step,
                    expected,
                    found: reader.total_len(),
                }
                .into());
            }
            readers.push((step, reader));
        }

        let bins = BinTable::load(
            dir.join(BinTable::file_name(config.chr_bin_kbp)),
            ngenomes,
            config.bin_len(),
        )?;

        let genes_path = dir.join(GENES_FILE);
        let genes = if genes_path.exists() {
            GeneTable::load(genes_path, ngenomes)?
        } else {
            GeneTable::new(ngenomes)
        };
        let anno_path = dir.join(ANNO_FILE);
        let annos = if anno_path.exists() {
            MemoryIntervals::load(anno_path)?
        } else {
            MemoryIntervals::new()
        };

        debug!(
            "Opened {name}: {} chromosomes, {} steps, {} genes",
            chroms.len(),
            readers.len(),
            genes.len()
        );

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            ngenomes,
            nbytes,
            chroms: Arc::new(chroms),
            readers,
            bins: Arc::new(bins),
            overlay: Arc::new(AnnotationOverlay::from_table(&genes, annos)),
            gene_totals: Arc::new(genes.chrom_totals()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.ngenomes
    }

    /// Bytes per packed presence row
    #[must_use]
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    #[must_use]
    pub fn chroms(&self) -> &ChromTable {
        &self.chroms
    }

    /// Stored steps in configuration order
    pub fn steps(&self) -> impl Iterator<Item = u64> + '_ {
        self.readers.iter().map(|(step, _)| *step)
    }

    #[must_use]
    pub fn bins(&self) -> &BinTable {
        &self.bins
    }

    #[must_use]
    pub fn overlay(&self) -> &AnnotationOverlay {
        &self.overlay
    }

    /// Sum of chromosome sizes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.chroms.total_size()
    }

    fn chrom(&self, chrom: &str) -> Result<&Chromosome> {
        self.chroms
            .get(chrom)
            .ok_or_else(|| RangeError::UnknownChromosome(chrom.to_string()).into())
    }

    /// The coarsest stored step that evenly divides `step`
    pub fn select_step(&self, step: u64) -> Result<u64> {
        self.steps()
            .filter(|&stored| step > 0 && step % stored == 0)
            .max()
            .ok_or_else(|| {
                RangeError::UnsupportedStep {
                    requested: step,
                    stored: self.steps().collect(),
                }
                .into()
            })
    }

    /// Coordinate of the first row a query from `start` every `step` returns.
    ///
    /// Rows are served from the selected stored step, so the first row sits
    /// on a multiple of that step at or below `start`.
    pub fn first_position(&self, start: u64, step: u64) -> Result<u64> {
        let bstep = self.select_step(step)?;
        Ok(start / bstep * bstep)
    }

    /// Packed presence rows of `chrom` over `[start, end)` every `step` positions.
    ///
    /// `start` defaults to 0 and `end` to the chromosome size.
    pub fn query_packed(
        &mut self,
        chrom: &str,
        start: Option<u64>,
        end: Option<u64>,
        step: u64,
    ) -> Result<PackedRows> {
        let size = self.chrom(chrom)?.size;
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(size);
        if start > end || end > size {
            return Err(RangeError::OutOfBounds {
                chrom: chrom.to_string(),
                start,
                end,
                size,
            }
            .into());
        }
        let bstep = self.select_step(step)?;
        if start == end {
            return Ok(PackedRows::new(self.nbytes));
        }

        let row_offset = self.chroms.row_offset(chrom, bstep).unwrap_or_default();
        let byte_start = self.nbytes as u64 * (row_offset + start / bstep);
        let nrows = ((end - start) / bstep) as usize;

        let nbytes = self.nbytes;
        let reader = self
            .readers
            .iter_mut()
            .find_map(|(stored, reader)| (*stored == bstep).then_some(reader))
            .ok_or(RangeError::UnsupportedStep {
                requested: step,
                stored: Vec::new(),
            })?;
        let bytes = reader.read_range(byte_start, nrows * nbytes)?;
        let rows = PackedRows::from_bytes(nbytes, bytes)?;

        Ok(rows.subsample((step / bstep) as usize))
    }

    /// Presence matrix of `chrom` over `[start, end)` every `step` positions
    pub fn query(
        &mut self,
        chrom: &str,
        start: Option<u64>,
        end: Option<u64>,
        step: u64,
    ) -> Result<PresenceMatrix> {
        let rows = self.query_packed(chrom, start, end, step)?;
        Ok(rows.unpack(self.ngenomes))
    }

    /// Occurrence histogram of the rows returned by [`Self::query`]
    pub fn query_occ_counts(
        &mut self,
        chrom: &str,
        start: Option<u64>,
        end: Option<u64>,
        step: u64,
    ) -> Result<Histogram> {
        let rows = self.query_packed(chrom, start, end, step)?;
        Ok(Histogram::from_counts(
            &rows.occurrence_counts(self.ngenomes),
            self.ngenomes,
        ))
    }

    /// Genes overlapping `[start, end)` with their stored histograms
    pub fn query_genes(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<GeneOccurrence>> {
        self.overlay.query_genes(chrom, start, end)
    }

    /// Annotation intervals overlapping `[start, end)`
    pub fn query_anno(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<IntervalRow>> {
        self.overlay.query_anno(chrom, start, end)
    }

    /// Occurrence histogram of the whole genome
    #[must_use]
    pub fn total(&self) -> Histogram {
        self.bins.total()
    }

    /// Occurrence histogram of one chromosome
    pub fn chrom_total(&self, chrom: &str) -> Result<Histogram> {
        self.chrom(chrom)?;
        Ok(self
            .bins
            .chrom_total(chrom)
            .unwrap_or_else(|| Histogram::new(self.ngenomes)))
    }

    /// Occurrence histogram summed over the genes of every chromosome.
    ///
    /// Chromosomes without genes are omitted.
    #[must_use]
    pub fn gene_chrom_totals(&self) -> &[(String, Histogram)] {
        &self.gene_totals
    }

    /// Occurrence histogram summed over the genes of one chromosome
    pub fn gene_chrom_total(&self, chrom: &str) -> Result<Histogram> {
        self.chrom(chrom)?;
        Ok(self
            .gene_totals
            .iter()
            .find(|(name, _)| name == chrom)
            .map_or_else(|| Histogram::new(self.ngenomes), |(_, hist)| hist.clone()))
    }

    /// Releases the decoders and tables of this session
    pub fn close(self) {
        debug!("Closed {}", self.name);
    }
}
