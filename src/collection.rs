//! Read session over every anchor genome of a built index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::anchor::{build_all, genome_dir, BuildReport, FailurePolicy};
use crate::annotation::{GeneOccurrence, IntervalRow};
use crate::bitmap::PresenceMatrix;
use crate::config::{IndexConfig, SampleTable, CONFIG_FILE, SAMPLES_FILE};
use crate::error::{RangeError, Result};
use crate::genome::GenomeIndex;
use crate::membership::MembershipSource;
use crate::occurrence::Histogram;

/// Length summary of one genome of the collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenomeSize {
    pub name: String,

    /// Sum of chromosome sizes (0 for genomes that are not anchors)
    pub length: u64,

    pub chromosomes: usize,
}

/// Read session over a pan-genome index directory.
///
/// Holds one [`GenomeIndex`] per anchor genome. An anchor whose files cannot
/// be opened is reported through [`PanIndex::unavailable`] and does not
/// prevent the other anchors from being queried.
pub struct PanIndex {
    prefix: PathBuf,
    config: IndexConfig,
    samples: SampleTable,
    anchors: Vec<GenomeIndex>,
    by_name: HashMap<String, usize>,
    unavailable: Vec<(String, String)>,
}
impl PanIndex {
    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<Self> {
        let prefix = prefix.as_ref();
        let config = IndexConfig::load(prefix.join(CONFIG_FILE))?;
        let samples = SampleTable::load(prefix.join(SAMPLES_FILE))?;
        let ngenomes = samples.ngenomes();

        let mut anchors = Vec::new();
        let mut by_name = HashMap::new();
        let mut unavailable = Vec::new();
        for genome in samples.anchors(&config)? {
            let dir = genome_dir(prefix, &genome.name);
            match GenomeIndex::open(&dir, &genome.name, &config, ngenomes) {
                Ok(index) => {
                    by_name.insert(genome.name.clone(), anchors.len());
                    anchors.push(index);
                }
                Err(e) => {
                    warn!("Skipping anchor {}: {e}", genome.name);
                    unavailable.push((genome.name.clone(), e.to_string()));
                }
            }
        }
        info!(
            "Opened index at {} with {} genomes and {} anchors",
            prefix.display(),
            ngenomes,
            anchors.len()
        );

        Ok(Self {
            prefix: prefix.to_path_buf(),
            config,
            samples,
            anchors,
            by_name,
            unavailable,
        })
    }

    /// Anchors the collection into `prefix` and opens the result
    pub fn build<P, M>(
        prefix: P,
        samples: &SampleTable,
        config: &IndexConfig,
        source: &M,
        policy: FailurePolicy,
    ) -> Result<(Self, BuildReport)>
    where
        P: AsRef<Path>,
        M: MembershipSource + Sync,
    {
        let report = build_all(prefix.as_ref(), samples, config, source, policy)?;
        Ok((Self::open(prefix)?, report))
    }

    #[must_use]
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    /// Number of genomes `G`
    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.samples.ngenomes()
    }

    /// Open anchor sessions in sample order
    pub fn anchors(&self) -> impl Iterator<Item = &GenomeIndex> {
        self.anchors.iter()
    }

    /// `(genome, reason)` of anchors that could not be opened
    #[must_use]
    pub fn unavailable(&self) -> &[(String, String)] {
        &self.unavailable
    }

    pub fn anchor(&self, genome: &str) -> Result<&GenomeIndex> {
        self.by_name
            .get(genome)
            .map(|&idx| &self.anchors[idx])
            .ok_or_else(|| RangeError::UnknownGenome(genome.to_string()).into())
    }

    pub fn anchor_mut(&mut self, genome: &str) -> Result<&mut GenomeIndex> {
        match self.by_name.get(genome) {
            Some(&idx) => Ok(&mut self.anchors[idx]),
            None => Err(RangeError::UnknownGenome(genome.to_string()).into()),
        }
    }

    /// Presence matrix of an anchor chromosome, see [`GenomeIndex::query`]
    pub fn query_bitmap(
        &mut self,
        genome: &str,
        chrom: &str,
        start: Option<u64>,
        end: Option<u64>,
        step: u64,
    ) -> Result<PresenceMatrix> {
        self.anchor_mut(genome)?.query(chrom, start, end, step)
    }

    pub fn query_occ_counts(
        &mut self,
        genome: &str,
        chrom: &str,
        start: Option<u64>,
        end: Option<u64>,
        step: u64,
    ) -> Result<Histogram> {
        self.anchor_mut(genome)?
            .query_occ_counts(chrom, start, end, step)
    }

    pub fn query_genes(
        &self,
        genome: &str,
        chrom: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<GeneOccurrence>> {
        self.anchor(genome)?.query_genes(chrom, start, end)
    }

    pub fn query_anno(
        &self,
        genome: &str,
        chrom: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<IntervalRow>> {
        self.anchor(genome)?.query_anno(chrom, start, end)
    }

    /// Summed gene histograms per chromosome of an anchor
    pub fn gene_chrom_totals(&self, genome: &str) -> Result<Vec<(String, Histogram)>> {
        Ok(self.anchor(genome)?.gene_chrom_totals().to_vec())
    }

    /// Lengths of every genome of the collection in sample order
    #[must_use]
    pub fn genome_sizes(&self) -> Vec<GenomeSize> {
        self.samples
            .iter()
            .map(|genome| match self.anchor(&genome.name) {
                Ok(index) => GenomeSize {
                    name: genome.name.clone(),
                    length: index.size(),
                    chromosomes: index.chroms().len(),
                },
                Err(_) => GenomeSize {
                    name: genome.name.clone(),
                    length: 0,
                    chromosomes: 0,
                },
            })
            .collect()
    }

    /// Whole-genome occurrence histogram of every anchor
    #[must_use]
    pub fn totals(&self) -> Vec<(String, Histogram)> {
        self.anchors
            .iter()
            .map(|index| (index.name().to_string(), index.total()))
            .collect()
    }

    /// Sum of the occurrence histograms of every anchor
    #[must_use]
    pub fn collection_total(&self) -> Histogram {
        let mut total = Histogram::new(self.ngenomes());
        for index in &self.anchors {
            total += &index.total();
        }
        total
    }

    /// Mean occurrence of every anchor, lowest first
    #[must_use]
    pub fn mean_occurrence(&self) -> Vec<(String, f64)> {
        let mut means: Vec<_> = self
            .totals()
            .into_iter()
            .map(|(name, hist)| (name, hist.mean_occurrence()))
            .collect();
        means.sort_by(|a, b| a.1.total_cmp(&b.1));
        means
    }

    /// Mean occurrence of every chromosome of an anchor, lowest first
    pub fn chrom_mean_occurrence(&self, genome: &str) -> Result<Vec<(String, f64)>> {
        let mut means: Vec<_> = self
            .anchor(genome)?
            .bins()
            .chrom_totals()
            .into_iter()
            .map(|(chrom, hist)| (chrom, hist.mean_occurrence()))
            .collect();
        means.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(means)
    }

    /// Releases every anchor session
    pub fn close(self) {
        for index in self.anchors {
            index.close();
        }
        info!("Closed index at {}", self.prefix.display());
    }
}
