//! Anchoring: builds the bitmaps and occurrence tables of every anchor genome.
//!
//! Each anchor genome writes only into its own directory, so genomes are
//! built independently on a scoped pool of worker threads. Cross-genome
//! totals are computed after every worker has joined.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::annotation::{read_gff, GeneTable, IntervalRow, MemoryIntervals, ANNO_FILE, GENES_FILE};
use crate::bitmap::{num_groups, pack_counters, MultiResWriter};
use crate::chrom::ChromTable;
use crate::config::{Genome, IndexConfig, SampleTable, ANCHOR_DIR, CONFIG_FILE, SAMPLES_FILE};
use crate::error::{BuildError, ConfigError, Result};
use crate::genome::CHROMS_FILE;
use crate::membership::MembershipSource;
use crate::occurrence::{BinTable, Histogram};

/// What to do when some anchor genomes fail to build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the build, listing every failed genome
    #[default]
    Abort,

    /// Return the genomes that succeeded along with the failures
    Skip,
}

/// Outcome of anchoring a single genome
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorSummary {
    pub genome: String,
    pub chromosomes: usize,

    /// Sum of chromosome sizes
    pub positions: u64,

    /// Decompressed bytes written for each step
    pub bytes: Vec<(u64, u64)>,

    pub genes: usize,
    pub annotations: usize,

    /// Occurrence histogram of the whole genome
    pub total: Histogram,
}

/// Outcome of anchoring a collection
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub summaries: Vec<AnchorSummary>,

    /// `(genome, reason)` of every genome that failed to build
    pub failures: Vec<(String, String)>,

    /// Sum of the occurrence histograms of every built genome
    pub total: Histogram,
}
impl BuildReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Directory holding the files of anchor genome `name`
#[must_use]
pub fn genome_dir(prefix: &Path, name: &str) -> PathBuf {
    prefix.join(ANCHOR_DIR).join(name)
}

/// Chromosome table of an anchor genome from its sequence file.
///
/// A `.fai` index next to the FASTA file is used when present.
pub fn chrom_table(genome: &Genome, config: &IndexConfig) -> Result<ChromTable> {
    let fasta = genome
        .fasta
        .as_ref()
        .ok_or_else(|| ConfigError::MissingSequence(genome.name.clone()))?;
    let mut fai = fasta.clone().into_os_string();
    fai.push(".fai");
    let fai = PathBuf::from(fai);
    if fai.exists() {
        ChromTable::from_fai(fai, config.k, &config.steps)
    } else {
        ChromTable::from_fasta(fasta, config.k, &config.steps)
    }
}

/// Initializes `prefix` and anchors every selected genome.
///
/// Chromosome tables are read from each anchor's sequence file.
pub fn build_all<M>(
    prefix: &Path,
    samples: &SampleTable,
    config: &IndexConfig,
    source: &M,
    policy: FailurePolicy,
) -> Result<BuildReport>
where
    M: MembershipSource + Sync,
{
    config.validate()?;
    for genome in samples.anchors(config)? {
        if genome.fasta.is_none() {
            return Err(ConfigError::MissingSequence(genome.name.clone()).into());
        }
    }
    build_all_with(prefix, samples, config, source, policy, |genome| {
        chrom_table(genome, config)
    })
}

/// Initializes `prefix` and anchors every selected genome, reading
/// chromosome tables through `chroms`.
pub fn build_all_with<M, F>(
    prefix: &Path,
    samples: &SampleTable,
    config: &IndexConfig,
    source: &M,
    policy: FailurePolicy,
    chroms: F,
) -> Result<BuildReport>
where
    M: MembershipSource + Sync,
    F: Fn(&Genome) -> Result<ChromTable> + Sync,
{
    config.validate()?;
    let anchors = samples.anchors(config)?;

    fs::create_dir_all(prefix.join(ANCHOR_DIR))?;
    config.save(prefix.join(CONFIG_FILE))?;
    samples.save(prefix.join(SAMPLES_FILE))?;

    // Calculate the number of threads to use
    let num_threads = match config.threads {
        0 => num_cpus::get(),
        n => n,
    }
    .clamp(1, anchors.len().max(1));
    let per_thread = anchors.len().div_ceil(num_threads).max(1);

    info!(
        "Anchoring {} of {} genomes on {num_threads} threads",
        anchors.len(),
        samples.ngenomes()
    );

    let ngenomes = samples.ngenomes();
    let results: Vec<(String, Result<AnchorSummary>)> = thread::scope(|scope| {
        let handles: Vec<_> = anchors
            .chunks(per_thread)
            .map(|batch| {
                let chroms = &chroms;
                let handle = scope.spawn(move || {
                    batch
                        .iter()
                        .map(|&genome| {
                            let result = chroms(genome).and_then(|table| {
                                anchor_genome(prefix, genome, &table, config, ngenomes, source)
                            });
                            (genome.name.clone(), result)
                        })
                        .collect::<Vec<_>>()
                });
                (batch, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(batch, handle)| match handle.join() {
                Ok(results) => results,
                Err(_) => batch
                    .iter()
                    .map(|genome| {
                        let reason = BuildError::Membership {
                            genome: genome.name.clone(),
                            chrom: String::new(),
                            reason: "worker thread panicked".to_string(),
                        };
                        (genome.name.clone(), Err(reason.into()))
                    })
                    .collect(),
            })
            .collect()
    });

    let mut summaries = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (genome, result) in results {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                error!("Failed to anchor {genome}: {e}");
                failures.push((genome, e.to_string()));
            }
        }
    }

    if !failures.is_empty() && policy == FailurePolicy::Abort {
        return Err(BuildError::Failed(failures).into());
    }
    if !failures.is_empty() {
        warn!(
            "Continuing with {} anchored genomes, {} failed",
            summaries.len(),
            failures.len()
        );
    }

    let mut total = Histogram::new(ngenomes);
    for summary in &summaries {
        total += &summary.total;
    }
    Ok(BuildReport {
        summaries,
        failures,
        total,
    })
}

/// Writes the bitmaps and tables of one anchor genome into its directory
pub fn anchor_genome<M: MembershipSource>(
    prefix: &Path,
    genome: &Genome,
    chroms: &ChromTable,
    config: &IndexConfig,
    ngenomes: usize,
    source: &M,
) -> Result<AnchorSummary> {
    let dir = genome_dir(prefix, &genome.name);
    fs::create_dir_all(&dir)?;
    debug!("Anchoring {} into {}", genome.name, dir.display());

    let (genes, annos) = match &genome.gff {
        Some(gff) => split_features(read_gff(gff)?, config),
        None => (MemoryIntervals::new(), MemoryIntervals::new()),
    };

    chroms.save(dir.join(CHROMS_FILE))?;
    let mut writer =
        MultiResWriter::create(&dir, &config.steps, config.block_size, config.compression_level)?;
    let mut bins = BinTable::new(ngenomes, config.bin_len());
    let mut gene_table = GeneTable::new(ngenomes);

    for chrom in chroms.iter() {
        let groups = (0..num_groups(ngenomes))
            .map(|group| source.counters(&genome.name, &chrom.name, group))
            .collect::<Result<Vec<_>>>()?;
        if let Some(found) = groups.iter().map(Vec::len).find(|&n| n as u64 != chrom.size) {
            return Err(BuildError::Membership {
                genome: genome.name.clone(),
                chrom: chrom.name.clone(),
                reason: format!("expected {} positions, found {found}", chrom.size),
            }
            .into());
        }

        let rows = pack_counters(&groups, ngenomes)?;
        writer.write_chromosome(&rows)?;

        let counts = rows.occurrence_counts(ngenomes);
        bins.push_chromosome(&chrom.name, &counts);
        gene_table.push_chromosome(genes.chromosome(&chrom.name), &counts);
    }

    let bytes = writer.bytes_written();
    writer.finish()?;
    bins.save(dir.join(BinTable::file_name(config.chr_bin_kbp)))?;
    gene_table.save(dir.join(GENES_FILE))?;
    annos.save(dir.join(ANNO_FILE))?;

    let summary = AnchorSummary {
        genome: genome.name.clone(),
        chromosomes: chroms.len(),
        positions: chroms.total_size(),
        bytes,
        genes: gene_table.len(),
        annotations: annos.len(),
        total: bins.total(),
    };
    info!(
        "Anchored {}: {} chromosomes, {} positions, {} genes",
        summary.genome, summary.chromosomes, summary.positions, summary.genes
    );
    Ok(summary)
}

/// Splits GFF features into gene and annotation intervals
fn split_features(rows: Vec<IntervalRow>, config: &IndexConfig) -> (MemoryIntervals, MemoryIntervals) {
    let (genes, others): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|row| config.is_gene_type(&row.kind));
    let annos = others
        .into_iter()
        .filter(|row| config.is_anno_type(&row.kind));
    (MemoryIntervals::from_rows(genes), MemoryIntervals::from_rows(annos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrom::Chromosome;
    use crate::membership::MemoryMembership;

    #[test]
    fn test_split_features() {
        let rows = vec![
            IntervalRow::new("chr1", 0, 10, "gene"),
            IntervalRow::new("chr1", 0, 5, "exon"),
            IntervalRow::new("chr1", 0, 5, "CDS"),
        ];
        let mut config = IndexConfig::default();
        let (genes, annos) = split_features(rows.clone(), &config);
        assert_eq!(genes.len(), 1);
        assert_eq!(annos.len(), 2);

        config.anno_types = Some(vec!["CDS".to_string(), "gene".to_string()]);
        let (genes, annos) = split_features(rows, &config);
        assert_eq!(genes.len(), 1);
        assert_eq!(annos.len(), 1);
    }

    #[test]
    fn test_chrom_table_prefers_fai() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let fasta = dir.path().join("a.fa");
        fs::write(&fasta, ">chr1\nACGTACGTAC\n")?;
        let genome = Genome {
            name: "A".to_string(),
            id: 1,
            fasta: Some(fasta.clone()),
            gff: None,
        };
        let config = IndexConfig {
            k: 3,
            ..IndexConfig::default()
        };
        assert_eq!(chrom_table(&genome, &config)?.get("chr1").map(|c| c.size), Some(8));

        fs::write(dir.path().join("a.fa.fai"), "chr1\t100\t6\t60\t61\n")?;
        assert_eq!(chrom_table(&genome, &config)?.get("chr1").map(|c| c.size), Some(98));

        let genome = Genome { fasta: None, ..genome };
        assert!(chrom_table(&genome, &config).is_err());
        Ok(())
    }

    #[test]
    fn test_anchor_rejects_short_counters() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let genome = Genome {
            name: "A".to_string(),
            id: 1,
            fasta: None,
            gff: None,
        };
        let chroms = ChromTable::new(vec![Chromosome::new("chr1", 0, 5)], &[1])?;
        let mut source = MemoryMembership::new(2);
        source.insert_counters("A", "chr1", vec![vec![1, 1, 1]]);

        let err = anchor_genome(dir.path(), &genome, &chroms, &IndexConfig::default(), 2, &source)
            .unwrap_err();
        assert!(matches!(err, crate::Error::BuildError(_)));
        Ok(())
    }
}
