//! Index configuration and the sample table.
//!
//! Both are validated when loaded; any problem is a [`ConfigError`] reported
//! before build or read work starts.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bitmap::{bytes_per_row, DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_LEVEL, MAX_BLOCK_SIZE};
use crate::error::{ConfigError, FormatError, Result};

/// Name of the persisted configuration file in an index directory
pub const CONFIG_FILE: &str = "config.json";

/// Name of the persisted sample table in an index directory
pub const SAMPLES_FILE: &str = "samples.tsv";

/// Subdirectory holding one directory per anchor genome
pub const ANCHOR_DIR: &str = "anchor";

pub const DEFAULT_KMER_LENGTH: usize = 21;
pub const DEFAULT_LOWRES_STEP: u64 = 100;
pub const DEFAULT_BIN_KBP: u64 = 200;

/// Build and read parameters of a pan-genome index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// K-mer length
    pub k: usize,

    /// Stored steps, step 1 first
    pub steps: Vec<u64>,

    /// Size of chromosome-scale occurrence bins in kilobases
    pub chr_bin_kbp: u64,

    /// GFF feature types treated as genes
    pub gene_types: Vec<String>,

    /// GFF feature types kept as annotations (all non-gene types if unset)
    pub anno_types: Option<Vec<String>>,

    /// Subset of genomes to anchor (all genomes with a sequence file if unset)
    pub anchor_genomes: Option<Vec<String>>,

    /// Decompressed bitmap block size in bytes
    pub block_size: usize,

    /// ZSTD compression level of bitmap blocks
    pub compression_level: i32,

    /// Number of anchoring threads (0 = all available)
    pub threads: usize,
}
impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_KMER_LENGTH,
            steps: vec![1, DEFAULT_LOWRES_STEP],
            chr_bin_kbp: DEFAULT_BIN_KBP,
            gene_types: vec!["gene".to_string()],
            anno_types: None,
            anchor_genomes: None,
            block_size: DEFAULT_BLOCK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            threads: 1,
        }
    }
}
impl IndexConfig {
    /// Sets the stored steps; step 1 is added if missing
    #[must_use]
    pub fn with_steps(mut self, steps: &[u64]) -> Self {
        let mut steps = steps.to_vec();
        if !steps.contains(&1) {
            steps.insert(0, 1);
        }
        self.steps = steps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ConfigError::InvalidKmerLength(self.k).into());
        }
        if !self.steps.contains(&1) {
            return Err(ConfigError::MissingFullResolution(self.steps.clone()).into());
        }
        let mut seen = HashSet::with_capacity(self.steps.len());
        for &step in &self.steps {
            if step == 0 || !seen.insert(step) {
                return Err(ConfigError::InvalidStep(step).into());
            }
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::InvalidBlockSize(self.block_size, MAX_BLOCK_SIZE).into());
        }
        if self.chr_bin_kbp == 0 {
            return Err(ConfigError::InvalidBinSize(self.chr_bin_kbp).into());
        }
        Ok(())
    }

    /// Bin length in positions
    #[must_use]
    pub fn bin_len(&self) -> u64 {
        self.chr_bin_kbp * 1000
    }

    /// Whether a GFF feature type is a gene
    #[must_use]
    pub fn is_gene_type(&self, kind: &str) -> bool {
        self.gene_types.iter().any(|t| t == kind)
    }

    /// Whether a non-gene GFF feature type is kept as an annotation
    #[must_use]
    pub fn is_anno_type(&self, kind: &str) -> bool {
        match &self.anno_types {
            Some(types) => types.iter().any(|t| t == kind),
            None => !self.is_gene_type(kind),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Uninitialized(path.display().to_string()).into());
        }
        let config: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }
}

/// A genome of the collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genome {
    pub name: String,

    /// 1-based bit position of the genome in presence rows
    pub id: usize,

    pub fasta: Option<PathBuf>,
    pub gff: Option<PathBuf>,
}
impl Genome {
    /// 0-based column of the genome in a presence matrix
    #[must_use]
    pub fn column(&self) -> usize {
        self.id - 1
    }
}

/// The ordered genomes of a collection; order fixes genome ids
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleTable {
    genomes: Vec<Genome>,
}

#[derive(Deserialize)]
struct SampleRow {
    name: String,
    fasta: Option<PathBuf>,
    gff: Option<PathBuf>,
}

impl SampleTable {
    /// Assigns ids 1..=G in the given order
    pub fn new<I, S>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Option<PathBuf>, Option<PathBuf>)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut genomes = Vec::new();
        for (name, fasta, gff) in samples {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateGenome(name).into());
            }
            genomes.push(Genome {
                name,
                id: genomes.len() + 1,
                fasta,
                gff,
            });
        }
        if genomes.is_empty() {
            return Err(ConfigError::EmptySampleTable.into());
        }
        Ok(Self { genomes })
    }

    /// Genome names only, without sequence or annotation files
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(|name| (name, None, None)))
    }

    /// Reads a tab-separated table with `name`, `fasta` and `gff` columns.
    ///
    /// Any `id` column is ignored; ids follow row order.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Uninitialized(path.display().to_string()).into());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<SampleRow>, _>>()
            .map_err(|e| FormatError::MalformedTable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::new(rows.into_iter().map(|row| (row.name, row.fasta, row.gff)))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        for genome in &self.genomes {
            writer.serialize(genome)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of genomes `G`
    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.genomes.len()
    }

    /// Bytes per packed presence row
    #[must_use]
    pub fn nbytes(&self) -> usize {
        bytes_per_row(self.ngenomes())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Genome> {
        self.genomes.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Genome> {
        self.genomes.iter().find(|g| g.name == name)
    }

    /// Genomes selected as anchors.
    ///
    /// Without an explicit selection every genome with a sequence file is an anchor.
    pub fn anchors(&self, config: &IndexConfig) -> Result<Vec<&Genome>> {
        match &config.anchor_genomes {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.get(name)
                        .ok_or_else(|| ConfigError::UnknownGenome(name.clone()).into())
                })
                .collect(),
            None => Ok(self.genomes.iter().filter(|g| g.fasta.is_some()).collect()),
        }
    }
}
