use std::error::Error as StdError;

/// Custom Result type for panbitmap operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the panbitmap library, encompassing all possible error cases
/// that can occur while building or querying a pan-genome bitmap index.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid index configuration or sample table
    #[error("Error in configuration: {0}")]
    ConfigError(#[from] ConfigError),

    /// Missing, unreadable, or inconsistent on-disk structures
    #[error("Error in index format: {0}")]
    FormatError(#[from] FormatError),

    /// Query coordinates or resolution outside of what the index supports
    #[error("Error in query range: {0}")]
    RangeError(#[from] RangeError),

    /// Failures while anchoring one or more genomes
    #[error("Error building index: {0}")]
    BuildError(#[from] BuildError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// Errors reading or writing tab-separated tables
    #[error("Error with table: {0}")]
    CsvError(#[from] csv::Error),

    /// Errors reading or writing the JSON configuration
    #[error("Error with JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error is a per-query range error
    ///
    /// Range errors are returned to the caller of a single query and never
    /// invalidate the session that produced them.
    #[must_use]
    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::RangeError(_))
    }

    /// Checks if the error indicates that a genome's on-disk files must be rebuilt
    #[must_use]
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::FormatError(_))
    }
}

/// Errors raised while validating the index configuration and sample table
///
/// These are fatal and reported before any build or read work starts.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The set of stored steps does not include the canonical step 1
    #[error("Stored steps must include step 1, found {0:?}")]
    MissingFullResolution(Vec<u64>),

    /// A stored step is zero or repeated
    #[error("Invalid stored step {0}: steps must be positive and unique")]
    InvalidStep(u64),

    /// The block size cannot be addressed by a virtual position
    #[error("Invalid block size {0}: must be within [1, {1}]")]
    InvalidBlockSize(usize, usize),

    /// The k-mer length must be positive
    #[error("Invalid k-mer length: {0}")]
    InvalidKmerLength(usize),

    /// The bin size must be positive
    #[error("Invalid bin size: {0}kbp")]
    InvalidBinSize(u64),

    /// The sample table contains no genomes
    #[error("Sample table is empty")]
    EmptySampleTable,

    /// The same genome name appears twice in the sample table
    #[error("Duplicate genome name in sample table: {0}")]
    DuplicateGenome(String),

    /// A genome named in the configuration is not present in the sample table
    #[error("Unknown genome: {0}")]
    UnknownGenome(String),

    /// An anchor genome has neither a FASTA path nor a chromosome table
    #[error("Anchor genome {0} has no sequence file")]
    MissingSequence(String),

    /// The index directory is missing its configuration or sample table
    #[error("Index directory not initialized: {0}")]
    Uninitialized(String),
}

/// Errors caused by missing or inconsistent on-disk structures
///
/// These are fatal for the affected genome only.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// A required file is missing
    #[error("Missing file: {0}")]
    MissingFile(String),

    /// The block index file is shorter than its declared entry count
    #[error("Block index truncated: expected {expected} entries, found {found}")]
    TruncatedIndex { expected: u64, found: u64 },

    /// Block index entries are not strictly increasing
    #[error("Block index entry {0} is not increasing")]
    UnorderedIndex(usize),

    /// Consecutive index entries are further apart than a block can hold
    #[error("Block index entry {entry} spans {span} decompressed bytes, more than a block holds")]
    OversizedBlock { entry: usize, span: u64 },

    /// A block header does not carry the expected magic bytes
    #[error("Invalid block magic at compressed offset {0}")]
    InvalidBlockMagic(u64),

    /// A compressed block ends before its declared length
    #[error("Unable to find an expected full block at compressed offset {0}")]
    TruncatedBlock(u64),

    /// A block decompressed to a different size than its header declared
    #[error("Block at compressed offset {offset} decompressed to {found} bytes, expected {expected}")]
    BlockSizeMismatch {
        offset: u64,
        expected: usize,
        found: usize,
    },

    /// A read extends past the end of the decompressed stream
    #[error("Read of {length} bytes at decompressed offset {offset} exceeds stream length {total}")]
    ReadPastEnd { offset: u64, length: usize, total: u64 },

    /// The number of rows on disk does not match the chromosome table
    #[error("Row count mismatch for step {step}: index holds {found} bytes, chromosome table expects {expected}")]
    RowCountMismatch { step: u64, expected: u64, found: u64 },

    /// Counter vectors do not cover the genome collection
    #[error("Expected {expected} counter groups for {ngenomes} genomes, found {found}")]
    GroupCountMismatch {
        expected: usize,
        found: usize,
        ngenomes: usize,
    },

    /// Counter vectors for one chromosome differ in length
    #[error("Counter group {group} has {found} positions, expected {expected}")]
    CounterLengthMismatch {
        group: usize,
        expected: usize,
        found: usize,
    },

    /// A persisted table is malformed
    #[error("Malformed table {path}: {reason}")]
    MalformedTable { path: String, reason: String },
}

/// Errors returned for a single query
///
/// These never abort the session that produced them.
#[derive(thiserror::Error, Debug)]
pub enum RangeError {
    /// Requested coordinates fall outside the chromosome
    #[error("Invalid range [{start}, {end}) on chromosome {chrom} of length {size}")]
    OutOfBounds {
        chrom: String,
        start: u64,
        end: u64,
        size: u64,
    },

    /// The chromosome is not part of the genome
    #[error("Unknown chromosome: {0}")]
    UnknownChromosome(String),

    /// The genome is not an open anchor genome
    #[error("Unknown anchor genome: {0}")]
    UnknownGenome(String),

    /// No stored step evenly divides the requested step
    #[error("Unsupported step {requested}: no stored step in {stored:?} divides it")]
    UnsupportedStep { requested: u64, stored: Vec<u64> },
}

/// Errors raised while anchoring genomes
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The k-mer membership collaborator failed for a genome
    #[error("Membership source failed for {genome}/{chrom}: {reason}")]
    Membership {
        genome: String,
        chrom: String,
        reason: String,
    },

    /// One or more genomes failed to anchor
    #[error("{} genome(s) failed to anchor: {}", .0.len(), format_failures(.0))]
    Failed(Vec<(String, String)>),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(genome, reason)| format!("{genome} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoPanbitmapError {
    fn into_panbitmap_error(self) -> Error;
}

impl<E> IntoPanbitmapError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_panbitmap_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum MyError {
        #[error("Custom error: {0}")]
        CustomError(String),
    }

    #[test]
    fn test_into_panbitmap_error() {
        let my_error = MyError::CustomError(String::from("some error"));
        let error = my_error.into_panbitmap_error();
        assert!(matches!(error, Error::GenericError(_)));
    }

    #[test]
    fn test_is_range_error() {
        let error: Error = RangeError::UnknownChromosome("chr9".to_string()).into();
        assert!(error.is_range_error());
        assert!(!error.is_format_error());
    }

    #[test]
    fn test_is_format_error() {
        let error: Error = FormatError::InvalidBlockMagic(42).into();
        assert!(error.is_format_error());
        assert!(!error.is_range_error());
    }

    #[test]
    fn test_range_error_out_of_bounds() {
        let error = RangeError::OutOfBounds {
            chrom: "chr1".to_string(),
            start: 10,
            end: 5,
            size: 100,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("chr1"));
        assert!(error_str.contains("[10, 5)"));
        assert!(error_str.contains("100"));
    }

    #[test]
    fn test_range_error_unsupported_step() {
        let error = RangeError::UnsupportedStep {
            requested: 7,
            stored: vec![2, 10],
        };
        let error_str = format!("{error}");
        assert!(error_str.contains('7'));
        assert!(error_str.contains("[2, 10]"));
    }

    #[test]
    fn test_format_error_row_count_mismatch() {
        let error = FormatError::RowCountMismatch {
            step: 100,
            expected: 300,
            found: 240,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("100"));
        assert!(error_str.contains("300"));
        assert!(error_str.contains("240"));
    }

    #[test]
    fn test_build_error_lists_every_failure() {
        let error = BuildError::Failed(vec![
            ("A".to_string(), "bad counters".to_string()),
            ("C".to_string(), "missing fasta".to_string()),
        ]);
        let error_str = format!("{error}");
        assert!(error_str.starts_with("2 genome(s)"));
        assert!(error_str.contains("A (bad counters)"));
        assert!(error_str.contains("C (missing fasta)"));
    }

    #[test]
    fn test_config_error_block_size() {
        let error = ConfigError::InvalidBlockSize(0, 65535);
        let error_str = format!("{error}");
        assert!(error_str.contains("65535"));
    }

    #[test]
    fn test_error_from_conversions() {
        let error: Error = ConfigError::EmptySampleTable.into();
        assert!(matches!(error, Error::ConfigError(_)));

        let error: Error = BuildError::Failed(Vec::new()).into();
        assert!(matches!(error, Error::BuildError(_)));

        let error: Error = std::io::Error::other("boom").into();
        assert!(matches!(error, Error::IoError(_)));
    }
}
