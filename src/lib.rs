//! # panbitmap
//!
//! Random-access, multi-resolution k-mer presence bitmaps for pan-genome
//! collections.
//!
//! For every k-mer start position of every anchor genome the index records
//! which genomes of the collection share that k-mer, as one packed row of
//! `ceil(G / 8)` bytes. Rows are stored block-compressed at one or more
//! resolutions ("steps") with a companion block index, so any coordinate
//! range can be decoded without touching the rest of the file.
//!
//! On top of the bitmaps the index keeps occurrence histograms per bin and
//! per gene, computed once while anchoring.
//!
//! ## Layout
//!
//! ```text
//! <prefix>/config.json
//! <prefix>/samples.tsv
//! <prefix>/anchor/<genome>/bitmap.<step>.pbz
//! <prefix>/anchor/<genome>/bitmap.<step>.pbi
//! <prefix>/anchor/<genome>/chrs.tsv
//! <prefix>/anchor/<genome>/bitsum.<kb>kb.tsv
//! <prefix>/anchor/<genome>/genes.tsv
//! <prefix>/anchor/<genome>/anno.tsv
//! ```

pub mod anchor;
pub mod annotation;
pub mod bitmap;
pub mod chrom;
pub mod collection;
pub mod config;
pub mod error;
pub mod genome;
pub mod membership;
pub mod occurrence;

pub use anchor::{build_all, build_all_with, AnchorSummary, BuildReport, FailurePolicy};
pub use annotation::{
    AnnotationOverlay, GeneOccurrence, GeneTable, IntervalRow, IntervalSource, MemoryIntervals,
    Strand,
};
pub use bitmap::{pack_counters, BitmapReader, PackedRows, PresenceMatrix};
pub use chrom::{ChromTable, Chromosome};
pub use collection::{GenomeSize, PanIndex};
pub use config::{Genome, IndexConfig, SampleTable};
pub use error::{Error, Result};
pub use genome::GenomeIndex;
pub use membership::{MemoryMembership, MembershipSource};
pub use occurrence::{bin_histograms, BinTable, Histogram};
