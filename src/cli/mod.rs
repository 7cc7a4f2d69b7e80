use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "panbitmap")]
#[command(version)]
#[command(about = "Query pan-genome k-mer presence bitmaps", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize the genomes and anchors of an index
    Info(InfoArgs),
    /// Print presence rows of an anchor region
    Query(RegionArgs),
    /// Print the occurrence histogram of an anchor region
    Occ(RegionArgs),
    /// Print genes overlapping an anchor region with their histograms
    Genes(IntervalArgs),
    /// Print annotations overlapping an anchor region
    Anno(IntervalArgs),
}

#[derive(Parser)]
pub struct InfoArgs {
    /// Index directory
    #[arg(value_name = "PREFIX")]
    pub prefix: PathBuf,
}

#[derive(Parser)]
pub struct RegionArgs {
    /// Index directory
    #[arg(value_name = "PREFIX")]
    pub prefix: PathBuf,

    /// Anchor genome
    #[arg(short, long)]
    pub genome: String,

    /// Chromosome of the anchor genome
    #[arg(short, long)]
    pub chrom: String,

    /// Start position (0-based, default: chromosome start)
    #[arg(short, long)]
    pub start: Option<u64>,

    /// End position (exclusive, default: chromosome end)
    #[arg(short, long)]
    pub end: Option<u64>,

    /// Sampling step
    #[arg(long, default_value = "1")]
    pub step: u64,
}

#[derive(Parser)]
pub struct IntervalArgs {
    /// Index directory
    #[arg(value_name = "PREFIX")]
    pub prefix: PathBuf,

    /// Anchor genome
    #[arg(short, long)]
    pub genome: String,

    /// Chromosome of the anchor genome
    #[arg(short, long)]
    pub chrom: String,

    /// Start position (0-based)
    #[arg(short, long, default_value = "0")]
    pub start: u64,

    /// End position (exclusive, default: chromosome end)
    #[arg(short, long)]
    pub end: Option<u64>,
}
