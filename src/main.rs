use std::io::{self, BufWriter, Write};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use panbitmap::error::RangeError;
use panbitmap::PanIndex;

mod cli;

use cli::{Cli, Commands, InfoArgs, IntervalArgs, RegionArgs};

fn show_info(args: &InfoArgs) -> Result<()> {
    let index = PanIndex::open(&args.prefix)?;
    let mut out = BufWriter::new(io::stdout().lock());

    writeln!(out, "genome\tid\tanchor\tlength\tchromosomes\tmean_occurrence")?;
    let means = index.mean_occurrence();
    for (genome, size) in index.samples().iter().zip(index.genome_sizes()) {
        let mean = means
            .iter()
            .find(|(name, _)| *name == genome.name)
            .map(|(_, mean)| format!("{mean:.4}"));
        let anchor = mean.is_some();
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            genome.name,
            genome.id,
            anchor,
            size.length,
            size.chromosomes,
            mean.unwrap_or_else(|| "NA".to_string())
        )?;
    }
    for (genome, reason) in index.unavailable() {
        eprintln!("Anchor {genome} unavailable: {reason}");
    }
    out.flush()?;
    index.close();
    Ok(())
}

fn query(args: &RegionArgs) -> Result<()> {
    let mut index = PanIndex::open(&args.prefix)?;
    let matrix = index.query_bitmap(&args.genome, &args.chrom, args.start, args.end, args.step)?;
    let mut out = BufWriter::new(io::stdout().lock());

    let start = index
        .anchor(&args.genome)?
        .first_position(args.start.unwrap_or(0), args.step)?;
    for (i, row) in matrix.rows().enumerate() {
        let bits: String = row.iter().map(|&b| if b { '1' } else { '0' }).collect();
        writeln!(out, "{}\t{}\t{bits}", args.chrom, start + i as u64 * args.step)?;
    }
    out.flush()?;
    index.close();
    Ok(())
}

fn occ(args: &RegionArgs) -> Result<()> {
    let mut index = PanIndex::open(&args.prefix)?;
    let hist = index.query_occ_counts(&args.genome, &args.chrom, args.start, args.end, args.step)?;
    let mut out = BufWriter::new(io::stdout().lock());

    writeln!(out, "occurrence\tcount\tfrequency")?;
    for ((k, count), freq) in hist.iter().zip(hist.frequencies()) {
        writeln!(out, "{k}\t{count}\t{freq:.6}")?;
    }
    out.flush()?;
    index.close();
    Ok(())
}

fn chrom_end(index: &PanIndex, args: &IntervalArgs) -> Result<u64> {
    let anchor = index.anchor(&args.genome)?;
    let size = anchor
        .chroms()
        .get(&args.chrom)
        .map(|chrom| chrom.size)
        .ok_or_else(|| RangeError::UnknownChromosome(args.chrom.clone()))?;
    Ok(args.end.unwrap_or(size))
}

fn genes(args: &IntervalArgs) -> Result<()> {
    let index = PanIndex::open(&args.prefix)?;
    let end = chrom_end(&index, args)?;
    let genes = index.query_genes(&args.genome, &args.chrom, args.start, end)?;
    let mut out = BufWriter::new(io::stdout().lock());

    let header: Vec<String> = (1..=index.ngenomes()).map(|k| k.to_string()).collect();
    writeln!(out, "chr\tstart\tend\tname\tstrand\t{}", header.join("\t"))?;
    for gene in &genes {
        let row = &gene.interval;
        let counts: Vec<String> = gene.hist.as_slice().iter().map(u64::to_string).collect();
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.chrom,
            row.start,
            row.end,
            gene.name().unwrap_or("."),
            row.strand,
            counts.join("\t")
        )?;
    }
    out.flush()?;
    index.close();
    Ok(())
}

fn anno(args: &IntervalArgs) -> Result<()> {
    let index = PanIndex::open(&args.prefix)?;
    let end = chrom_end(&index, args)?;
    let rows = index.query_anno(&args.genome, &args.chrom, args.start, end)?;
    let mut out = BufWriter::new(io::stdout().lock());

    writeln!(out, "chr\tstart\tend\ttype\tstrand\tattr")?;
    for row in &rows {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.chrom, row.start, row.end, row.kind, row.strand, row.attr
        )?;
    }
    out.flush()?;
    index.close();
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info(args) => show_info(&args)?,
        Commands::Query(args) => query(&args)?,
        Commands::Occ(args) => occ(&args)?,
        Commands::Genes(args) => genes(&args)?,
        Commands::Anno(args) => anno(&args)?,
    }
    info!("Done");

    Ok(())
}
