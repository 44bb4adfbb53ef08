//! Catalog CLI - validate custom knowledge-base tables and dump the effective ones

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use pgx_rs::{
    catalog::VariantCatalog, regions::GeneRegionTable, validate_pgx_config, PgxConfig,
};
use std::io::Write;
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum Table {
    Catalog,
    Regions,
}

#[derive(Parser)]
#[command(name = "pgx_catalog")]
#[command(about = "Validate and print the variant catalog and gene region table")]
#[command(long_about = "
Loads the gene region table and variant catalog (the built-in ones, or the
files given with --regions / --catalog), runs every integrity check the
scoring tools run at start-up, and prints the requested table as TSV.

The printed TSV can be edited and passed back with --catalog or --regions.
")]
struct Args {
    /// Table to print
    #[arg(long, value_enum, default_value = "catalog")]
    table: Table,

    /// Custom gene region table to validate
    #[arg(long, value_name = "FILE")]
    regions: Option<PathBuf>,

    /// Custom variant catalog to validate
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let regions = match &args.regions {
        Some(path) => GeneRegionTable::from_tsv(path)
            .with_context(|| format!("loading gene regions from {:?}", path))?,
        None => GeneRegionTable::default(),
    };
    let catalog = match &args.catalog {
        Some(path) => VariantCatalog::from_tsv(path)
            .with_context(|| format!("loading variant catalog from {:?}", path))?,
        None => VariantCatalog::default(),
    };

    let config = PgxConfig::from_tables(regions, catalog);
    validate_pgx_config(&config).context("tables are inconsistent")?;
    log::info!(
        "{} gene regions and {} catalog variants passed validation",
        config.regions.len(),
        config.catalog.len()
    );
    for gene in config.regions.genes() {
        log::info!(
            "  {}: {} point alleles, {} structural signals",
            gene,
            config.catalog.variants_for(gene).count(),
            config.catalog.structural_for(gene).count()
        );
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.table {
        Table::Catalog => config.catalog.write_tsv(&mut out)?,
        Table::Regions => config.regions.write_tsv(&mut out)?,
    }
    out.flush()?;

    Ok(())
}
