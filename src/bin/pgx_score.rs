//! Cohort scoring CLI - activity scores and phenotypes for every sample of a VCF

use clap::Parser;
use env_logger::Env;
use pgx_rs::{
    phenotype::{classify, write_phenotype_table, PhenotypeLabel},
    scoring::score_all_samples,
    utils::{ensure_parent_dirs, get_num_cpus, validate_file_readable, Timer},
    vcf::{detect_chromosome, extract, read_sample_ids},
    PgxConfig, PgxError, PgxResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgx_score")]
#[command(about = "Activity scores and metabolizer phenotypes for all samples of a VCF")]
#[command(long_about = "
This tool scores every sample of a single VCF for one or more pharmacogenes.
For each gene the region is extracted once and every sample's genotype at the
catalogued star-allele positions is reduced to a CPIC-style activity score.

The output is a TSV file (gzip-compressed if the name ends in .gz) with one
row per sample and gene: activity score, phenotype (PM/IM/NM/UM), effective
gene copy number, the star alleles found and any catalog positions whose call
was missing.

Without --gene, every supported gene on the VCF's chromosome is scored.
")]
struct Args {
    /// Path to the input VCF file
    #[arg(long, value_name = "FILE")]
    input_vcf: PathBuf,

    /// Path to the output TSV file
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Gene to score (repeatable)
    #[arg(long = "gene", value_name = "SYMBOL")]
    genes: Vec<String>,

    /// Restrict scoring to this sample (repeatable)
    #[arg(long = "sample", value_name = "ID")]
    samples: Vec<String>,

    /// Custom gene region table (TSV: gene, chrom, start, end)
    #[arg(long, value_name = "FILE")]
    regions: Option<PathBuf>,

    /// Custom variant catalog (TSV: gene, rsid, star_allele, kind, impact, activity)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Number of samples scored in parallel
    #[arg(long, default_value_t = get_num_cpus())]
    num_threads: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn run() -> PgxResult<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting cohort scoring");
    log::info!("VCF file: {:?}", args.input_vcf);
    log::info!("Output file: {:?}", args.output);
    log::info!("Number of threads: {}", args.num_threads);

    validate_file_readable(&args.input_vcf)?;

    let mut config = PgxConfig::load(
        args.regions.as_deref(),
        args.catalog.as_deref(),
        &args.genes,
        args.num_threads,
    )?;

    if args.genes.is_empty() {
        let chrom = detect_chromosome(&args.input_vcf)?;
        config.genes = match chrom {
            Some(chrom) => config
                .regions
                .iter()
                .filter(|r| r.on_chromosome(&chrom))
                .map(|r| r.gene.clone())
                .collect(),
            None => Vec::new(),
        };
    }

    ensure_parent_dirs(&args.output)?;

    if config.genes.is_empty() {
        log::warn!("No supported gene lies on the chromosome of the input VCF");
        write_phenotype_table(&[], &args.output)?;
        return Ok(());
    }
    log::info!("Genes: {}", config.genes.join(", "));

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()
        .map_err(|e| PgxError::InvalidConfig(format!("cannot start worker pool: {}", e)))?;

    let (samples, filter) = if args.samples.is_empty() {
        (read_sample_ids(&args.input_vcf)?, None)
    } else {
        let filter: BTreeSet<String> = args.samples.iter().cloned().collect();
        (args.samples.clone(), Some(filter))
    };
    log::info!("Scoring {} samples", samples.len());

    let mut results = Vec::new();
    for gene in &config.genes {
        let _timer = Timer::new(&format!("Scoring {}", gene));
        let records = extract(&args.input_vcf, gene, &config.regions, filter.as_ref())?;
        results.extend(score_all_samples(gene, &samples, &records, &config)?);
    }

    // Log statistics
    let mut counts: BTreeMap<(String, PhenotypeLabel), usize> = BTreeMap::new();
    for result in &results {
        let label = classify(&result.gene, result.score);
        *counts.entry((result.gene.clone(), label)).or_insert(0) += 1;
    }
    log::info!("Results summary:");
    for ((gene, label), count) in &counts {
        log::info!("  {} {}: {}", gene, label, count);
    }

    let _timer = Timer::new("Writing results");
    write_phenotype_table(&results, &args.output)?;

    log::info!("Results written to: {:?}", args.output);
    log::info!("Scoring completed successfully");

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: PgxError) -> ! {
    match error {
        PgxError::FileAccess(msg) => {
            eprintln!("Error: Cannot access file: {}", msg);
            eprintln!("Please check that the file exists and is readable.");
        }
        PgxError::HeaderParse(msg) => {
            eprintln!("Error: Invalid VCF header: {}", msg);
            eprintln!("Please check that your VCF has a #CHROM header line with sample columns.");
        }
        PgxError::SampleNotFound(msg) => {
            eprintln!("Error: Sample not found: {}", msg);
            eprintln!("Please check the --sample values against the VCF header.");
        }
        PgxError::UnsupportedGene(gene) => {
            eprintln!("Error: Unsupported gene: {}", gene);
        }
        PgxError::CatalogIntegrity(msg) => {
            eprintln!("Error: Variant catalog is inconsistent: {}", msg);
        }
        PgxError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
        }
        PgxError::Htslib(ref e) => {
            eprintln!("Error: VCF index processing error: {}", e);
        }
        PgxError::Csv(ref e) => {
            eprintln!("Error: Table parsing error: {}", e);
        }
        PgxError::Json(ref e) => {
            eprintln!("Error: JSON serialization error: {}", e);
        }
        PgxError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
