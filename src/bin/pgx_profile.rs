//! Patient profile CLI - chromosome VCFs in, metabolizer phenotype profile out

use clap::Parser;
use env_logger::Env;
use pgx_rs::{
    profile::{
        assemble, default_sample_id, gene_files_from_chromosome_files, ChromosomeFile,
        PatientDetails,
    },
    utils::{ensure_parent_dirs, get_num_cpus, Timer},
    PgxConfig, PgxError, PgxResult,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgx_profile")]
#[command(about = "Pharmacogenomic profile: metabolizer phenotypes from per-chromosome VCFs")]
#[command(long_about = "
pgx_profile predicts a patient's drug-metabolism phenotype for each supported
pharmacogene and prints a profile that downstream tools can consume.

For every gene it:
1. Streams the VCF covering the gene's chromosome and keeps only records in
   the gene region (a .tbi/.csi index next to the file is used if present)
2. Looks up the patient's genotype at catalogued star-allele positions and
   at copy-number events, ignoring every variant outside the catalog
3. Computes a CPIC-style activity score and classifies it as a Poor,
   Intermediate, Normal or Ultrarapid metabolizer

Pass one VCF per chromosome with --vcf. Files are assigned to genes by the
chromosome of their first record, or explicitly as CHROM=PATH. Genes whose
chromosome has no file, or whose file cannot be read, are reported as
not determined.
")]
struct Args {
    /// Variant file for one chromosome, as PATH or CHROM=PATH (repeatable)
    #[arg(long = "vcf", value_name = "FILE", required = true)]
    vcf: Vec<ChromosomeFile>,

    /// Sample to profile (defaults to the first sample in the first VCF)
    #[arg(long)]
    sample: Option<String>,

    /// Patient age
    #[arg(long)]
    age: Option<u32>,

    /// Free-text medical conditions
    #[arg(long)]
    conditions: Option<String>,

    /// Free-text lifestyle notes
    #[arg(long)]
    lifestyle: Option<String>,

    /// Gene to report (repeatable; defaults to every gene in the region table)
    #[arg(long = "gene", value_name = "SYMBOL")]
    genes: Vec<String>,

    /// Custom gene region table (TSV: gene, chrom, start, end)
    #[arg(long, value_name = "FILE")]
    regions: Option<PathBuf>,

    /// Custom variant catalog (TSV: gene, rsid, star_allele, kind, impact, activity)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Write the profile as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Write the profile to a file instead of standard output
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Number of genes processed in parallel
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

    log::info!("Starting pharmacogenomic profile");
    for file in &args.vcf {
        log::info!("Input VCF: {:?}", file.path);
    }

    let config = PgxConfig::load(
        args.regions.as_deref(),
        args.catalog.as_deref(),
        &args.genes,
        args.num_threads,
    )?;
    log::info!(
        "Configuration: {} genes, {} catalog variants, {} threads",
        config.genes.len(),
        config.catalog.len(),
        config.num_threads
    );

    let sample_id = match args.sample {
        Some(sample) => sample,
        None => {
            let sample = default_sample_id(&args.vcf)?;
            log::info!("No sample given, using {}", sample);
            sample
        }
    };

    let gene_files = gene_files_from_chromosome_files(&args.vcf, &config);
    for (gene, path) in &gene_files {
        log::info!("{} <- {:?}", gene, path);
    }

    let details = PatientDetails {
        age: args.age,
        conditions: args.conditions,
        lifestyle: args.lifestyle,
    };

    let _timer = Timer::new("Assembling profile");
    let profile = assemble(&sample_id, &gene_files, details, &config)?;

    log::info!(
        "Determined {} of {} genes for {}",
        profile.determined_count(),
        profile.genes.len(),
        sample_id
    );

    let rendered = if args.json {
        profile.to_json()?
    } else {
        profile.render()
    };

    match &args.output {
        Some(path) => {
            ensure_parent_dirs(path)?;
            std::fs::write(path, format!("{}\n", rendered))?;
            log::info!("Profile written to: {:?}", path);
        }
        None => println!("{}", rendered),
    }

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
            eprintln!("Please check the --sample value against the VCF header.");
        }
        PgxError::UnsupportedGene(gene) => {
            eprintln!("Error: Unsupported gene: {}", gene);
            eprintln!("Supported genes are those listed in the gene region table.");
        }
        PgxError::CatalogIntegrity(msg) => {
            eprintln!("Error: Variant catalog is inconsistent: {}", msg);
            eprintln!("Please fix the catalog file passed with --catalog.");
        }
        PgxError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
        }
        PgxError::Htslib(ref e) => {
            eprintln!("Error: VCF index processing error: {}", e);
            eprintln!("Please check that the .tbi/.csi index matches the VCF.");
        }
        PgxError::Csv(ref e) => {
            eprintln!("Error: Table parsing error: {}", e);
            eprintln!("Please check the --regions and --catalog files.");
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
