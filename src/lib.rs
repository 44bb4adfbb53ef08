//! # pgx-rs - Pharmacogenomic Phenotype Inference
//!
//! Predicts drug-metabolism phenotypes from variant call files (VCF) by
//! looking up a curated catalog of star-allele-defining variants inside
//! pharmacogene regions, computing a CPIC-style activity score per gene
//! and classifying it into a metabolizer phenotype.

pub mod catalog;
pub mod phenotype;
pub mod profile;
pub mod regions;
pub mod scoring;
pub mod utils;
pub mod vcf;

use catalog::VariantCatalog;
use regions::GeneRegionTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Represents a genomic variant with its position and alleles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub chrom: String,
    pub pos: u32,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl Variant {
    pub fn new(chrom: String, pos: u32, ref_allele: String, alt_allele: String) -> Self {
        Self {
            chrom,
            pos,
            ref_allele,
            alt_allele,
        }
    }
}

/// A single sample's genotype at one site.
///
/// Produced once by [`GenotypeCall::parse`] so the matcher only ever has to
/// switch over these four cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenotypeCall {
    /// No call, or a token that could not be parsed
    Missing,
    HomRef,
    Het,
    HomAlt,
}

impl GenotypeCall {
    /// Parse a VCF `GT` token such as `0/1`, `1|1`, `./.` or a haploid `1`.
    ///
    /// Anything unparseable maps to `Missing`; a single bad token must not
    /// abort a whole-chromosome scan.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() {
            return GenotypeCall::Missing;
        }

        let mut non_ref = 0usize;
        let mut called = 0usize;
        for allele in token.split(|c| c == '/' || c == '|') {
            if allele == "." {
                return GenotypeCall::Missing;
            }
            match allele.parse::<u32>() {
                Ok(0) => called += 1,
                Ok(_) => {
                    called += 1;
                    non_ref += 1;
                }
                Err(_) => return GenotypeCall::Missing,
            }
        }

        match (called, non_ref) {
            (0, _) => GenotypeCall::Missing,
            // more than two alleles (polyploid tokens) are not supported
            (c, _) if c > 2 => GenotypeCall::Missing,
            (_, 0) => GenotypeCall::HomRef,
            (c, n) if n == c => GenotypeCall::HomAlt,
            _ => GenotypeCall::Het,
        }
    }

    /// Number of non-reference copies implied by the call
    pub fn alt_copies(&self) -> u32 {
        match self {
            GenotypeCall::Missing | GenotypeCall::HomRef => 0,
            GenotypeCall::Het => 1,
            GenotypeCall::HomAlt => 2,
        }
    }
}

/// A VCF record inside a gene region, with the genotype calls of the
/// retained samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedVariantRecord {
    pub variant: Variant,
    pub reference_snp_id: Option<String>,
    pub genotypes: BTreeMap<String, GenotypeCall>,
    /// FORMAT `CN` values, only present for records that carry them
    pub copy_numbers: BTreeMap<String, u32>,
}

impl ExtractedVariantRecord {
    pub fn genotype(&self, sample_id: &str) -> GenotypeCall {
        self.genotypes
            .get(sample_id)
            .copied()
            .unwrap_or(GenotypeCall::Missing)
    }

    pub fn copy_number(&self, sample_id: &str) -> Option<u32> {
        self.copy_numbers.get(sample_id).copied()
    }
}

/// Configuration shared by every pipeline call.
///
/// Built once at start-up and passed by reference; the tables are never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct PgxConfig {
    pub regions: GeneRegionTable,
    pub catalog: VariantCatalog,
    /// Genes to report, in the order they appear in a rendered profile
    pub genes: Vec<String>,
    pub num_threads: usize,
}

impl PgxConfig {
    pub fn from_tables(regions: GeneRegionTable, catalog: VariantCatalog) -> Self {
        let genes = regions.genes().map(|g| g.to_string()).collect();
        Self {
            regions,
            catalog,
            genes,
            num_threads: utils::get_num_cpus(),
        }
    }

    /// Build a configuration from optional custom table files.
    ///
    /// Built-in tables are used where no file is given; an empty `genes`
    /// list means every gene of the region table.
    pub fn load(
        regions_path: Option<&Path>,
        catalog_path: Option<&Path>,
        genes: &[String],
        num_threads: usize,
    ) -> PgxResult<Self> {
        let regions = match regions_path {
            Some(path) => GeneRegionTable::from_tsv(path)?,
            None => GeneRegionTable::default(),
        };
        let catalog = match catalog_path {
            Some(path) => VariantCatalog::from_tsv(path)?,
            None => VariantCatalog::default(),
        };

        let mut config = Self::from_tables(regions, catalog);
        if !genes.is_empty() {
            config.genes = genes.to_vec();
        }
        config.num_threads = num_threads;

        validate_pgx_config(&config)?;
        Ok(config)
    }
}

impl Default for PgxConfig {
    fn default() -> Self {
        Self::from_tables(GeneRegionTable::default(), VariantCatalog::default())
    }
}

/// Validate a configuration before running any pipeline
pub fn validate_pgx_config(config: &PgxConfig) -> PgxResult<()> {
    if config.num_threads == 0 {
        return Err(PgxError::InvalidConfig(
            "num_threads must be at least 1".to_string(),
        ));
    }

    if config.genes.is_empty() {
        return Err(PgxError::InvalidConfig(
            "at least one gene must be requested".to_string(),
        ));
    }

    for gene in &config.genes {
        if config.regions.get(gene).is_none() {
            return Err(PgxError::UnsupportedGene(gene.clone()));
        }
    }

    for gene in config.catalog.genes() {
        if config.regions.get(gene).is_none() {
            return Err(PgxError::InvalidConfig(format!(
                "catalog gene {} has no entry in the gene region table",
                gene
            )));
        }
    }

    Ok(())
}

/// Error types for the pgx library
#[derive(Debug, thiserror::Error)]
pub enum PgxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot access file: {0}")]
    FileAccess(String),

    #[error("Invalid VCF header: {0}")]
    HeaderParse(String),

    #[error("Unsupported gene: {0}")]
    UnsupportedGene(String),

    #[error("Catalog integrity violation: {0}")]
    CatalogIntegrity(String),

    #[error("Sample not found: {0}")]
    SampleNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PgxResult<T> = Result<T, PgxError>;
