//! Patient profile assembly
//!
//! Runs extraction, scoring and classification once per configured gene and
//! folds the per-gene outcomes into a single [`PatientProfile`]. A gene that
//! fails (unreadable file, missing sample, no file for its chromosome) is
//! reported as undetermined; it never aborts the other genes.

use crate::phenotype::{classify, PhenotypeLabel};
use crate::regions::normalize_chromosome;
use crate::scoring::{score, ActivityScore};
use crate::vcf::{detect_chromosome, extract, read_sample_ids};
use crate::{validate_pgx_config, PgxConfig, PgxError, PgxResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Outcome of the pipeline for one gene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GeneStatus {
    Determined {
        phenotype: PhenotypeLabel,
        activity_score: f64,
        copy_number: u32,
        alleles: Vec<String>,
        /// Wild type was assumed because catalog positions had no call
        wild_type_assumed: bool,
    },
    Undetermined {
        reason: String,
    },
}

impl GeneStatus {
    fn from_score(result: &ActivityScore) -> Self {
        GeneStatus::Determined {
            phenotype: classify(&result.gene, result.score),
            activity_score: result.score,
            copy_number: result.copy_number,
            alleles: result
                .findings
                .iter()
                .map(|f| format!("{}({})", f.star_allele, f.copies_observed))
                .collect(),
            wild_type_assumed: result.is_wild_type_assumed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneResult {
    pub gene: String,
    #[serde(flatten)]
    pub status: GeneStatus,
}

/// Caller-supplied, free-text patient context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub age: Option<u32>,
    pub conditions: Option<String>,
    pub lifestyle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub sample_id: String,
    pub age: Option<u32>,
    /// One entry per configured gene, in configuration order
    pub genes: Vec<GeneResult>,
    pub conditions: Option<String>,
    pub lifestyle: Option<String>,
}

impl PatientProfile {
    pub fn phenotype(&self, gene: &str) -> Option<PhenotypeLabel> {
        self.genes
            .iter()
            .find(|g| g.gene.eq_ignore_ascii_case(gene))
            .and_then(|g| match &g.status {
                GeneStatus::Determined { phenotype, .. } => Some(*phenotype),
                GeneStatus::Undetermined { .. } => None,
            })
    }

    pub fn determined_count(&self) -> usize {
        self.genes
            .iter()
            .filter(|g| matches!(g.status, GeneStatus::Determined { .. }))
            .count()
    }

    /// Text block handed to downstream consumers. Field order is fixed:
    /// identifier, age, one line per gene, conditions, lifestyle.
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.genes.len() + 4);
        lines.push(format!("Patient ID: {}", self.sample_id));
        lines.push(match self.age {
            Some(age) => format!("Age: {}", age),
            None => "Age: not provided".to_string(),
        });

        for result in &self.genes {
            lines.push(match &result.status {
                GeneStatus::Determined {
                    phenotype,
                    activity_score,
                    ..
                } => format!(
                    "{}: {} (activity score {:.2})",
                    result.gene, phenotype, activity_score
                ),
                GeneStatus::Undetermined { reason } => {
                    format!("{}: Not determined ({})", result.gene, reason)
                }
            });
        }

        lines.push(format!(
            "Conditions: {}",
            self.conditions.as_deref().unwrap_or("none reported")
        ));
        lines.push(format!(
            "Lifestyle: {}",
            self.lifestyle.as_deref().unwrap_or("none reported")
        ));

        lines.join("\n")
    }

    pub fn to_json(&self) -> PgxResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for PatientProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Run the pipeline for one gene of one sample
pub fn determine_gene(
    gene: &str,
    sample_id: &str,
    path: &Path,
    config: &PgxConfig,
) -> PgxResult<ActivityScore> {
    let filter: BTreeSet<String> = [sample_id.to_string()].into_iter().collect();
    let records = extract(path, gene, &config.regions, Some(&filter))?;
    score(gene, sample_id, &records, config)
}

/// Assemble a profile for `sample_id` from per-gene variant files.
///
/// Genes without a file, and genes whose pipeline fails, are reported as
/// undetermined. Only an invalid configuration is an error.
pub fn assemble(
    sample_id: &str,
    gene_files: &BTreeMap<String, PathBuf>,
    details: PatientDetails,
    config: &PgxConfig,
) -> PgxResult<PatientProfile> {
    validate_pgx_config(config)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build()
        .map_err(|e| PgxError::InvalidConfig(format!("cannot start worker pool: {}", e)))?;

    let genes: Vec<GeneResult> = pool.install(|| {
        config
            .genes
            .par_iter()
            .map(|gene| {
                let file = gene_files
                    .iter()
                    .find(|(g, _)| g.eq_ignore_ascii_case(gene))
                    .map(|(_, path)| path);

                let status = match file {
                    Some(path) => match determine_gene(gene, sample_id, path, config) {
                        Ok(result) => {
                            log::info!(
                                "{} {}: activity score {} ({})",
                                sample_id,
                                gene,
                                result.score,
                                result.allele_summary()
                            );
                            GeneStatus::from_score(&result)
                        }
                        Err(e) => {
                            log::warn!("{} {}: could not be determined: {}", sample_id, gene, e);
                            GeneStatus::Undetermined {
                                reason: e.to_string(),
                            }
                        }
                    },
                    None => {
                        let chrom = config
                            .regions
                            .get(gene)
                            .map(|r| r.chrom.as_str())
                            .unwrap_or("its chromosome");
                        GeneStatus::Undetermined {
                            reason: format!("no variant file supplied for {}", chrom),
                        }
                    }
                };

                GeneResult {
                    gene: gene.clone(),
                    status,
                }
            })
            .collect()
    });

    let profile = PatientProfile {
        sample_id: sample_id.to_string(),
        age: details.age,
        genes,
        conditions: details.conditions,
        lifestyle: details.lifestyle,
    };

    if profile.determined_count() == 0 {
        log::warn!(
            "No gene could be determined for {}; every gene is reported as not determined",
            sample_id
        );
    }

    Ok(profile)
}

/// A variant file covering one chromosome, optionally labelled
/// `CHROM=PATH` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomeFile {
    pub chrom: Option<String>,
    pub path: PathBuf,
}

impl FromStr for ChromosomeFile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty file argument".to_string());
        }
        match s.split_once('=') {
            Some((chrom, path)) if !chrom.is_empty() && !path.is_empty() => Ok(ChromosomeFile {
                chrom: Some(chrom.to_string()),
                path: PathBuf::from(path),
            }),
            Some(_) => Err(format!("expected CHROM=PATH, got '{}'", s)),
            None => Ok(ChromosomeFile {
                chrom: None,
                path: PathBuf::from(s),
            }),
        }
    }
}

/// Map every configured gene to the file that covers its chromosome.
///
/// Unlabelled files are assigned by the chromosome of their first data
/// row. Files that cannot be read or are empty are skipped with a warning;
/// their genes end up undetermined.
pub fn gene_files_from_chromosome_files(
    files: &[ChromosomeFile],
    config: &PgxConfig,
) -> BTreeMap<String, PathBuf> {
    let mut gene_files = BTreeMap::new();

    for file in files {
        let chrom = match &file.chrom {
            Some(chrom) => chrom.clone(),
            None => match detect_chromosome(&file.path) {
                Ok(Some(chrom)) => chrom,
                Ok(None) => {
                    log::warn!("{} contains no variant records, skipping", file.path.display());
                    continue;
                }
                Err(e) => {
                    log::warn!("Cannot detect chromosome of {}: {}", file.path.display(), e);
                    continue;
                }
            },
        };

        for gene in &config.genes {
            let on_chrom = config
                .regions
                .get(gene)
                .map(|r| r.on_chromosome(&chrom))
                .unwrap_or(false);
            if !on_chrom {
                continue;
            }
            if let Some(previous) = gene_files.insert(gene.clone(), file.path.clone()) {
                log::warn!(
                    "Both {} and {} cover chromosome {}; using the latter for {}",
                    previous.display(),
                    file.path.display(),
                    normalize_chromosome(&chrom),
                    gene
                );
            }
        }
    }

    gene_files
}

/// First sample of the first readable file, for callers that did not name one
pub fn default_sample_id(files: &[ChromosomeFile]) -> PgxResult<String> {
    for file in files {
        match read_sample_ids(&file.path) {
            Ok(samples) => {
                if let Some(first) = samples.into_iter().next() {
                    return Ok(first);
                }
            }
            Err(e) => log::warn!("Cannot read samples of {}: {}", file.path.display(), e),
        }
    }
    Err(PgxError::SampleNotFound(
        "no sample columns found in any input file".to_string(),
    ))
}
