//! Genotype matching and activity-score calculation
//!
//! A sample starts as two fully functional gene copies. Structural events
//! found in the region change the number of copies; catalog point variants
//! then replace the activity of individual copies. Variants that are not
//! in the catalog are never looked at.
//!
//! Genotypes are unphased, so heterozygous findings are applied one copy at
//! a time in extraction order. Two heterozygous catalog variants that really
//! sit on the same haplotype are therefore counted as affecting both copies.

use crate::catalog::StructuralKind;
use crate::{ExtractedVariantRecord, GenotypeCall, PgxConfig, PgxResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Activity of one fully functional gene copy
pub const FUNCTIONAL_ALLELE_ACTIVITY: f64 = 1.0;

/// Number of gene copies assumed in the absence of structural evidence
pub const DIPLOID_COPIES: u32 = 2;

/// Largest total copy number accepted from a structural call. Higher values
/// are treated as malformed calls and recorded as missing.
pub const MAX_COPY_NUMBER: u32 = 10;

/// A catalog allele (or structural event) observed in one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlleleFinding {
    pub gene: String,
    pub sample_id: String,
    pub star_allele: String,
    /// Variant identifier the finding came from, if any
    pub rsid: Option<String>,
    /// 0-2 for point variants. For duplications this is the total copy
    /// number and may exceed 2; for deletions the number of copies lost.
    pub copies_observed: u32,
    pub is_structural: bool,
}

/// Activity score of one sample for one gene, with the evidence behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityScore {
    pub gene: String,
    pub sample_id: String,
    pub score: f64,
    /// Gene copies left after structural events
    pub copy_number: u32,
    pub findings: Vec<AlleleFinding>,
    /// Catalog variants whose call was missing for this sample
    pub missing_calls: Vec<String>,
}

impl ActivityScore {
    /// No catalog allele was found, but at least one catalog position had no
    /// usable call, so the wild-type result rests on missing data.
    pub fn is_wild_type_assumed(&self) -> bool {
        self.findings.is_empty() && !self.missing_calls.is_empty()
    }

    /// Star alleles found, e.g. `*2(1), *3(1)`
    pub fn allele_summary(&self) -> String {
        if self.findings.is_empty() {
            return "none".to_string();
        }
        self.findings
            .iter()
            .map(|f| format!("{}({})", f.star_allele, f.copies_observed))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CopyState {
    Functional,
    Assigned(f64),
    Deleted,
}

impl CopyState {
    fn activity(&self) -> f64 {
        match self {
            CopyState::Functional => FUNCTIONAL_ALLELE_ACTIVITY,
            CopyState::Assigned(value) => *value,
            CopyState::Deleted => 0.0,
        }
    }

    /// An allele on an already assigned copy can only lower its activity
    fn assign(&mut self, activity: f64) {
        *self = match *self {
            CopyState::Functional => CopyState::Assigned(activity),
            CopyState::Assigned(current) => CopyState::Assigned(current.min(activity)),
            CopyState::Deleted => CopyState::Deleted,
        };
    }
}

/// Copy-number effect of one structural record on one sample
#[derive(Debug, Clone, PartialEq, Eq)]
enum CopyNumberEffect {
    Deleted(u32),
    Total(u32),
    Implausible(String),
}

fn copy_number_effect(
    kind: StructuralKind,
    haplotype_copies: Option<u32>,
    call: GenotypeCall,
    copy_number: Option<u32>,
) -> Option<CopyNumberEffect> {
    // a measured total copy number wins over anything derived from the genotype
    if let Some(cn) = copy_number {
        return match cn {
            cn if cn < DIPLOID_COPIES => Some(CopyNumberEffect::Deleted(DIPLOID_COPIES - cn)),
            cn if cn > MAX_COPY_NUMBER => Some(CopyNumberEffect::Implausible(format!(
                "copy number {} exceeds {}",
                cn, MAX_COPY_NUMBER
            ))),
            cn if cn > DIPLOID_COPIES => Some(CopyNumberEffect::Total(cn)),
            _ => None,
        };
    }

    match (kind, call) {
        (_, GenotypeCall::Missing) | (_, GenotypeCall::HomRef) => None,
        (StructuralKind::Deletion, call) => Some(CopyNumberEffect::Deleted(call.alt_copies())),
        (StructuralKind::Duplication, call) => {
            let per_haplotype = haplotype_copies.unwrap_or(2);
            let total = match call {
                GenotypeCall::Het => per_haplotype.checked_add(1),
                _ => per_haplotype.checked_mul(2),
            };
            match total {
                Some(total) if total > MAX_COPY_NUMBER => Some(CopyNumberEffect::Implausible(
                    format!("copy number {} exceeds {}", total, MAX_COPY_NUMBER),
                )),
                Some(total) if total > DIPLOID_COPIES => Some(CopyNumberEffect::Total(total)),
                Some(_) => None,
                None => Some(CopyNumberEffect::Implausible(format!(
                    "{} copies per haplotype",
                    per_haplotype
                ))),
            }
        }
        // `<CNV>` without a CN value says nothing about direction
        (StructuralKind::CopyNumber, _) => None,
    }
}

/// Compute the activity score of `sample_id` for `gene`.
///
/// Fails only when the gene has no region; a region without catalog hits
/// yields the two-copy baseline of 2.0.
pub fn score(
    gene: &str,
    sample_id: &str,
    variants: &[ExtractedVariantRecord],
    config: &PgxConfig,
) -> PgxResult<ActivityScore> {
    config.regions.require(gene)?;
    let catalog = &config.catalog;

    let mut findings = Vec::new();
    let mut missing_calls = Vec::new();
    let mut structural_records = vec![false; variants.len()];
    let mut deleted_copies = 0u32;
    let mut total_copies = DIPLOID_COPIES;

    // structural events first so that deletions dominate point findings
    for (i, record) in variants.iter().enumerate() {
        let event = match catalog.structural_match(gene, record) {
            Some(event) => event,
            None => continue,
        };
        structural_records[i] = true;

        let call = record.genotype(sample_id);
        let effect = copy_number_effect(
            event.kind,
            event.alt_copy_number,
            call,
            record.copy_number(sample_id),
        );

        let copies_observed = match effect {
            Some(CopyNumberEffect::Implausible(reason)) => {
                log::warn!(
                    "{} {}: ignoring structural call at {}:{} ({})",
                    sample_id,
                    gene,
                    record.variant.chrom,
                    record.variant.pos,
                    reason
                );
                missing_calls.push(record_label(record));
                continue;
            }
            Some(CopyNumberEffect::Deleted(n)) if n > 0 => {
                deleted_copies = deleted_copies.max(n.min(DIPLOID_COPIES));
                n.min(DIPLOID_COPIES)
            }
            Some(CopyNumberEffect::Total(n)) => {
                total_copies = total_copies.max(n);
                n
            }
            _ => {
                if call == GenotypeCall::Missing && record.copy_number(sample_id).is_none() {
                    missing_calls.push(record_label(record));
                }
                continue;
            }
        };

        log::debug!(
            "{} {}: structural {} ({:?}) at {}:{}, copies {}",
            sample_id,
            gene,
            event.star_allele,
            event.kind,
            record.variant.chrom,
            record.variant.pos,
            copies_observed
        );
        findings.push(AlleleFinding {
            gene: gene.to_string(),
            sample_id: sample_id.to_string(),
            star_allele: event.star_allele,
            rsid: record.reference_snp_id.clone(),
            copies_observed,
            is_structural: true,
        });
    }

    let mut copies = vec![CopyState::Functional; total_copies as usize];
    for copy in copies.iter_mut().take(deleted_copies as usize) {
        *copy = CopyState::Deleted;
    }

    for (record, _) in variants
        .iter()
        .zip(structural_records.iter())
        .filter(|(_, &structural)| !structural)
    {
        let rsid = match &record.reference_snp_id {
            Some(rsid) => rsid,
            None => continue,
        };
        let allele = match catalog.lookup(gene, rsid) {
            Some(allele) => allele,
            None => continue,
        };

        let call = record.genotype(sample_id);
        match call {
            GenotypeCall::HomRef => continue,
            GenotypeCall::Missing => {
                missing_calls.push(rsid.clone());
                continue;
            }
            GenotypeCall::Het => {
                let target = copies
                    .iter()
                    .position(|c| *c == CopyState::Functional)
                    .or_else(|| most_active_assigned(&copies));
                match target {
                    Some(i) => copies[i].assign(allele.activity),
                    None => log::debug!(
                        "{} {}: {} {} has no remaining copy to act on",
                        sample_id,
                        gene,
                        allele.star_allele,
                        rsid
                    ),
                }
            }
            GenotypeCall::HomAlt => {
                for copy in copies.iter_mut() {
                    copy.assign(allele.activity);
                }
            }
        }

        log::debug!(
            "{} {}: {} {} ({}, {:?})",
            sample_id,
            gene,
            allele.star_allele,
            rsid,
            allele.impact,
            call
        );
        findings.push(AlleleFinding {
            gene: gene.to_string(),
            sample_id: sample_id.to_string(),
            star_allele: allele.star_allele.clone(),
            rsid: Some(rsid.clone()),
            copies_observed: call.alt_copies(),
            is_structural: false,
        });
    }

    let score: f64 = copies.iter().map(|c| c.activity()).sum();

    Ok(ActivityScore {
        gene: gene.to_string(),
        sample_id: sample_id.to_string(),
        score: score.max(0.0),
        copy_number: total_copies - deleted_copies.min(total_copies),
        findings,
        missing_calls,
    })
}

fn most_active_assigned(copies: &[CopyState]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, copy) in copies.iter().enumerate() {
        if let CopyState::Assigned(value) = copy {
            if best.map_or(true, |(_, b)| *value > b) {
                best = Some((i, *value));
            }
        }
    }
    best.map(|(i, _)| i)
}

fn record_label(record: &ExtractedVariantRecord) -> String {
    record
        .reference_snp_id
        .clone()
        .unwrap_or_else(|| format!("{}:{}", record.variant.chrom, record.variant.pos))
}

/// Score every listed sample in parallel; output order follows `samples`
pub fn score_all_samples(
    gene: &str,
    samples: &[String],
    variants: &[ExtractedVariantRecord],
    config: &PgxConfig,
) -> PgxResult<Vec<ActivityScore>> {
    samples
        .par_iter()
        .map(|sample| score(gene, sample, variants, config))
        .collect()
}
