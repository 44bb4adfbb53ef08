//! Gene region table: where each supported pharmacogene lives on GRCh38

use crate::{PgxError, PgxResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

/// A gene's locus, 1-based and inclusive on both ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneRegion {
    pub gene: String,
    pub chrom: String,
    pub start: u32,
    pub end: u32,
}

impl GeneRegion {
    pub fn new(gene: &str, chrom: &str, start: u32, end: u32) -> Self {
        Self {
            gene: gene.to_string(),
            chrom: chrom.to_string(),
            start,
            end,
        }
    }

    /// Where `pos` lies relative to this region, inclusive on both ends.
    /// The chromosome is checked separately with [`GeneRegion::on_chromosome`].
    pub fn position_of(&self, pos: u32) -> Ordering {
        if pos < self.start {
            Ordering::Less
        } else if pos > self.end {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    pub fn on_chromosome(&self, chrom: &str) -> bool {
        normalize_chromosome(&self.chrom) == normalize_chromosome(chrom)
    }
}

/// Strip an optional `chr` prefix so `chr22` and `22` compare equal.
pub fn normalize_chromosome(chrom: &str) -> String {
    let trimmed = chrom.trim();
    let has_prefix = trimmed
        .get(..3)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("chr"));
    let bare = if has_prefix && trimmed.len() > 3 {
        &trimmed[3..]
    } else {
        trimmed
    };
    let bare = bare.to_ascii_uppercase();
    if bare == "M" {
        "MT".to_string()
    } else {
        bare
    }
}

/// Lookup table from gene symbol to [`GeneRegion`].
///
/// Iteration order is the order of construction; the default table
/// lists genes in the order a rendered profile reports them.
#[derive(Debug, Clone)]
pub struct GeneRegionTable {
    regions: Vec<GeneRegion>,
}

impl GeneRegionTable {
    pub fn new(regions: Vec<GeneRegion>) -> PgxResult<Self> {
        let mut seen = HashSet::new();
        for region in &regions {
            if region.start == 0 || region.start > region.end {
                return Err(PgxError::InvalidConfig(format!(
                    "invalid region for {}: {}:{}-{}",
                    region.gene, region.chrom, region.start, region.end
                )));
            }
            if !seen.insert(region.gene.to_ascii_uppercase()) {
                return Err(PgxError::InvalidConfig(format!(
                    "gene {} appears more than once in the region table",
                    region.gene
                )));
            }
        }
        Ok(Self { regions })
    }

    /// Load a tab-separated table with the columns `gene chrom start end`
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> PgxResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .from_path(&path)
            .map_err(|e| {
                PgxError::FileAccess(format!("{}: {}", path.as_ref().display(), e))
            })?;

        let mut regions = Vec::new();
        for result in reader.deserialize() {
            let region: GeneRegion = result?;
            regions.push(region);
        }

        log::info!(
            "Loaded {} gene regions from {}",
            regions.len(),
            path.as_ref().display()
        );
        Self::new(regions)
    }

    pub fn write_tsv<W: Write>(&self, writer: W) -> PgxResult<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);
        for region in &self.regions {
            writer.serialize(region)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn get(&self, gene: &str) -> Option<&GeneRegion> {
        self.regions
            .iter()
            .find(|r| r.gene.eq_ignore_ascii_case(gene))
    }

    /// Like [`get`](Self::get) but fails for genes the table does not know
    pub fn require(&self, gene: &str) -> PgxResult<&GeneRegion> {
        self.get(gene)
            .ok_or_else(|| PgxError::UnsupportedGene(gene.to_string()))
    }

    pub fn genes(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.gene.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneRegion> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for GeneRegionTable {
    fn default() -> Self {
        Self {
            regions: vec![
                GeneRegion::new("CYP2D6", "chr22", 42_126_499, 42_130_881),
                GeneRegion::new("CYP2C19", "chr10", 94_757_681, 94_855_547),
                GeneRegion::new("CYP2C9", "chr10", 94_938_658, 94_990_091),
            ],
        }
    }
}
