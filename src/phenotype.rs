//! Metabolizer phenotype classification from activity scores

use crate::scoring::ActivityScore;
use crate::PgxResult;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Lowest activity score still classified as a normal metabolizer
pub const NORMAL_LOWER_BOUND: f64 = 1.5;

/// Highest activity score still classified as a normal metabolizer
pub const NORMAL_UPPER_BOUND: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhenotypeLabel {
    PoorMetabolizer,
    IntermediateMetabolizer,
    NormalMetabolizer,
    UltraRapidMetabolizer,
}

impl PhenotypeLabel {
    /// Short form used in tables
    pub fn abbreviation(&self) -> &'static str {
        match self {
            PhenotypeLabel::PoorMetabolizer => "PM",
            PhenotypeLabel::IntermediateMetabolizer => "IM",
            PhenotypeLabel::NormalMetabolizer => "NM",
            PhenotypeLabel::UltraRapidMetabolizer => "UM",
        }
    }
}

impl fmt::Display for PhenotypeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PhenotypeLabel::PoorMetabolizer => "Poor Metabolizer",
            PhenotypeLabel::IntermediateMetabolizer => "Intermediate Metabolizer",
            PhenotypeLabel::NormalMetabolizer => "Normal Metabolizer",
            PhenotypeLabel::UltraRapidMetabolizer => "Ultrarapid Metabolizer",
        };
        write!(f, "{}", label)
    }
}

/// Classify an activity score.
///
/// `0` is poor, `(0, 1.5)` intermediate, `[1.5, 2.0]` normal and anything
/// above `2.0` ultrarapid. The thresholds are the same for every gene.
pub fn classify(_gene: &str, activity_score: f64) -> PhenotypeLabel {
    if activity_score <= 0.0 {
        PhenotypeLabel::PoorMetabolizer
    } else if activity_score < NORMAL_LOWER_BOUND {
        PhenotypeLabel::IntermediateMetabolizer
    } else if activity_score <= NORMAL_UPPER_BOUND {
        PhenotypeLabel::NormalMetabolizer
    } else {
        PhenotypeLabel::UltraRapidMetabolizer
    }
}

/// Write per-sample scores and phenotypes to a TSV file (gzip if `.gz`)
pub fn write_phenotype_table(scores: &[ActivityScore], output_path: &Path) -> PgxResult<()> {
    let file = File::create(output_path)?;
    let mut writer: Box<dyn Write> =
        if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };

    writeln!(
        writer,
        "Sample\tGene\tActivity_Score\tPhenotype\tCopy_Number\tAlleles\tMissing_Calls"
    )?;

    for result in scores {
        let missing = if result.missing_calls.is_empty() {
            ".".to_string()
        } else {
            result.missing_calls.join(",")
        };
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            result.sample_id,
            result.gene,
            result.score,
            classify(&result.gene, result.score).abbreviation(),
            result.copy_number,
            result.allele_summary(),
            missing,
        )?;
    }

    writer.flush()?;
    Ok(())
}
