//! Variant knowledge base: clinically actionable variants per pharmacogene
//!
//! Only variants with established functional evidence are listed. A dbSNP
//! identifier that is not in the catalog has, by construction, no effect on
//! a sample's activity score.

use crate::{ExtractedVariantRecord, PgxError, PgxResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// Functional impact of a star allele
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactCategory {
    NoFunction,
    ReducedFunction,
    NormalFunction,
    IncreasedFunction,
}

impl fmt::Display for ImpactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImpactCategory::NoFunction => "no function",
            ImpactCategory::ReducedFunction => "reduced function",
            ImpactCategory::NormalFunction => "normal function",
            ImpactCategory::IncreasedFunction => "increased function",
        };
        write!(f, "{}", label)
    }
}

/// A point variant that defines a star allele
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVariant {
    pub gene: String,
    pub rsid: String,
    pub star_allele: String,
    pub impact: ImpactCategory,
    /// Activity value of one copy of the allele
    pub activity: f64,
}

/// Kind of copy-number event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralKind {
    Deletion,
    Duplication,
    /// `<CNV>`: direction only known from the per-sample `CN` value
    CopyNumber,
}

/// A whole-gene deletion or duplication the catalog knows by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralSignal {
    pub gene: String,
    pub kind: StructuralKind,
    pub star_allele: String,
    /// Variant ID that marks this event in a VCF's ID column, if any
    pub identifier: Option<String>,
}

/// A record recognised as a structural event for a gene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralMatch {
    pub kind: StructuralKind,
    pub star_allele: String,
    /// Per-haplotype copy number encoded in the ALT allele itself (`<CN3>`)
    pub alt_copy_number: Option<u32>,
}

/// Row layout of a catalog TSV file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogRow {
    gene: String,
    rsid: String,
    star_allele: String,
    #[serde(default = "default_row_kind")]
    kind: String,
    #[serde(default)]
    impact: Option<ImpactCategory>,
    #[serde(default)]
    activity: Option<f64>,
}

fn default_row_kind() -> String {
    "point".to_string()
}

/// Read-only lookup from `(gene, rsID)` to [`CatalogVariant`], plus the
/// parallel table of structural signals.
#[derive(Debug, Clone)]
pub struct VariantCatalog {
    variants: Vec<CatalogVariant>,
    structural: Vec<StructuralSignal>,
    index: HashMap<(String, String), usize>,
}

fn catalog_key(gene: &str, rsid: &str) -> (String, String) {
    (gene.to_ascii_uppercase(), rsid.to_ascii_lowercase())
}

impl VariantCatalog {
    /// Build a catalog, rejecting ambiguous or inconsistent entries
    pub fn new(
        variants: Vec<CatalogVariant>,
        structural: Vec<StructuralSignal>,
    ) -> PgxResult<Self> {
        let mut kept: Vec<CatalogVariant> = Vec::with_capacity(variants.len());
        let mut index = HashMap::new();
        let mut alleles: HashMap<(String, String), (ImpactCategory, f64)> = HashMap::new();

        for variant in variants {
            if variant.rsid.trim().is_empty() || variant.rsid == "." {
                return Err(PgxError::CatalogIntegrity(format!(
                    "{} {} has no variant identifier",
                    variant.gene, variant.star_allele
                )));
            }
            if !variant.activity.is_finite() || variant.activity < 0.0 {
                return Err(PgxError::CatalogIntegrity(format!(
                    "{} {} has invalid activity value {}",
                    variant.gene, variant.star_allele, variant.activity
                )));
            }

            let key = catalog_key(&variant.gene, &variant.rsid);
            if let Some(&existing) = index.get(&key) {
                let existing: &CatalogVariant = &kept[existing];
                if existing.star_allele != variant.star_allele {
                    return Err(PgxError::CatalogIntegrity(format!(
                        "{} {} maps to both {} and {}",
                        variant.gene, variant.rsid, existing.star_allele, variant.star_allele
                    )));
                }
                log::warn!(
                    "Ignoring duplicate catalog entry {} {}",
                    variant.gene,
                    variant.rsid
                );
                continue;
            }

            let allele_key = (variant.gene.to_ascii_uppercase(), variant.star_allele.clone());
            match alleles.get(&allele_key) {
                Some(&(impact, activity))
                    if impact != variant.impact || activity != variant.activity =>
                {
                    return Err(PgxError::CatalogIntegrity(format!(
                        "{} {} is listed with conflicting function ({} / {} vs {} / {})",
                        variant.gene,
                        variant.star_allele,
                        impact,
                        activity,
                        variant.impact,
                        variant.activity
                    )));
                }
                Some(_) => {}
                None => {
                    alleles.insert(allele_key, (variant.impact, variant.activity));
                }
            }

            index.insert(key, kept.len());
            kept.push(variant);
        }

        for signal in &structural {
            if let Some(id) = &signal.identifier {
                if index.contains_key(&catalog_key(&signal.gene, id)) {
                    return Err(PgxError::CatalogIntegrity(format!(
                        "{} {} is listed both as a point variant and as {}",
                        signal.gene, id, signal.star_allele
                    )));
                }
            }
        }

        Ok(Self {
            variants: kept,
            structural,
            index,
        })
    }

    /// Load a catalog from a tab-separated file.
    ///
    /// Columns: `gene rsid star_allele kind impact activity`. `kind` is
    /// `point` (default), `deletion`, `duplication` or `copy_number`; the
    /// last three ignore `impact`/`activity` and take `rsid` as the event's
    /// variant ID (`.` for none).
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> PgxResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .from_path(&path)
            .map_err(|e| {
                PgxError::FileAccess(format!("{}: {}", path.as_ref().display(), e))
            })?;

        let mut variants = Vec::new();
        let mut structural = Vec::new();

        for result in reader.deserialize() {
            let row: CatalogRow = result?;
            match row.kind.to_ascii_lowercase().as_str() {
                "point" => {
                    let impact = row.impact.ok_or_else(|| {
                        PgxError::CatalogIntegrity(format!(
                            "{} {} has no impact category",
                            row.gene, row.rsid
                        ))
                    })?;
                    let activity = row.activity.ok_or_else(|| {
                        PgxError::CatalogIntegrity(format!(
                            "{} {} has no activity value",
                            row.gene, row.rsid
                        ))
                    })?;
                    variants.push(CatalogVariant {
                        gene: row.gene,
                        rsid: row.rsid,
                        star_allele: row.star_allele,
                        impact,
                        activity,
                    });
                }
                other => {
                    let kind = match other {
                        "deletion" => StructuralKind::Deletion,
                        "duplication" => StructuralKind::Duplication,
                        "copy_number" => StructuralKind::CopyNumber,
                        _ => {
                            return Err(PgxError::CatalogIntegrity(format!(
                                "unknown catalog entry kind '{}' for {} {}",
                                row.kind, row.gene, row.rsid
                            )))
                        }
                    };
                    let identifier = if row.rsid.is_empty() || row.rsid == "." {
                        None
                    } else {
                        Some(row.rsid)
                    };
                    structural.push(StructuralSignal {
                        gene: row.gene,
                        kind,
                        star_allele: row.star_allele,
                        identifier,
                    });
                }
            }
        }

        log::info!(
            "Loaded {} catalog variants and {} structural signals from {}",
            variants.len(),
            structural.len(),
            path.as_ref().display()
        );
        Self::new(variants, structural)
    }

    /// Write the catalog in the layout [`from_tsv`](Self::from_tsv) reads
    pub fn write_tsv<W: Write>(&self, writer: W) -> PgxResult<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);

        for variant in &self.variants {
            writer.serialize(CatalogRow {
                gene: variant.gene.clone(),
                rsid: variant.rsid.clone(),
                star_allele: variant.star_allele.clone(),
                kind: default_row_kind(),
                impact: Some(variant.impact),
                activity: Some(variant.activity),
            })?;
        }
        for signal in &self.structural {
            let kind = match signal.kind {
                StructuralKind::Deletion => "deletion",
                StructuralKind::Duplication => "duplication",
                StructuralKind::CopyNumber => "copy_number",
            };
            writer.serialize(CatalogRow {
                gene: signal.gene.clone(),
                rsid: signal.identifier.clone().unwrap_or_else(|| ".".to_string()),
                star_allele: signal.star_allele.clone(),
                kind: kind.to_string(),
                impact: None,
                activity: None,
            })?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn lookup(&self, gene: &str, rsid: &str) -> Option<&CatalogVariant> {
        self.index
            .get(&catalog_key(gene, rsid))
            .map(|&i| &self.variants[i])
    }

    pub fn variants_for<'a>(&'a self, gene: &'a str) -> impl Iterator<Item = &'a CatalogVariant> {
        self.variants
            .iter()
            .filter(move |v| v.gene.eq_ignore_ascii_case(gene))
    }

    pub fn structural_for<'a>(
        &'a self,
        gene: &'a str,
    ) -> impl Iterator<Item = &'a StructuralSignal> {
        self.structural
            .iter()
            .filter(move |s| s.gene.eq_ignore_ascii_case(gene))
    }

    /// Distinct genes, in first-seen order
    pub fn genes(&self) -> Vec<&str> {
        let mut genes: Vec<&str> = Vec::new();
        let names = self
            .variants
            .iter()
            .map(|v| v.gene.as_str())
            .chain(self.structural.iter().map(|s| s.gene.as_str()));
        for gene in names {
            if !genes.iter().any(|g| g.eq_ignore_ascii_case(gene)) {
                genes.push(gene);
            }
        }
        genes
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Decide whether a record is a structural event for `gene`.
    ///
    /// A record matches when its ID names one of the gene's structural
    /// signals, or when its ALT is a symbolic copy-number allele.
    pub fn structural_match(
        &self,
        gene: &str,
        record: &ExtractedVariantRecord,
    ) -> Option<StructuralMatch> {
        if let Some(id) = &record.reference_snp_id {
            let named = self.structural_for(gene).find(|s| {
                s.identifier
                    .as_deref()
                    .map(|i| i.eq_ignore_ascii_case(id))
                    .unwrap_or(false)
            });
            if let Some(signal) = named {
                return Some(StructuralMatch {
                    kind: signal.kind,
                    star_allele: signal.star_allele.clone(),
                    alt_copy_number: symbolic_alt(&record.variant.alt_allele)
                        .and_then(|(_, cn)| cn),
                });
            }
        }

        let (kind, alt_copy_number) = symbolic_alt(&record.variant.alt_allele)?;
        let star_allele = self
            .structural_for(gene)
            .find(|s| s.kind == kind)
            .map(|s| s.star_allele.clone())
            .unwrap_or_else(|| match kind {
                StructuralKind::Deletion => "DEL".to_string(),
                StructuralKind::Duplication => "DUP".to_string(),
                StructuralKind::CopyNumber => "CNV".to_string(),
            });

        Some(StructuralMatch {
            kind,
            star_allele,
            alt_copy_number,
        })
    }
}

/// Interpret a symbolic ALT such as `<DEL>`, `<DUP:TANDEM>` or `<CN3>`.
///
/// For multi-allelic ALTs the first symbolic allele wins.
pub fn symbolic_alt(alt: &str) -> Option<(StructuralKind, Option<u32>)> {
    for allele in alt.split(',') {
        let allele = allele.trim();
        if !(allele.starts_with('<') && allele.ends_with('>')) {
            continue;
        }
        let inner = allele[1..allele.len() - 1].to_ascii_uppercase();
        let base = inner.split(':').next().unwrap_or("");

        match base {
            "DEL" => return Some((StructuralKind::Deletion, None)),
            "DUP" => return Some((StructuralKind::Duplication, None)),
            "CNV" => return Some((StructuralKind::CopyNumber, None)),
            _ => {}
        }

        // `<CNn>` is the copy number of one haplotype; `<CN1>` is the reference state
        if let Some(n) = base.strip_prefix("CN").and_then(|n| n.parse::<u32>().ok()) {
            match n {
                0 => return Some((StructuralKind::Deletion, Some(0))),
                1 => continue,
                _ => return Some((StructuralKind::Duplication, Some(n))),
            }
        }
    }
    None
}

const DEFAULT_VARIANTS: &[(&str, &str, &str, ImpactCategory, f64)] = &[
    ("CYP2D6", "rs35742686", "*3", ImpactCategory::NoFunction, 0.0),
    ("CYP2D6", "rs3892097", "*4", ImpactCategory::NoFunction, 0.0),
    ("CYP2D6", "rs5030655", "*6", ImpactCategory::NoFunction, 0.0),
    ("CYP2D6", "rs1065852", "*10", ImpactCategory::ReducedFunction, 0.25),
    ("CYP2D6", "rs28371706", "*17", ImpactCategory::ReducedFunction, 0.5),
    ("CYP2D6", "rs28371725", "*41", ImpactCategory::ReducedFunction, 0.5),
    ("CYP2C19", "rs4244285", "*2", ImpactCategory::NoFunction, 0.0),
    ("CYP2C19", "rs4986893", "*3", ImpactCategory::NoFunction, 0.0),
    ("CYP2C19", "rs12248560", "*17", ImpactCategory::IncreasedFunction, 1.5),
    ("CYP2C9", "rs1799853", "*2", ImpactCategory::ReducedFunction, 0.5),
    ("CYP2C9", "rs1057910", "*3", ImpactCategory::NoFunction, 0.0),
    ("CYP2C9", "rs28371686", "*5", ImpactCategory::ReducedFunction, 0.5),
    ("CYP2C9", "rs9332131", "*6", ImpactCategory::NoFunction, 0.0),
    ("CYP2C9", "rs7900194", "*8", ImpactCategory::ReducedFunction, 0.5),
    ("CYP2C9", "rs28371685", "*11", ImpactCategory::ReducedFunction, 0.5),
];

const DEFAULT_STRUCTURAL: &[(&str, StructuralKind, &str)] = &[
    ("CYP2D6", StructuralKind::Deletion, "*5"),
    ("CYP2D6", StructuralKind::Duplication, "xN"),
    ("CYP2C19", StructuralKind::Deletion, "DEL"),
    ("CYP2C19", StructuralKind::Duplication, "DUP"),
    ("CYP2C9", StructuralKind::Deletion, "DEL"),
    ("CYP2C9", StructuralKind::Duplication, "DUP"),
];

impl Default for VariantCatalog {
    fn default() -> Self {
        let variants: Vec<CatalogVariant> = DEFAULT_VARIANTS
            .iter()
            .map(|&(gene, rsid, star_allele, impact, activity)| CatalogVariant {
                gene: gene.to_string(),
                rsid: rsid.to_string(),
                star_allele: star_allele.to_string(),
                impact,
                activity,
            })
            .collect();
        let structural: Vec<StructuralSignal> = DEFAULT_STRUCTURAL
            .iter()
            .map(|&(gene, kind, star_allele)| StructuralSignal {
                gene: gene.to_string(),
                kind,
                star_allele: star_allele.to_string(),
                identifier: None,
            })
            .collect();

        // built-in data; covered by test_default_catalog_passes_integrity_checks
        let mut index = HashMap::new();
        for (i, variant) in variants.iter().enumerate() {
            index.insert(catalog_key(&variant.gene, &variant.rsid), i);
        }
        Self {
            variants,
            structural,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Variant;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn point(gene: &str, rsid: &str, star: &str, impact: ImpactCategory, activity: f64) -> CatalogVariant {
        CatalogVariant {
            gene: gene.to_string(),
            rsid: rsid.to_string(),
            star_allele: star.to_string(),
            impact,
            activity,
        }
    }

    fn record(id: Option<&str>, alt: &str) -> ExtractedVariantRecord {
        ExtractedVariantRecord {
            variant: Variant::new("chr22".to_string(), 42_127_000, "N".to_string(), alt.to_string()),
            reference_snp_id: id.map(|s| s.to_string()),
            genotypes: BTreeMap::new(),
            copy_numbers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_catalog_passes_integrity_checks() {
        let default = VariantCatalog::default();
        let rebuilt = VariantCatalog::new(default.variants.clone(), default.structural.clone());
        assert!(rebuilt.is_ok());
        assert_eq!(default.len(), 15);
        assert_eq!(default.genes(), vec!["CYP2D6", "CYP2C19", "CYP2C9"]);
    }

    #[test]
    fn test_lookup() {
        let catalog = VariantCatalog::default();
        let hit = catalog.lookup("CYP2C9", "rs1799853").unwrap();
        assert_eq!(hit.star_allele, "*2");
        assert_eq!(hit.impact, ImpactCategory::ReducedFunction);
        assert_eq!(hit.activity, 0.5);

        assert!(catalog.lookup("cyp2c9", "RS1799853").is_some());
        // right rsID, wrong gene
        assert!(catalog.lookup("CYP2D6", "rs1799853").is_none());
        assert!(catalog.lookup("CYP2C9", "rs0").is_none());
    }

    #[test]
    fn test_rejects_ambiguous_rsid() {
        let variants = vec![
            point("CYP2C9", "rs1", "*2", ImpactCategory::ReducedFunction, 0.5),
            point("CYP2C9", "rs1", "*3", ImpactCategory::NoFunction, 0.0),
        ];
        assert!(matches!(
            VariantCatalog::new(variants, Vec::new()),
            Err(PgxError::CatalogIntegrity(_))
        ));
    }

    #[test]
    fn test_same_rsid_in_different_genes_is_allowed() {
        let variants = vec![
            point("CYP2C9", "rs1", "*2", ImpactCategory::ReducedFunction, 0.5),
            point("CYP2C19", "rs1", "*3", ImpactCategory::NoFunction, 0.0),
        ];
        assert!(VariantCatalog::new(variants, Vec::new()).is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_allele_function() {
        let variants = vec![
            point("CYP2D6", "rs1", "*4", ImpactCategory::NoFunction, 0.0),
            point("CYP2D6", "rs2", "*4", ImpactCategory::ReducedFunction, 0.5),
        ];
        assert!(VariantCatalog::new(variants, Vec::new()).is_err());
    }

    #[test]
    fn test_rejects_negative_activity() {
        let variants = vec![point("CYP2D6", "rs1", "*4", ImpactCategory::NoFunction, -1.0)];
        assert!(VariantCatalog::new(variants, Vec::new()).is_err());
    }

    #[test]
    fn test_symbolic_alt() {
        assert_eq!(symbolic_alt("<DEL>"), Some((StructuralKind::Deletion, None)));
        assert_eq!(symbolic_alt("<DUP:TANDEM>"), Some((StructuralKind::Duplication, None)));
        assert_eq!(symbolic_alt("<CN0>"), Some((StructuralKind::Deletion, Some(0))));
        assert_eq!(symbolic_alt("<CN3>"), Some((StructuralKind::Duplication, Some(3))));
        assert_eq!(symbolic_alt("<CN1>,<CN2>"), Some((StructuralKind::Duplication, Some(2))));
        assert_eq!(symbolic_alt("<CN1>"), None);
        assert_eq!(symbolic_alt("<CNV>"), Some((StructuralKind::CopyNumber, None)));
        assert_eq!(symbolic_alt("T"), None);
        assert_eq!(symbolic_alt("<INS>"), None);
    }

    #[test]
    fn test_structural_match_by_alt() {
        let catalog = VariantCatalog::default();
        let deletion = catalog.structural_match("CYP2D6", &record(None, "<DEL>")).unwrap();
        assert_eq!(deletion.kind, StructuralKind::Deletion);
        assert_eq!(deletion.star_allele, "*5");

        let duplication = catalog.structural_match("CYP2D6", &record(None, "<CN3>")).unwrap();
        assert_eq!(duplication.kind, StructuralKind::Duplication);
        assert_eq!(duplication.alt_copy_number, Some(3));

        assert!(catalog.structural_match("CYP2D6", &record(Some("rs3892097"), "A")).is_none());
    }

    #[test]
    fn test_structural_match_by_identifier() {
        let signal = StructuralSignal {
            gene: "CYP2D6".to_string(),
            kind: StructuralKind::Deletion,
            star_allele: "*5".to_string(),
            identifier: Some("CYP2D6_DEL".to_string()),
        };
        let catalog = VariantCatalog::new(Vec::new(), vec![signal]).unwrap();
        let found = catalog
            .structural_match("CYP2D6", &record(Some("CYP2D6_DEL"), "N"))
            .unwrap();
        assert_eq!(found.kind, StructuralKind::Deletion);
        assert_eq!(found.star_allele, "*5");
    }

    #[test]
    fn test_tsv_roundtrip() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "gene\trsid\tstar_allele\tkind\timpact\tactivity").unwrap();
        writeln!(temp_file, "TPMT\trs1800460\t*3B\tpoint\tno_function\t0").unwrap();
        writeln!(temp_file, "TPMT\trs1142345\t*3C\tpoint\tno_function\t0").unwrap();
        writeln!(temp_file, "TPMT\t.\tDEL\tdeletion\t\t").unwrap();

        let catalog = VariantCatalog::from_tsv(temp_file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("TPMT", "rs1142345").unwrap().star_allele, "*3C");
        assert_eq!(catalog.structural_for("TPMT").count(), 1);

        let mut out = Vec::new();
        catalog.write_tsv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("TPMT\trs1800460\t*3B\tpoint\tno_function\t0.0"));
        assert!(text.contains("TPMT\t.\tDEL\tdeletion\t\t"));
    }

    #[test]
    fn test_tsv_rejects_unknown_kind() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "gene\trsid\tstar_allele\tkind\timpact\tactivity").unwrap();
        writeln!(temp_file, "TPMT\trs1\t*2\tinversion\t\t").unwrap();
        assert!(VariantCatalog::from_tsv(temp_file.path()).is_err());
    }
}
