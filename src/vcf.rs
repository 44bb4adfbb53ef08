//! VCF region extraction
//!
//! Streams a plain or gzip/BGZF-compressed VCF and yields only the records
//! inside one gene region. When a tabix or CSI index sits next to the file
//! the region is fetched directly instead.

use crate::regions::{normalize_chromosome, GeneRegion, GeneRegionTable};
use crate::{ExtractedVariantRecord, GenotypeCall, PgxError, PgxResult, Variant};
use flate2::read::MultiGzDecoder;
use rust_htslib::tbx::{self, Read as TbxRead};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Column indices for VCF parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfColumnIndices {
    pub chrom: usize,
    pub pos: usize,
    pub id: usize,
    pub ref_allele: usize,
    pub alt: usize,
    pub qual: usize,
    pub filter: usize,
    pub info: usize,
    pub format: Option<usize>,
    pub samples_start: usize,
}

impl VcfColumnIndices {
    pub fn from_header(header_line: &str) -> PgxResult<Self> {
        let fields: Vec<&str> = header_line.trim().split('\t').collect();

        let find = |names: &[&str]| -> PgxResult<usize> {
            fields
                .iter()
                .position(|col| names.contains(col))
                .ok_or_else(|| {
                    PgxError::HeaderParse(format!("{} column not found in VCF header", names[0]))
                })
        };

        let chrom = find(&["#CHROM", "CHROM"])?;
        let pos = find(&["POS"])?;
        let id = find(&["ID"])?;
        let ref_allele = find(&["REF"])?;
        let alt = find(&["ALT"])?;
        let qual = find(&["QUAL"])?;
        let filter = find(&["FILTER"])?;
        let info = find(&["INFO"])?;
        let format = fields.iter().position(|&col| col == "FORMAT");
        let samples_start = format.map(|f| f + 1).unwrap_or(fields.len());

        Ok(VcfColumnIndices {
            chrom,
            pos,
            id,
            ref_allele,
            alt,
            qual,
            filter,
            info,
            format,
            samples_start,
        })
    }

    /// Minimum number of tab-separated fields a data row must have
    fn required_fields(&self) -> usize {
        [
            self.chrom,
            self.pos,
            self.id,
            self.ref_allele,
            self.alt,
            self.info,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// The `#CHROM` header line of a VCF, parsed
#[derive(Debug, Clone)]
pub struct VcfHeader {
    pub columns: VcfColumnIndices,
    pub samples: Vec<String>,
}

impl VcfHeader {
    pub fn parse(header_line: &str) -> PgxResult<Self> {
        let columns = VcfColumnIndices::from_header(header_line)?;
        let samples = header_line
            .trim()
            .split('\t')
            .skip(columns.samples_start)
            .map(|s| s.to_string())
            .collect();
        Ok(Self { columns, samples })
    }

    /// Map the requested samples to their column positions.
    /// Without a filter every sample is selected.
    fn select(&self, sample_filter: Option<&BTreeSet<String>>) -> PgxResult<Vec<(usize, String)>> {
        let selected: Vec<(usize, String)> = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, name)| sample_filter.map_or(true, |f| f.contains(*name)))
            .map(|(i, name)| (self.columns.samples_start + i, name.clone()))
            .collect();

        if let Some(filter) = sample_filter {
            for wanted in filter {
                if !self.samples.contains(wanted) {
                    return Err(PgxError::SampleNotFound(wanted.clone()));
                }
            }
        }

        Ok(selected)
    }
}

/// VCF reader positioned just after the `#CHROM` header line
pub struct VcfReader {
    path: PathBuf,
    reader: Box<dyn BufRead>,
    header: VcfHeader,
}

impl VcfReader {
    pub fn new<P: AsRef<Path>>(path: P) -> PgxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = open_maybe_gz(&path)?;

        let mut buf = Vec::new();
        let header = loop {
            let line = match read_line_lossy(&mut *reader, &mut buf)
                .map_err(|e| PgxError::FileAccess(format!("{}: {}", path.display(), e)))?
            {
                Some(line) => line,
                None => {
                    return Err(PgxError::HeaderParse(format!(
                        "{}: no #CHROM header line found",
                        path.display()
                    )))
                }
            };
            if line.starts_with("##") {
                continue;
            }
            if line.starts_with('#') {
                break VcfHeader::parse(line.trim_end())?;
            }
            return Err(PgxError::HeaderParse(format!(
                "{}: data found before the #CHROM header line",
                path.display()
            )));
        };

        Ok(VcfReader {
            path,
            reader,
            header,
        })
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn samples(&self) -> &[String] {
        &self.header.samples
    }

    /// Iterate over the records inside `region`, stopping early once the
    /// coordinate-sorted stream has moved past it.
    pub fn region_records<'a>(
        &'a mut self,
        region: &'a GeneRegion,
        sample_filter: Option<&BTreeSet<String>>,
    ) -> PgxResult<RegionRecords<'a>> {
        let selected = self.header.select(sample_filter)?;
        Ok(RegionRecords {
            path: &self.path,
            reader: &mut self.reader,
            columns: &self.header.columns,
            region,
            selected,
            target_chrom: normalize_chromosome(&region.chrom),
            entered: false,
            done: false,
            skipped: 0,
        })
    }

    /// Chromosome of the first data row, if there is one
    pub fn first_chromosome(&mut self) -> PgxResult<Option<String>> {
        let mut buf = Vec::new();
        loop {
            let line = match read_line_lossy(&mut *self.reader, &mut buf)
                .map_err(|e| PgxError::FileAccess(format!("{}: {}", self.path.display(), e)))?
            {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let chrom = line.split('\t').nth(self.header.columns.chrom).map(|c| c.trim().to_string());
            return Ok(chrom);
        }
    }
}

/// Lazy iterator over the records of one gene region
pub struct RegionRecords<'a> {
    path: &'a Path,
    reader: &'a mut Box<dyn BufRead>,
    columns: &'a VcfColumnIndices,
    region: &'a GeneRegion,
    selected: Vec<(usize, String)>,
    target_chrom: String,
    entered: bool,
    done: bool,
    skipped: usize,
}

impl<'a> RegionRecords<'a> {
    /// Number of malformed data rows skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'a> Iterator for RegionRecords<'a> {
    type Item = PgxResult<ExtractedVariantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = Vec::new();
        loop {
            match read_line_lossy(&mut **self.reader, &mut buf) {
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Ok(Some(line)) => {
                    let line = line.trim_end();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }

                    match locate(line, self.columns, self.region, &self.target_chrom) {
                        Location::Malformed(reason) => {
                            self.skipped += 1;
                            log::warn!("Skipping malformed VCF row in {}: {}", self.path.display(), reason);
                        }
                        Location::OtherChromosome => {
                            if self.entered {
                                self.done = true;
                                return None;
                            }
                        }
                        Location::Before => self.entered = true,
                        Location::After => {
                            self.done = true;
                            return None;
                        }
                        Location::Inside => {
                            self.entered = true;
                            match parse_record(line, self.columns, &self.selected) {
                                Ok(record) => return Some(Ok(record)),
                                Err(reason) => {
                                    self.skipped += 1;
                                    log::warn!(
                                        "Skipping malformed VCF row in {}: {}",
                                        self.path.display(),
                                        reason
                                    );
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(PgxError::FileAccess(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    ))));
                }
            }
        }
    }
}

/// Where a data row lies relative to the target region
enum Location {
    Malformed(String),
    OtherChromosome,
    Before,
    Inside,
    After,
}

fn locate(line: &str, columns: &VcfColumnIndices, region: &GeneRegion, target_chrom: &str) -> Location {
    let mut chrom = None;
    let mut pos = None;
    for (i, field) in line.split('\t').enumerate() {
        if i == columns.chrom {
            chrom = Some(field);
        }
        if i == columns.pos {
            pos = Some(field);
        }
        if chrom.is_some() && pos.is_some() {
            break;
        }
    }

    let (chrom, pos) = match (chrom, pos) {
        (Some(c), Some(p)) => (c, p),
        _ => return Location::Malformed("missing CHROM or POS column".to_string()),
    };

    if normalize_chromosome(chrom) != target_chrom {
        return Location::OtherChromosome;
    }

    match pos.trim().parse::<u32>() {
        Ok(p) => match region.position_of(p) {
            Ordering::Less => Location::Before,
            Ordering::Equal => Location::Inside,
            Ordering::Greater => Location::After,
        },
        Err(_) => Location::Malformed(format!("invalid position '{}'", pos)),
    }
}

/// Parse a data row that is already known to lie inside the region
fn parse_record(
    line: &str,
    columns: &VcfColumnIndices,
    selected: &[(usize, String)],
) -> Result<ExtractedVariantRecord, String> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() < columns.required_fields() {
        return Err(format!(
            "expected at least {} columns, found {}",
            columns.required_fields(),
            fields.len()
        ));
    }

    let pos = fields[columns.pos]
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid position '{}'", fields[columns.pos]))?;
    let variant = Variant::new(
        fields[columns.chrom].to_string(),
        pos,
        fields[columns.ref_allele].to_string(),
        fields[columns.alt].to_string(),
    );

    let reference_snp_id = parse_variant_id(fields[columns.id]);

    let format_keys: Vec<&str> = columns
        .format
        .and_then(|f| fields.get(f))
        .map(|f| f.split(':').collect())
        .unwrap_or_default();
    let gt_index = format_keys.iter().position(|&k| k == "GT").unwrap_or(0);
    let cn_index = format_keys.iter().position(|&k| k == "CN");

    let mut genotypes = BTreeMap::new();
    let mut copy_numbers = BTreeMap::new();

    for (column, sample) in selected {
        let value = fields.get(*column).copied().unwrap_or(".");
        let subfields: Vec<&str> = value.split(':').collect();

        let call = subfields
            .get(gt_index)
            .map(|gt| GenotypeCall::parse(gt))
            .unwrap_or(GenotypeCall::Missing);
        genotypes.insert(sample.clone(), call);

        if let Some(cn) = cn_index
            .and_then(|i| subfields.get(i))
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            copy_numbers.insert(sample.clone(), cn);
        }
    }

    Ok(ExtractedVariantRecord {
        variant,
        reference_snp_id,
        genotypes,
        copy_numbers,
    })
}

/// Pick the identifier to look up in the catalog from a VCF ID column.
/// Multiple IDs are `;`-separated; a dbSNP ID is preferred.
fn parse_variant_id(field: &str) -> Option<String> {
    let ids: Vec<&str> = field
        .split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    ids.iter()
        .find(|id| id.to_ascii_lowercase().starts_with("rs"))
        .or_else(|| ids.first())
        .map(|id| id.to_string())
}

/// Read one line as text. Bytes that are not valid UTF-8 are replaced
/// rather than failing the read, so a stray byte only affects its own row.
fn read_line_lossy(reader: &mut dyn BufRead, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Check if a file is gzip compressed (this includes BGZF)
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> PgxResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(PgxError::Io(e)),
    }
}

/// Open a file, transparently decompressing gzip and BGZF input
fn open_maybe_gz(path: &Path) -> PgxResult<Box<dyn BufRead>> {
    let file = File::open(path)
        .map_err(|e| PgxError::FileAccess(format!("{}: {}", path.display(), e)))?;

    let gzipped = is_gzipped(path)
        .map_err(|e| PgxError::FileAccess(format!("{}: {}", path.display(), e)))?;

    let reader: Box<dyn BufRead> = if gzipped {
        let gz_decoder = MultiGzDecoder::new(file);
        Box::new(BufReader::new(gz_decoder))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(reader)
}

/// Tabix or CSI index next to a VCF, if present
pub fn find_index<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    let path = path.as_ref();
    ["tbi", "csi"].iter().find_map(|ext| {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        candidate.exists().then_some(candidate)
    })
}

/// Extract the records of `gene`'s region from a VCF.
///
/// Only the samples in `sample_filter` are retained (all samples when
/// `None`); a requested sample missing from the header is an error.
pub fn extract<P: AsRef<Path>>(
    path: P,
    gene: &str,
    regions: &GeneRegionTable,
    sample_filter: Option<&BTreeSet<String>>,
) -> PgxResult<Vec<ExtractedVariantRecord>> {
    let path = path.as_ref();
    let region = regions.require(gene)?;

    if find_index(path).is_some() {
        match extract_indexed(path, region, sample_filter) {
            Ok(records) => {
                log::info!(
                    "Fetched {} records for {} from indexed {}",
                    records.len(),
                    gene,
                    path.display()
                );
                return Ok(records);
            }
            Err(e @ PgxError::SampleNotFound(_)) | Err(e @ PgxError::HeaderParse(_)) => {
                return Err(e)
            }
            Err(e) => {
                log::warn!(
                    "Indexed fetch from {} failed ({}), falling back to a full scan",
                    path.display(),
                    e
                );
            }
        }
    }

    let mut reader = VcfReader::new(path)?;
    let mut records_iter = reader.region_records(region, sample_filter)?;
    let mut records = Vec::new();
    for record in &mut records_iter {
        records.push(record?);
    }

    if records_iter.skipped() > 0 {
        log::warn!(
            "Skipped {} malformed rows in the {} region of {}",
            records_iter.skipped(),
            gene,
            path.display()
        );
    }
    log::info!(
        "Extracted {} records for {} ({}:{}-{}) from {}",
        records.len(),
        gene,
        region.chrom,
        region.start,
        region.end,
        path.display()
    );

    Ok(records)
}

/// Region fetch through the tabix/CSI index
fn extract_indexed(
    path: &Path,
    region: &GeneRegion,
    sample_filter: Option<&BTreeSet<String>>,
) -> PgxResult<Vec<ExtractedVariantRecord>> {
    let mut tbx_reader = tbx::Reader::from_path(path)?;

    let header_line = tbx_reader
        .header()
        .iter()
        .rev()
        .find(|line| line.starts_with('#') && !line.starts_with("##"))
        .cloned()
        .ok_or_else(|| {
            PgxError::HeaderParse(format!("{}: no #CHROM header line found", path.display()))
        })?;
    let header = VcfHeader::parse(header_line.trim_end())?;
    let selected = header.select(sample_filter)?;

    let target = normalize_chromosome(&region.chrom);
    let seqname = match tbx_reader
        .seqnames()
        .into_iter()
        .find(|name| normalize_chromosome(name) == target)
    {
        Some(name) => name,
        None => return Ok(Vec::new()),
    };

    let tid = tbx_reader.tid(&seqname)?;
    // htslib regions are 0-based half-open
    tbx_reader.fetch(tid, u64::from(region.start - 1), u64::from(region.end))?;

    let mut records = Vec::new();
    for raw in tbx_reader.records() {
        let raw = raw?;
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end();

        match locate(line, &header.columns, region, &target) {
            Location::Inside => match parse_record(line, &header.columns, &selected) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    log::warn!("Skipping malformed VCF row in {}: {}", path.display(), reason)
                }
            },
            Location::Malformed(reason) => {
                log::warn!("Skipping malformed VCF row in {}: {}", path.display(), reason)
            }
            _ => {}
        }
    }

    Ok(records)
}

/// Sample names declared in a VCF header
pub fn read_sample_ids<P: AsRef<Path>>(path: P) -> PgxResult<Vec<String>> {
    let reader = VcfReader::new(path)?;
    Ok(reader.samples().to_vec())
}

/// Chromosome covered by a per-chromosome VCF, taken from its first data row
pub fn detect_chromosome<P: AsRef<Path>>(path: P) -> PgxResult<Option<String>> {
    let mut reader = VcfReader::new(path)?;
    reader.first_chromosome()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2";

    fn write_vcf(rows: &[&str]) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "##fileformat=VCFv4.2").unwrap();
        writeln!(temp_file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(temp_file, "{}", row).unwrap();
        }
        temp_file.flush().unwrap();
        temp_file
    }

    fn cyp2c9_rows() -> Vec<&'static str> {
        vec![
            "chr10\t94900000\trs1\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1\t1/1",
            "chr10\t94981296\trs1057910\tA\tC\t.\tPASS\t.\tGT:DP\t./.:10\t0|1:12",
            "chr10\t95000000\trs2\tG\tA\t.\tPASS\t.\tGT\t1/1\t1/1",
        ]
    }

    #[test]
    fn test_column_indices_from_header() {
        let indices = VcfColumnIndices::from_header(HEADER).unwrap();
        assert_eq!(indices.chrom, 0);
        assert_eq!(indices.alt, 4);
        assert_eq!(indices.format, Some(8));
        assert_eq!(indices.samples_start, 9);

        let header = VcfHeader::parse(HEADER).unwrap();
        assert_eq!(header.samples, vec!["S1", "S2"]);
    }

    #[test]
    fn test_header_without_required_column() {
        let result = VcfColumnIndices::from_header("#CHROM\tPOS\tREF\tALT");
        assert!(matches!(result, Err(PgxError::HeaderParse(_))));
    }

    #[test]
    fn test_extract_region() {
        let vcf = write_vcf(&cyp2c9_rows());
        let regions = GeneRegionTable::default();
        let records = extract(vcf.path(), "CYP2C9", &regions, None).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reference_snp_id.as_deref(), Some("rs1799853"));
        assert_eq!(records[0].genotype("S1"), GenotypeCall::Het);
        assert_eq!(records[0].genotype("S2"), GenotypeCall::HomAlt);
        assert_eq!(records[1].genotype("S1"), GenotypeCall::Missing);
        assert_eq!(records[1].genotype("S2"), GenotypeCall::Het);
    }

    #[test]
    fn test_extract_without_chr_prefix() {
        let rows = vec!["10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0"];
        let vcf = write_vcf(&rows);
        let records = extract(vcf.path(), "CYP2C9", &GeneRegionTable::default(), None).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_sample_filter() {
        let vcf = write_vcf(&cyp2c9_rows());
        let filter: BTreeSet<String> = ["S2".to_string()].into_iter().collect();
        let records = extract(vcf.path(), "CYP2C9", &GeneRegionTable::default(), Some(&filter)).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.genotypes.len() == 1));
        assert!(records.iter().all(|r| r.genotypes.contains_key("S2")));
    }

    #[test]
    fn test_unknown_sample_is_an_error() {
        let vcf = write_vcf(&cyp2c9_rows());
        let filter: BTreeSet<String> = ["S9".to_string()].into_iter().collect();
        let result = extract(vcf.path(), "CYP2C9", &GeneRegionTable::default(), Some(&filter));
        assert!(matches!(result, Err(PgxError::SampleNotFound(_))));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let rows = vec![
            "chr10\tnot_a_number\trs1\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr10\t94942290\trs1799853",
            "chr10\t94942291\trs1799853\tC\tT\t.\tPASS\t.\tGT\tgarbage\t0/1",
        ];
        let vcf = write_vcf(&rows);
        let records = extract(vcf.path(), "CYP2C9", &GeneRegionTable::default(), None).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].genotype("S1"), GenotypeCall::Missing);
        assert_eq!(records[0].genotype("S2"), GenotypeCall::Het);
    }

    #[test]
    fn test_malformed_rows_outside_region_do_not_abort() {
        let rows = vec![
            "chr10",
            "chr10\tnot_a_number\trs1\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr10\t99999999999\trs2\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr10\t94900000\trs3",
            "chr10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0",
        ];
        let vcf = write_vcf(&rows);
        let mut reader = VcfReader::new(vcf.path()).unwrap();
        let region = GeneRegion::new("CYP2C9", "chr10", 94_938_658, 94_990_091);
        let mut iter = reader.region_records(&region, None).unwrap();

        let record = iter.next().unwrap().unwrap();
        assert_eq!(record.variant.pos, 94_942_290);
        assert!(iter.next().is_none());
        assert_eq!(iter.skipped(), 3);
    }

    #[test]
    fn test_non_ascii_chromosome_is_skipped() {
        let rows = vec![
            "ché1\t100\trs1\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0",
        ];
        let vcf = write_vcf(&rows);
        let records = extract(vcf.path(), "CYP2C9", &GeneRegionTable::default(), None).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reference_snp_id.as_deref(), Some("rs1799853"));
    }

    #[test]
    fn test_invalid_utf8_bytes_do_not_abort() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "##fileformat=VCFv4.2").unwrap();
        writeln!(temp_file, "{}", HEADER).unwrap();
        temp_file
            .write_all(b"chr10\t94900000\trs1\tA\tG\t.\tPASS\tNOTE=caf\xe9\tGT\t0/1\t0/0\n")
            .unwrap();
        temp_file
            .write_all(b"chr10\t94942290\trs1799853\tC\tT\t.\tPASS\tNOTE=\xff\xfe\tGT\t0/1\t1/1\n")
            .unwrap();
        temp_file.flush().unwrap();

        let records = extract(temp_file.path(), "CYP2C9", &GeneRegionTable::default(), None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].genotype("S1"), GenotypeCall::Het);
        assert_eq!(records[0].genotype("S2"), GenotypeCall::HomAlt);

        assert_eq!(detect_chromosome(temp_file.path()).unwrap(), Some("chr10".to_string()));
    }

    #[test]
    fn test_oversized_copy_number_is_not_recorded() {
        let rows = vec!["chr22\t42126600\t.\tN\t<CNV>\t.\tPASS\t.\tGT:CN\t./.:99999999999\t./.:4000000000"];
        let vcf = write_vcf(&rows);
        let records = extract(vcf.path(), "CYP2D6", &GeneRegionTable::default(), None).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].copy_number("S1"), None);
        // fits a u32; the scorer decides whether it is plausible
        assert_eq!(records[0].copy_number("S2"), Some(4_000_000_000));
    }

    #[test]
    fn test_is_gzipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "##fileformat=VCFv4.2").unwrap();
        assert!(!is_gzipped(temp_file.path()).unwrap());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x1f, 0x8b]).unwrap();
        assert!(is_gzipped(temp_file.path()).unwrap());

        let empty = NamedTempFile::new().unwrap();
        assert!(!is_gzipped(empty.path()).unwrap());
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "##fileformat=VCFv4.2").unwrap();
        writeln!(temp_file, "chr10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1").unwrap();

        let result = extract(temp_file.path(), "CYP2C9", &GeneRegionTable::default(), None);
        assert!(matches!(result, Err(PgxError::HeaderParse(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = extract("/nonexistent/chr10.vcf", "CYP2C9", &GeneRegionTable::default(), None);
        assert!(matches!(result, Err(PgxError::FileAccess(_))));
    }

    #[test]
    fn test_unsupported_gene() {
        let vcf = write_vcf(&cyp2c9_rows());
        let result = extract(vcf.path(), "NAT2", &GeneRegionTable::default(), None);
        assert!(matches!(result, Err(PgxError::UnsupportedGene(_))));
    }

    #[test]
    fn test_scan_stops_after_region() {
        let mut rows = cyp2c9_rows();
        rows.push("chr10\t96000000\trs5\tG\tA\t.\tPASS\t.\tGT\t0/1\t0/1");
        let vcf = write_vcf(&rows);
        let regions = GeneRegionTable::default();
        let region = regions.get("CYP2C9").unwrap();

        let mut reader = VcfReader::new(vcf.path()).unwrap();
        let count = reader.region_records(region, None).unwrap().count();
        assert_eq!(count, 2);

        // the first row past the end stops the scan; later rows stay unread
        let mut rest = String::new();
        reader.reader.read_line(&mut rest).unwrap();
        assert!(rest.starts_with("chr10\t96000000"));
    }

    #[test]
    fn test_scan_stops_when_leaving_chromosome() {
        let rows = vec![
            "chr10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr11\t100\trs3\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0",
            "chr10\t94942291\trs4\tC\tT\t.\tPASS\t.\tGT\t0/1\t0/0",
        ];
        let vcf = write_vcf(&rows);
        let records = extract(vcf.path(), "CYP2C9", &GeneRegionTable::default(), None).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_gzipped_input() {
        let mut temp_file = NamedTempFile::new().unwrap();
        {
            let mut encoder = GzEncoder::new(temp_file.as_file_mut(), Compression::default());
            writeln!(encoder, "##fileformat=VCFv4.2").unwrap();
            writeln!(encoder, "{}", HEADER).unwrap();
            for row in cyp2c9_rows() {
                writeln!(encoder, "{}", row).unwrap();
            }
            encoder.finish().unwrap();
        }

        let records = extract(temp_file.path(), "CYP2C9", &GeneRegionTable::default(), None).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_copy_number_field() {
        let rows = vec!["chr22\t42126600\t.\tN\t<CN3>\t.\tPASS\tSVTYPE=CNV\tGT:CN\t0/1:3\t0/0:2"];
        let vcf = write_vcf(&rows);
        let records = extract(vcf.path(), "CYP2D6", &GeneRegionTable::default(), None).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reference_snp_id, None);
        assert_eq!(records[0].copy_number("S1"), Some(3));
        assert_eq!(records[0].copy_number("S2"), Some(2));
    }

    #[test]
    fn test_parse_variant_id() {
        assert_eq!(parse_variant_id("."), None);
        assert_eq!(parse_variant_id("rs123"), Some("rs123".to_string()));
        assert_eq!(parse_variant_id("COSM1;rs123"), Some("rs123".to_string()));
        assert_eq!(parse_variant_id("CYP2D6_DEL"), Some("CYP2D6_DEL".to_string()));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let vcf = write_vcf(&cyp2c9_rows());
        let regions = GeneRegionTable::default();
        let first = extract(vcf.path(), "CYP2C9", &regions, None).unwrap();
        let second = extract(vcf.path(), "CYP2C9", &regions, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_detect_chromosome_and_samples() {
        let vcf = write_vcf(&cyp2c9_rows());
        assert_eq!(detect_chromosome(vcf.path()).unwrap(), Some("chr10".to_string()));
        assert_eq!(read_sample_ids(vcf.path()).unwrap(), vec!["S1", "S2"]);

        let empty = write_vcf(&[]);
        assert_eq!(detect_chromosome(empty.path()).unwrap(), None);
    }

    #[test]
    fn test_no_index_next_to_plain_file() {
        let vcf = write_vcf(&cyp2c9_rows());
        assert!(find_index(vcf.path()).is_none());
    }

    #[test]
    fn test_indexed_fetch_matches_scan() {
        use rust_htslib::bcf::index::{self, Type};
        use rust_htslib::bgzf;

        // contigs are named without the `chr` prefix the region table uses
        let mut text = format!("##fileformat=VCFv4.2\n{}\n", HEADER);
        for row in [
            "10\t94938657\trs10\tA\tG\t.\tPASS\t.\tGT\t0/1\t0/0",
            "10\t94938658\trs11\tA\tG\t.\tPASS\t.\tGT\t1/1\t0/1",
            "10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT:CN\t0/1:2\t./.:3",
            "10\t94990091\trs12\tG\tC\t.\tPASS\t.\tGT\t0|1\t1|1",
            "10\t94990092\trs13\tT\tC\t.\tPASS\t.\tGT\t1/1\t1/1",
            "22\t42126600\t.\tN\t<DEL>\t.\tPASS\t.\tGT\t0/1\t0/0",
        ] {
            text.push_str(row);
            text.push('\n');
        }

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.vcf");
        std::fs::write(&plain, &text).unwrap();

        let compressed = dir.path().join("indexed.vcf.gz");
        {
            let mut writer = bgzf::Writer::from_path(&compressed).unwrap();
            writer.write_all(text.as_bytes()).unwrap();
        }
        index::build(compressed.as_path(), None, 1, Type::Tbx).unwrap();
        assert!(find_index(&compressed).is_some());

        let regions = GeneRegionTable::default();
        for gene in ["CYP2C9", "CYP2D6", "CYP2C19"] {
            let region = regions.require(gene).unwrap();
            let fetched = extract_indexed(&compressed, region, None).unwrap();
            let scanned = extract(&plain, gene, &regions, None).unwrap();
            assert_eq!(fetched, scanned, "{}", gene);
            assert_eq!(extract(&compressed, gene, &regions, None).unwrap(), scanned);
        }

        let fetched = extract_indexed(&compressed, regions.require("CYP2C9").unwrap(), None).unwrap();
        let positions: Vec<u32> = fetched.iter().map(|r| r.variant.pos).collect();
        assert_eq!(positions, vec![94_938_658, 94_942_290, 94_990_091]);
        assert_eq!(fetched[1].copy_number("S2"), Some(3));

        let filter: BTreeSet<String> = ["S2".to_string()].into_iter().collect();
        let fetched = extract_indexed(&compressed, regions.require("CYP2D6").unwrap(), Some(&filter)).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].genotype("S2"), GenotypeCall::HomRef);
        assert!(fetched[0].genotypes.get("S1").is_none());
    }
}
