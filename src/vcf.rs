use std::io::BufRead;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use itertools::Itertools;
use log::{debug, info};

use crate::errs::EndsResult;
use crate::genetic_map::GeneticMap;
use crate::markers::MarkerFrame;
use crate::util::open_text_reader;

/// Phased, non-missing haplotype columns decoded from a VCF, before genetic
/// positions are attached.
pub struct RawPanel {
    pub chrom: String,
    pub samples: Vec<String>,
    positions: Vec<i64>,
    n_alleles: Vec<u8>,
    alleles: Vec<Vec<u8>>,
}

impl RawPanel {
    pub fn n_markers(&self) -> usize {
        self.positions.len()
    }

    /// Attaches Morgan positions from the genetic map and finalises the
    /// shared marker frame.
    pub fn into_frame(self, map: &GeneticMap) -> EndsResult<MarkerFrame> {
        MarkerFrame::new(
            self.chrom,
            self.positions,
            self.n_alleles,
            self.alleles,
            map,
        )
    }
}

/// Decodes the GT columns of a phased VCF (plain or gzip). Restricts to
/// `chrom` when given, otherwise the file must contain a single chromosome.
/// Markers with minor allele frequency below `min_maf` are dropped.
pub fn read_phased_vcf(
    path: &Path,
    chrom: Option<&str>,
    min_maf: f64,
) -> anyhow::Result<RawPanel> {
    let reader = open_text_reader(path)?;
    let mut samples: Option<Vec<String>> = None;
    let mut found_chrom: Option<String> = None;
    let mut positions = Vec::new();
    let mut n_alleles = Vec::new();
    let mut alleles: Vec<Vec<u8>> = Vec::new();
    let mut n_maf_filtered = 0usize;

    for (i, line) in reader.lines().enumerate() {
        let line = line.context("failed to read VCF")?;
        if line.starts_with("##") {
            continue;
        }
        if line.starts_with('#') {
            let fields = line.split('\t').collect::<Vec<&str>>();
            if fields.len() < 10 {
                bail!("VCF header has no sample columns");
            }
            samples =
                Some(fields[9..].iter().map(|s| s.to_string()).collect());
            continue;
        }
        let samples = samples
            .as_ref()
            .ok_or_else(|| anyhow!("VCF record before #CHROM header"))?;
        let fields = line.split('\t').collect::<Vec<&str>>();
        if fields.len() != samples.len() + 9 {
            bail!(
                "VCF line {} has {} columns, expected {}",
                i + 1,
                fields.len(),
                samples.len() + 9
            );
        }
        let record_chrom = fields[0];
        match (chrom, found_chrom.as_deref()) {
            (Some(target), _) => {
                if record_chrom != target {
                    continue;
                }
            }
            (None, Some(seen)) => {
                if record_chrom != seen {
                    bail!(
                        "VCF contains multiple chromosomes ({seen} and \
                         {record_chrom}), use the chrom option to pick one"
                    );
                }
            }
            (None, None) => {}
        }
        if found_chrom.is_none() {
            found_chrom = Some(record_chrom.to_string());
        }
        let pos = fields[1]
            .parse::<i64>()
            .context(format!("failed to parse POS {}", fields[1]))?;
        let n_alt =
            if fields[4] == "." { 0 } else { fields[4].split(',').count() };
        let marker_alleles = (1 + n_alt) as u8;
        if !fields[8].split(':').next().map(|f| f == "GT").unwrap_or(false) {
            bail!("VCF line {}: GT must be the first FORMAT field", i + 1);
        }

        let mut row = Vec::with_capacity(samples.len() * 2);
        for raw in fields[9..].iter() {
            let gt = raw.split(':').next().unwrap_or(raw);
            let (a1, a2) = gt.split('|').collect_tuple().ok_or_else(|| {
                anyhow!(
                    "VCF line {}: genotype {gt} is not phased and diploid",
                    i + 1
                )
            })?;
            for a in [a1, a2] {
                let allele = a.parse::<u8>().context(format!(
                    "VCF line {}: failed to parse allele {a}",
                    i + 1
                ))?;
                if allele >= marker_alleles {
                    bail!(
                        "VCF line {}: allele {allele} out of range for \
                         {marker_alleles} alleles",
                        i + 1
                    );
                }
                row.push(allele);
            }
        }

        if min_maf > 0.0 && minor_allele_freq(&row, marker_alleles) < min_maf
        {
            n_maf_filtered += 1;
            continue;
        }
        positions.push(pos);
        n_alleles.push(marker_alleles);
        alleles.push(row);
    }

    let samples = samples.ok_or_else(|| anyhow!("VCF has no header line"))?;
    let chrom = found_chrom.ok_or_else(|| {
        anyhow!("VCF has no records for the target chromosome")
    })?;
    if n_maf_filtered > 0 {
        debug!(
            "dropped {n_maf_filtered} markers below the minor allele \
             frequency threshold"
        );
    }
    info!(
        "read {} markers for {} haplotypes on chromosome {chrom}",
        positions.len(),
        samples.len() * 2,
    );
    Ok(RawPanel { chrom, samples, positions, n_alleles, alleles })
}

/// One minus the highest allele frequency, zero for a monomorphic column.
fn minor_allele_freq(row: &[u8], n_alleles: u8) -> f64 {
    let mut counts = vec![0usize; n_alleles.max(1) as usize];
    for &a in row {
        counts[a as usize] += 1;
    }
    let max_count = counts.iter().copied().max().unwrap_or(0);
    1.0 - max_count as f64 / row.len() as f64
}

#[cfg(test)]
mod vcf_tests {
    use assert_approx_eq::assert_approx_eq;

    use super::{minor_allele_freq, read_phased_vcf};
    use crate::genetic_map::GeneticMap;

    fn write_vcf(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let fp = tmp.path().join("panel.vcf");
        let header = "##fileformat=VCFv4.2\n\
            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n";
        std::fs::write(&fp, format!("{header}{body}")).unwrap();
        (tmp, fp)
    }

    fn test_map() -> GeneticMap {
        GeneticMap::new(vec![100, 500], vec![0.0, 4.0]).unwrap()
    }

    #[test]
    fn test_read_phased_records() {
        let (_tmp, fp) = write_vcf(
            "1\t100\t.\tA\tC\t.\tPASS\t.\tGT\t0|1\t1|1\n\
             1\t200\t.\tG\tT\t.\tPASS\t.\tGT:DP\t0|0:9\t1|0:7\n",
        );
        let panel = read_phased_vcf(&fp, None, 0.0).unwrap();
        assert_eq!(panel.samples, vec!["S1".to_string(), "S2".to_string()]);
        assert_eq!(panel.n_markers(), 2);
        let frame = panel.into_frame(&test_map()).unwrap();
        assert_eq!(frame.n_haps(), 4);
        assert_eq!(frame.allele(0, 0), 0);
        assert_eq!(frame.allele(0, 1), 1);
        assert_eq!(frame.allele(1, 2), 1);
        assert_eq!(frame.allele(1, 3), 0);
    }

    #[test]
    fn test_unphased_rejected() {
        let (_tmp, fp) =
            write_vcf("1\t100\t.\tA\tC\t.\tPASS\t.\tGT\t0/1\t1|1\n");
        assert!(read_phased_vcf(&fp, None, 0.0).is_err());
    }

    #[test]
    fn test_multiple_chromosomes_rejected_without_filter() {
        let body = "1\t100\t.\tA\tC\t.\tPASS\t.\tGT\t0|1\t1|1\n\
                    2\t200\t.\tG\tT\t.\tPASS\t.\tGT\t0|0\t1|0\n";
        let (_tmp, fp) = write_vcf(body);
        assert!(read_phased_vcf(&fp, None, 0.0).is_err());
        let panel = read_phased_vcf(&fp, Some("2"), 0.0).unwrap();
        assert_eq!(panel.n_markers(), 1);
        assert_eq!(panel.chrom, "2");
    }

    #[test]
    fn test_maf_filter() {
        let body = "1\t100\t.\tA\tC\t.\tPASS\t.\tGT\t0|0\t0|0\n\
                    1\t200\t.\tG\tT\t.\tPASS\t.\tGT\t0|1\t0|0\n";
        let (_tmp, fp) = write_vcf(body);
        let unfiltered = read_phased_vcf(&fp, None, 0.0).unwrap();
        assert_eq!(unfiltered.n_markers(), 2);
        let filtered = read_phased_vcf(&fp, None, 0.2).unwrap();
        assert_eq!(filtered.n_markers(), 1);
        assert_approx_eq!(minor_allele_freq(&[0, 1, 0, 0], 2), 0.25);
        assert_approx_eq!(minor_allele_freq(&[0, 0, 0, 0], 2), 0.0);
    }
}
