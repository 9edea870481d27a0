use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{anyhow, Result as AnyhowResult};
use flate2::read::MultiGzDecoder;

pub const N_SAMPLES: usize = 8;
pub const N_MARKERS: usize = 30;

pub fn run_ibdends(args: &[&str]) -> AnyhowResult<Output> {
    let exe = Path::new(env!("CARGO_BIN_EXE_ibdends"));
    assert!(exe.exists());

    let output = std::process::Command::new(exe)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?
        .wait_with_output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(anyhow!("failed to run {:?}", args.join(" ")))
    }
}

fn marker_pos(m: usize) -> i64 {
    10_000 + 1_000 * m as i64
}

fn allele(m: usize, h: usize) -> u8 {
    ((m + h) % 7 == 0) as u8
}

/// Writes a deterministic phased panel: 8 diploid samples, 30 biallelic
/// markers 1 kb apart, scattered alternate alleles.
pub fn write_test_vcf(dir: &Path) -> PathBuf {
    let fp = dir.join("panel.vcf");
    let mut body = String::from("##fileformat=VCFv4.2\n");
    body.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT");
    for s in 1..=N_SAMPLES {
        body.push_str(&format!("\tS{s}"));
    }
    body.push('\n');
    for m in 0..N_MARKERS {
        body.push_str(&format!(
            "1\t{}\t.\tA\tC\t.\tPASS\t.\tGT",
            marker_pos(m)
        ));
        for s in 0..N_SAMPLES {
            body.push_str(&format!(
                "\t{}|{}",
                allele(m, 2 * s),
                allele(m, 2 * s + 1)
            ));
        }
        body.push('\n');
    }
    std::fs::write(&fp, body).unwrap();
    fp
}

pub fn write_test_map(dir: &Path) -> PathBuf {
    let fp = dir.join("plink.map");
    let first = marker_pos(0);
    let last = marker_pos(N_MARKERS - 1);
    let body = format!("1 . 0.0 {first}\n1 . 2.9 {last}\n");
    std::fs::write(&fp, body).unwrap();
    fp
}

pub fn segment_lines(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let s1 = (i * 3) % N_SAMPLES;
            let mut s2 = (i * 5 + 2) % N_SAMPLES;
            if s1 == s2 {
                s2 = (s2 + 1) % N_SAMPLES;
            }
            let h1 = i % 2 + 1;
            let h2 = (i / 2) % 2 + 1;
            let start = 10_000 + 37 * i as i64;
            let end = 30_000 + 1_000 * (i as i64 % 9);
            format!("S{}\t{h1}\tS{}\t{h2}\t1\t{start}\t{end}", s1 + 1, s2 + 1)
        })
        .collect()
}

pub fn write_test_ibd(dir: &Path, lines: &[String]) -> PathBuf {
    let fp = dir.join("segments.ibd");
    std::fs::write(&fp, format!("{}\n", lines.join("\n"))).unwrap();
    fp
}

pub fn read_possibly_gzipped(fp: &Path) -> String {
    let fh = File::open(fp).unwrap();
    let mut buffer = String::new();
    if fp.extension().map(|e| e == "gz").unwrap_or(false) {
        MultiGzDecoder::new(fh).read_to_string(&mut buffer).unwrap();
    } else {
        let mut reader = BufReader::new(fh);
        reader.read_to_string(&mut buffer).unwrap();
    }
    buffer
}

/// Output records keyed by the echoed segment fields; the header line is
/// returned separately.
pub fn parse_output(fp: &Path) -> (String, HashMap<String, String>) {
    let content = read_possibly_gzipped(fp);
    let mut lines = content.lines();
    let header = lines.next().expect("output missing header").to_string();
    let mut records = HashMap::new();
    for line in lines {
        let fields = line.split('\t').collect::<Vec<&str>>();
        assert!(fields.len() >= 7, "short record {line}");
        let key = fields[..7].join("\t");
        let prior = records.insert(key, line.to_string());
        assert!(prior.is_none(), "duplicate segment record {line}");
    }
    (header, records)
}

#[allow(dead_code)]
pub fn read_lines(fp: &Path) -> Vec<String> {
    BufReader::new(File::open(fp).unwrap())
        .lines()
        .map(|l| l.unwrap())
        .collect()
}
