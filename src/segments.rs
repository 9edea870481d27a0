use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::errs::{EndsError, EndsResult};

/// One candidate IBD segment between two haplotypes on the analysis
/// chromosome, with positions clamped to the marker range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedSegment {
    pub hap1: usize,
    pub hap2: usize,
    pub start: i64,
    pub incl_end: i64,
}

impl PartialOrd for SharedSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SharedSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.hap1, self.hap2, self.start, self.incl_end).cmp(&(
            other.hap1,
            other.hap2,
            other.start,
            other.incl_end,
        ))
    }
}

/// Stable digest of a segment, XORed with the user seed to give every
/// segment its own RNG stream independent of worker scheduling.
pub fn segment_hash(seg: &SharedSegment) -> u64 {
    let mut hasher = FxHasher::default();
    seg.hash(&mut hasher);
    hasher.finish()
}

/// Parses whitespace-delimited segment records
/// `sample1 hap1 sample2 hap2 chrom start inclEnd [ignored...]`.
pub struct SegmentParser {
    sample_to_index: FxHashMap<String, usize>,
    chrom: String,
    first_base: i64,
    last_base: i64,
}

impl SegmentParser {
    pub fn new(
        samples: &[String],
        chrom: &str,
        first_base: i64,
        last_base: i64,
    ) -> Self {
        let sample_to_index = samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect::<FxHashMap<String, usize>>();
        Self {
            sample_to_index,
            chrom: chrom.to_string(),
            first_base,
            last_base,
        }
    }

    fn hap_index(&self, sample: &str, hap_field: &str) -> EndsResult<usize> {
        let sample_index = *self
            .sample_to_index
            .get(sample)
            .ok_or_else(|| EndsError::SampleMissing(sample.to_string()))?;
        let hap = match hap_field {
            "1" => 0usize,
            "2" => 1usize,
            other => {
                return Err(EndsError::InvalidHaplotype(other.to_string()))
            }
        };
        Ok(sample_index * 2 + hap)
    }

    pub fn parse(&self, line: &str) -> EndsResult<SharedSegment> {
        let fields = line.split_ascii_whitespace().collect::<Vec<&str>>();
        if fields.len() < 7 {
            return Err(EndsError::TruncatedSegmentRecord(fields.len()));
        }
        if fields[4] != self.chrom {
            return Err(EndsError::ChromMissing(fields[4].to_string()));
        }
        let hap1 = self.hap_index(fields[0], fields[1])?;
        let hap2 = self.hap_index(fields[2], fields[3])?;
        let start = fields[5]
            .parse::<i64>()
            .map_err(|_| EndsError::InvalidIntegerField(fields[5].to_string()))?;
        let incl_end = fields[6]
            .parse::<i64>()
            .map_err(|_| EndsError::InvalidIntegerField(fields[6].to_string()))?;
        if start > incl_end {
            return Err(EndsError::InvalidSegmentInterval {
                start,
                end: incl_end,
            });
        }
        Ok(SharedSegment {
            hap1,
            hap2,
            start: start.clamp(self.first_base, self.last_base),
            incl_end: incl_end.clamp(self.first_base, self.last_base),
        })
    }
}
