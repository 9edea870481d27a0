use indicatif::ParallelProgressIterator;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::errs::{EndsError, EndsResult};
use crate::markers::MarkerFrame;
use crate::util::get_master_progress_bar;

/// Largest permitted haplotype subsample. Keeps the ordered pair count
/// N·(N−1) below 2^31 so the count table interoperates with 32-bit
/// consumers.
pub const MAX_LOCAL_HAPS: usize = 40_000;

/// Per-start IBS survival counts over a seeded haplotype subsample.
///
/// `entry(s, k)` is the number of ordered pairs, among the N sampled
/// haplotypes, whose alleles agree on every marker in `[s, s + k]`. Each
/// start row is truncated once the surviving count would drop below
/// `ceil((1 - max_local_cdf) · N·(N−1))`. Rows are stored in one flat
/// buffer behind an offset vector.
pub struct IbsCounts {
    n_haps: usize,
    n_pairs: i64,
    offsets: Vec<usize>,
    entries: Vec<i64>,
}

struct ClassScratch {
    class_of: Vec<u32>,
    key_class: Vec<i32>,
    touched: Vec<usize>,
    sizes: Vec<i64>,
}

impl ClassScratch {
    fn new(n_haps: usize, max_alleles: u8) -> Self {
        Self {
            class_of: vec![0u32; n_haps],
            key_class: vec![-1i32; n_haps * max_alleles as usize],
            touched: Vec::with_capacity(n_haps),
            sizes: vec![0i64; n_haps],
        }
    }
}

impl IbsCounts {
    /// Builds the forward count table from a seeded subsample of up to
    /// `local_haps` haplotypes.
    pub fn from_frame(
        frame: &MarkerFrame,
        local_haps: usize,
        max_local_cdf: f64,
        seed: u64,
    ) -> EndsResult<IbsCounts> {
        let n_total = frame.n_haps();
        let local_haps = local_haps.min(MAX_LOCAL_HAPS);
        let sampled = if n_total <= local_haps {
            (0..n_total).collect::<Vec<usize>>()
        } else {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked =
                rand::seq::index::sample(&mut rng, n_total, local_haps)
                    .into_vec();
            picked.sort_unstable();
            picked
        };
        let n = sampled.len();
        if n < 2 {
            return Err(EndsError::TooFewHaplotypes(n));
        }
        let n_pairs = (n as i64) * (n as i64 - 1);
        if n_pairs > i32::MAX as i64 {
            return Err(EndsError::PairCountOverflow(n));
        }
        let threshold = ((1.0 - max_local_cdf) * n_pairs as f64).ceil() as i64;
        debug!(
            "counting ibs pairs over {n} haplotypes, truncating below \
             {threshold} of {n_pairs} pairs"
        );

        let n_markers = frame.n_markers();
        let max_alleles = frame.max_alleles();
        let pb = get_master_progress_bar(n_markers);
        pb.set_message("ibs count rows");
        let rows = (0..n_markers)
            .into_par_iter()
            .progress_with(pb)
            .map_init(
                || ClassScratch::new(n, max_alleles),
                |scratch, s| {
                    start_row(frame, &sampled, s, n_pairs, threshold, scratch)
                },
            )
            .collect::<Vec<Vec<i64>>>();

        let mut offsets = Vec::with_capacity(n_markers + 1);
        offsets.push(0usize);
        let mut entries =
            Vec::with_capacity(rows.iter().map(|r| r.len()).sum());
        for row in rows {
            entries.extend_from_slice(&row);
            offsets.push(entries.len());
        }
        Ok(IbsCounts { n_haps: n, n_pairs, offsets, entries })
    }

    /// Derives the reverse-orientation table without rescanning alleles:
    /// agreement on the reversed range `[r, r + k]` is agreement on the
    /// forward range `[m - 1 - r - k, m - 1 - r]`.
    pub fn reversed(&self) -> IbsCounts {
        let m = self.n_markers();
        let mut offsets = Vec::with_capacity(m + 1);
        offsets.push(0usize);
        let mut entries = Vec::with_capacity(self.entries.len());
        for r in 0..m {
            let e = m - 1 - r;
            let mut k = 0usize;
            while k <= e {
                let s = e - k;
                if self.row_len(s) <= k {
                    break;
                }
                entries.push(self.entry(s, k));
                k += 1;
            }
            offsets.push(entries.len());
        }
        IbsCounts {
            n_haps: self.n_haps,
            n_pairs: self.n_pairs,
            offsets,
            entries,
        }
    }

    pub fn n_markers(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    /// Ordered pair count N·(N−1).
    pub fn n_pairs(&self) -> i64 {
        self.n_pairs
    }

    #[inline]
    pub fn row_len(&self, start: usize) -> usize {
        self.offsets[start + 1] - self.offsets[start]
    }

    /// Exclusive end marker of the row at `start`.
    pub fn end(&self, start: usize) -> usize {
        start + self.row_len(start)
    }

    #[inline]
    pub fn entry(&self, start: usize, offset: usize) -> i64 {
        self.entries[self.offsets[start] + offset]
    }
}

fn start_row(
    frame: &MarkerFrame,
    sampled: &[usize],
    start: usize,
    n_pairs: i64,
    threshold: i64,
    scratch: &mut ClassScratch,
) -> Vec<i64> {
    let n = sampled.len();
    scratch.class_of[..n].fill(0);
    let mut pairs = n_pairs;
    let mut row = Vec::new();
    for m in start..frame.n_markers() {
        if frame.is_monomorphic(m) {
            // no refinement, but the row advances so offsets stay aligned
            // with marker indices
            row.push(pairs);
            continue;
        }
        let n_alleles = frame.n_alleles(m) as u32;
        let mut next_class = 0u32;
        for (h, &hap) in sampled.iter().enumerate() {
            let key = (scratch.class_of[h] * n_alleles
                + frame.allele(m, hap) as u32) as usize;
            if scratch.key_class[key] < 0 {
                scratch.key_class[key] = next_class as i32;
                scratch.touched.push(key);
                next_class += 1;
            }
            scratch.class_of[h] = scratch.key_class[key] as u32;
        }
        for key in scratch.touched.drain(..) {
            scratch.key_class[key] = -1;
        }
        for h in 0..n {
            scratch.sizes[scratch.class_of[h] as usize] += 1;
        }
        pairs = scratch.sizes[..next_class as usize]
            .iter()
            .map(|&c| c * (c - 1))
            .sum::<i64>();
        scratch.sizes[..next_class as usize].fill(0);
        if pairs < threshold {
            break;
        }
        row.push(pairs);
    }
    row
}
