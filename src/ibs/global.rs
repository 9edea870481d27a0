use anyhow::bail;
use indicatif::ParallelProgressIterator;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::markers::MarkerFrame;
use crate::util::get_master_progress_bar;

/// Outlier-filter settings for the pooled one-sided IBS length sample.
#[derive(Debug, Clone, Copy)]
pub struct GlobalIbsParams {
    pub n_positions: usize,
    pub n_segments: usize,
    pub trim_quantile: f64,
    pub trim_factor: f64,
}

/// Empirical distribution of one-sided IBS run lengths, in Morgans, pooled
/// over random foci and random haplotype pairs.
pub struct GlobalIbsProbs {
    lengths: Vec<f64>,
}

impl GlobalIbsProbs {
    pub fn from_frame(
        frame: &MarkerFrame,
        params: &GlobalIbsParams,
        seed: u64,
    ) -> anyhow::Result<GlobalIbsProbs> {
        let morgan = frame.fwd_morgan();
        let first = morgan[0];
        let last = morgan[frame.n_markers() - 1];
        if !(last > first) {
            bail!("chromosome spans no genetic distance");
        }
        let mid = 0.5 * (first + last);

        // one RNG per focus, seeded from its index, so the sample is
        // identical for any rayon schedule
        let pb = get_master_progress_bar(params.n_positions);
        pb.set_message("sampled foci");
        let per_position = (0..params.n_positions)
            .into_par_iter()
            .progress_with(pb)
            .map(|i| {
                let mut rng =
                    StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let focus = rng.gen_range(first..last);
                let mut lengths = Vec::with_capacity(params.n_segments);
                for _ in 0..params.n_segments {
                    let (h1, h2) = distinct_pair(&mut rng, frame.n_haps());
                    lengths.push(one_sided_length(
                        frame,
                        focus,
                        focus < mid,
                        h1,
                        h2,
                    ));
                }
                lengths.sort_by(|a, b| a.total_cmp(b));
                lengths
            })
            .collect::<Vec<Vec<f64>>>();

        let probe_idx = ((params.trim_quantile * params.n_segments as f64)
            .floor() as usize)
            .min(params.n_segments - 1);
        let mut probes = per_position
            .iter()
            .map(|lengths| lengths[probe_idx])
            .collect::<Vec<f64>>();
        probes.sort_by(|a, b| a.total_cmp(b));
        let median = probes[probes.len() / 2];
        let cutoff = params.trim_factor * median;

        let mut lengths = Vec::new();
        let mut n_dropped = 0usize;
        for position_lengths in per_position {
            if position_lengths[probe_idx] > cutoff {
                n_dropped += 1;
            } else {
                lengths.extend_from_slice(&position_lengths);
            }
        }
        lengths.sort_by(|a, b| a.total_cmp(b));
        debug!(
            "sampled {} one-sided ibs lengths, dropped {n_dropped} outlier \
             positions",
            lengths.len()
        );
        if lengths.len() < 2 {
            bail!("too few one-sided ibs lengths survived outlier filtering");
        }
        Ok(GlobalIbsProbs { lengths })
    }

    /// Fraction of sampled lengths at or below `x`. The rank is clamped to
    /// `[1, n - 1]` so the result is never exactly 0 or 1.
    pub fn cdf(&self, x: f64) -> f64 {
        let n = self.lengths.len();
        let rank = self.lengths.partition_point(|&l| l <= x).clamp(1, n - 1);
        rank as f64 / n as f64
    }

    pub fn n_lengths(&self) -> usize {
        self.lengths.len()
    }
}

fn distinct_pair(rng: &mut StdRng, n_haps: usize) -> (usize, usize) {
    loop {
        let h1 = rng.gen_range(0..n_haps);
        let h2 = rng.gen_range(0..n_haps);
        if h1 != h2 {
            return (h1, h2);
        }
    }
}

/// Morgan distance from `focus` to the nearest discordance between the two
/// haplotypes in the chosen direction, or to the terminal marker when the
/// pair stays IBS.
fn one_sided_length(
    frame: &MarkerFrame,
    focus: f64,
    forward: bool,
    h1: usize,
    h2: usize,
) -> f64 {
    let morgan = frame.fwd_morgan();
    let n = frame.n_markers();
    if forward {
        let start = morgan.partition_point(|&g| g < focus);
        for m in start..n {
            if frame.allele(m, h1) != frame.allele(m, h2) {
                return morgan[m] - focus;
            }
        }
        morgan[n - 1] - focus
    } else {
        let end = morgan.partition_point(|&g| g <= focus);
        for m in (0..end).rev() {
            if frame.allele(m, h1) != frame.allele(m, h2) {
                return focus - morgan[m];
            }
        }
        focus - morgan[0]
    }
}
