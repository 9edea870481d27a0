use std::sync::Arc;

use crate::ibs::counts::IbsCounts;
use crate::ibs::global::GlobalIbsProbs;
use crate::markers::{MarkerFrame, Orientation};

/// Per-(start, end) probability that a random haplotype pair is IBS on
/// `[start, end)` and discordant at `end`.
///
/// Short spans come from the [`IbsCounts`] table on a +1-smoothed grid;
/// spans past a row's truncation horizon fall back to the pooled
/// [`GlobalIbsProbs`] length distribution.
pub struct IbsLengthProbs {
    offsets: Vec<usize>,
    probs: Vec<f32>,
    morgan: Vec<f64>,
    global: Arc<GlobalIbsProbs>,
}

impl IbsLengthProbs {
    pub fn new(
        frame: &MarkerFrame,
        orientation: Orientation,
        counts: &IbsCounts,
        global: Arc<GlobalIbsProbs>,
    ) -> IbsLengthProbs {
        let n_markers = counts.n_markers();
        let n_pairs = counts.n_pairs();
        let denom = 1.0 / (n_pairs + 1) as f64;
        let mut offsets = Vec::with_capacity(n_markers + 1);
        offsets.push(0usize);
        let mut probs = Vec::with_capacity(counts.end(0).max(n_markers));
        for s in 0..n_markers {
            let row_len = counts.row_len(s);
            let mut last_pairs = n_pairs;
            for k in 0..row_len {
                let c = counts.entry(s, k);
                probs.push(((last_pairs - c + 1) as f64 * denom) as f32);
                last_pairs = c;
            }
            if s + row_len == n_markers {
                // the pair can stay IBS through the end of the chromosome
                probs.push(((last_pairs + 1) as f64 * denom) as f32);
            }
            offsets.push(probs.len());
        }
        let view = frame.oriented(orientation);
        let morgan =
            (0..n_markers).map(|m| view.morgan(m)).collect::<Vec<f64>>();
        IbsLengthProbs { offsets, probs, morgan, global }
    }

    pub fn n_markers(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    fn row(&self, start: usize) -> &[f32] {
        &self.probs[self.offsets[start]..self.offsets[start + 1]]
    }

    /// P(random pair IBS on every marker in `[start, end)` and discordant at
    /// `end`), where `end == n_markers()` means the run leaves the
    /// chromosome.
    pub fn prob(&self, start: usize, end: usize) -> f64 {
        let n = self.n_markers();
        if start == n {
            return 1.0;
        }
        let row = self.row(start);
        if end - start < row.len() {
            return row[end - start] as f64;
        }
        if end == n {
            return 1.0
                - self.global.cdf(self.morgan[end - 1] - self.morgan[start]);
        }
        let p1 = if end == 0 {
            0.0
        } else {
            self.global.cdf(self.morgan[end - 1] - self.morgan[start])
        };
        let p2 = self.global.cdf(self.morgan[end] - self.morgan[start]);
        if p2 > p1 {
            p2 - p1
        } else {
            0.5 / self.global.n_lengths() as f64
        }
    }
}

#[cfg(test)]
mod ibs_length_tests {
    use std::sync::Arc;

    use super::IbsLengthProbs;
    use crate::ibs::counts::IbsCounts;
    use crate::ibs::global::{GlobalIbsParams, GlobalIbsProbs};
    use crate::markers::test_frames::five_marker_frame;
    use crate::markers::{MarkerFrame, Orientation};

    fn varied_frame() -> MarkerFrame {
        // haps 0 and 1 agree everywhere, so no row empties out
        five_marker_frame(vec![
            vec![0, 0, 0, 1, 1, 1],
            vec![0, 0, 0, 0, 0, 0],
            vec![0, 0, 1, 1, 0, 1],
            vec![0, 0, 1, 1, 1, 0],
            vec![1, 1, 1, 0, 1, 0],
        ])
    }

    fn length_probs(frame: &MarkerFrame) -> IbsLengthProbs {
        let counts = IbsCounts::from_frame(frame, 100, 0.99999, 1).unwrap();
        let global = Arc::new(
            GlobalIbsProbs::from_frame(
                frame,
                &GlobalIbsParams {
                    n_positions: 20,
                    n_segments: 10,
                    trim_quantile: 0.9,
                    trim_factor: 3.0,
                },
                1,
            )
            .unwrap(),
        );
        IbsLengthProbs::new(frame, Orientation::Forward, &counts, global)
    }

    #[test]
    fn test_completeness() {
        let frame = varied_frame();
        let counts = IbsCounts::from_frame(&frame, 100, 0.99999, 1).unwrap();
        let n_pairs = counts.n_pairs();
        let probs = length_probs(&frame);
        let m = probs.n_markers();
        for s in 0..m {
            // every row runs to the chromosome end, so the full event space
            // is covered on the +1-smoothed grid
            let row_len = counts.row_len(s);
            assert_eq!(counts.end(s), m);
            let total = (0..=row_len).map(|k| probs.prob(s, s + k)).sum::<f64>();
            let grid = (row_len + 2) as f64 / (n_pairs + 1) as f64;
            assert!(
                total >= 1.0 - 1e-6 && total <= 1.0 + grid,
                "row {s} sums to {total}"
            );
        }
    }

    #[test]
    fn test_probs_positive() {
        let probs = length_probs(&varied_frame());
        let m = probs.n_markers();
        for s in 0..m {
            for e in s..=m {
                assert!(probs.prob(s, e) > 0.0, "prob({s},{e}) not positive");
            }
        }
        assert_eq!(probs.prob(m, m), 1.0);
    }

    #[test]
    fn test_local_grid_values() {
        let frame = varied_frame();
        let counts = IbsCounts::from_frame(&frame, 100, 0.99999, 1).unwrap();
        let probs = length_probs(&frame);
        let n_pairs = counts.n_pairs();
        let denom = 1.0 / (n_pairs + 1) as f64;
        // first entry of row 0: discordant at marker 0 itself
        let c0 = counts.entry(0, 0);
        let expected = ((n_pairs - c0 + 1) as f64 * denom) as f32;
        assert_eq!(probs.prob(0, 0), expected as f64);
        // second entry: IBS at marker 0, discordant at monomorphic marker 1
        // carries only the smoothing mass
        assert_eq!(probs.prob(0, 1), (denom as f32) as f64);
    }
}
