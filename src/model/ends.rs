use std::sync::Arc;

use derive_new::new;

use crate::errs::EndsResult;
use crate::genetic_map::GeneticMap;
use crate::model::quantiles::{Endpoint, QuantileEstimator};
use crate::segments::SharedSegment;

/// Iteration and convergence settings for the two-sided refinement.
#[derive(Debug, Clone, Copy)]
pub struct RefineParams {
    /// Per-side iteration cap; the loop runs at most twice this many
    /// alternating iterations.
    pub max_its: usize,
    /// Keep the focus at the initial segment midpoint between iterations.
    pub fix_focus: bool,
    /// Relative Morgan change below which an endpoint counts as converged.
    pub max_diff: f64,
}

/// Focus position plus the forward and backward endpoint vectors for one
/// segment. Index 0 of each vector is the internal convergence entry.
#[derive(Debug)]
pub struct EndpointEstimate {
    pub focus: i64,
    pub fwd: Vec<Endpoint>,
    pub bwd: Vec<Endpoint>,
}

/// Alternates forward and backward quantile estimation from a moving focus
/// until both endpoints stabilise.
#[derive(new)]
pub struct IbdEnds {
    map: Arc<GeneticMap>,
    estimator: QuantileEstimator,
    params: RefineParams,
}

impl IbdEnds {
    /// Runs the refinement for one segment. `probs[0]` drives convergence;
    /// the remaining entries are reported quantiles and sampled draws.
    pub fn estimate(
        &mut self,
        seg: &SharedSegment,
        probs: &[f64],
    ) -> EndsResult<EndpointEstimate> {
        let mut start = seg.start;
        let mut end = seg.incl_end;
        let mut start_m = self.map.morgans(start);
        let mut end_m = self.map.morgans(end);
        let mut focus = (start + end) / 2;
        let mut focus_m = self.map.morgans(focus);

        let mut fwd: Vec<Endpoint> = Vec::with_capacity(probs.len());
        let mut bwd: Vec<Endpoint> = Vec::with_capacity(probs.len());
        let mut unchanged = 0usize;
        for it in 0..2 * self.params.max_its {
            if unchanged >= 2 {
                break;
            }
            if it % 2 == 0 {
                self.estimator.fwd_quantiles(
                    seg.hap1, seg.hap2, start_m, focus, focus_m, probs,
                    &mut fwd,
                )?;
                let new_end = fwd[0].base.min(seg.incl_end);
                let new_end_m = self.map.morgans(new_end);
                if self.converged(end_m, new_end_m, focus_m, end, new_end) {
                    unchanged += 1;
                } else {
                    unchanged = 0;
                    end = new_end;
                    end_m = new_end_m;
                    if !self.params.fix_focus {
                        focus = (start + end) / 2;
                        focus_m = self.map.morgans(focus);
                    }
                }
            } else {
                self.estimator.bwd_quantiles(
                    seg.hap1, seg.hap2, end_m, focus, focus_m, probs,
                    &mut bwd,
                )?;
                let new_start = bwd[0].base.max(seg.start);
                let new_start_m = self.map.morgans(new_start);
                if self.converged(start_m, new_start_m, focus_m, start, new_start)
                {
                    unchanged += 1;
                } else {
                    unchanged = 0;
                    start = new_start;
                    start_m = new_start_m;
                    if !self.params.fix_focus {
                        focus = (start + end) / 2;
                        focus_m = self.map.morgans(focus);
                    }
                }
            }
        }

        // reported endpoints stay within the input segment
        let end_cap_m = self.map.morgans(seg.incl_end);
        for endpoint in fwd.iter_mut() {
            if endpoint.base > seg.incl_end {
                endpoint.base = seg.incl_end;
                endpoint.morgan = end_cap_m;
            }
        }
        let start_cap_m = self.map.morgans(seg.start);
        for endpoint in bwd.iter_mut() {
            if endpoint.base < seg.start {
                endpoint.base = seg.start;
                endpoint.morgan = start_cap_m;
            }
        }
        Ok(EndpointEstimate { focus, fwd, bwd })
    }

    fn converged(
        &self,
        old_m: f64,
        new_m: f64,
        focus_m: f64,
        old_pos: i64,
        new_pos: i64,
    ) -> bool {
        let denom = (old_m - focus_m).abs();
        if denom > 0.0 {
            (new_m - old_m).abs() / denom < self.params.max_diff
        } else {
            new_pos == old_pos
        }
    }
}

#[cfg(test)]
mod ibd_ends_tests {
    use std::sync::Arc;

    use crate::genetic_map::GeneticMap;
    use crate::ibs::counts::IbsCounts;
    use crate::ibs::global::{GlobalIbsParams, GlobalIbsProbs};
    use crate::ibs::IbsLengthProbs;
    use crate::markers::{MarkerFrame, Orientation};
    use crate::model::quantiles::{ModelParams, QuantileEstimator};
    use crate::segments::SharedSegment;

    use super::{IbdEnds, RefineParams};

    fn build_ends(
        frame: MarkerFrame,
        map: GeneticMap,
        max_its: usize,
        fix_focus: bool,
    ) -> IbdEnds {
        let frame = Arc::new(frame);
        let counts =
            IbsCounts::from_frame(&frame, 40_000, 0.9999, 1).unwrap();
        let rev_counts = counts.reversed();
        let global = Arc::new(
            GlobalIbsProbs::from_frame(
                &frame,
                &GlobalIbsParams {
                    n_positions: 50,
                    n_segments: 20,
                    trim_quantile: 0.9,
                    trim_factor: 3.0,
                },
                1,
            )
            .unwrap(),
        );
        let fwd_probs = Arc::new(IbsLengthProbs::new(
            &frame,
            Orientation::Forward,
            &counts,
            global.clone(),
        ));
        let rev_probs = Arc::new(IbsLengthProbs::new(
            &frame,
            Orientation::Reverse,
            &rev_counts,
            global,
        ));
        let params =
            ModelParams { err: 1e-3, gc_err: 1e-3, gc_bp: 1000, ne: 10_000.0 };
        let estimator =
            QuantileEstimator::new(frame, fwd_probs, rev_probs, params);
        IbdEnds::new(
            Arc::new(map),
            estimator,
            RefineParams { max_its, fix_focus, max_diff: 0.01 },
        )
    }

    fn uniform_setup() -> (MarkerFrame, GeneticMap) {
        let map = GeneticMap::new(
            vec![100, 200, 300, 400, 500],
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let frame = MarkerFrame::new(
            "1".to_string(),
            vec![100, 200, 300, 400, 500],
            vec![2; 5],
            vec![vec![0, 0, 0, 0]; 5],
            &map,
        )
        .unwrap();
        (frame, map)
    }

    #[test]
    fn test_uniform_segment_with_fixed_focus() {
        let (frame, map) = uniform_setup();
        let mut ends = build_ends(frame, map, 10, true);
        let seg =
            SharedSegment { hap1: 0, hap2: 1, start: 100, incl_end: 500 };
        let est = ends.estimate(&seg, &[0.05, 0.5]).unwrap();
        assert_eq!(est.focus, 300);
        assert!(est.fwd[1].base >= 301 && est.fwd[1].base <= 500);
        assert!(est.bwd[1].base >= 100 && est.bwd[1].base <= 299);
    }

    #[test]
    fn test_endpoints_clamped_to_segment() {
        let (frame, map) = uniform_setup();
        let mut ends = build_ends(frame, map, 10, false);
        let seg =
            SharedSegment { hap1: 0, hap2: 1, start: 200, incl_end: 400 };
        let est = ends.estimate(&seg, &[0.05, 0.05, 0.5, 0.99]).unwrap();
        assert!(est.fwd.iter().all(|e| e.base <= seg.incl_end));
        assert!(est.bwd.iter().all(|e| e.base >= seg.start));
        assert!(est.focus >= seg.start && est.focus <= seg.incl_end);
    }

    #[test]
    fn test_focus_between_endpoints_when_moving() {
        let (frame, map) = uniform_setup();
        let mut ends = build_ends(frame, map, 10, false);
        let seg =
            SharedSegment { hap1: 0, hap2: 1, start: 100, incl_end: 500 };
        let est = ends.estimate(&seg, &[0.05, 0.5]).unwrap();
        assert!(est.focus > seg.start);
        assert!(est.focus < seg.incl_end);
    }

    #[test]
    fn test_iteration_cap_halts() {
        // max_its 1 allows exactly one pass per side and must still return
        // full vectors
        let (frame, map) = uniform_setup();
        let mut ends = build_ends(frame, map, 1, false);
        let seg =
            SharedSegment { hap1: 0, hap2: 1, start: 100, incl_end: 500 };
        let est = ends.estimate(&seg, &[0.05, 0.25, 0.5]).unwrap();
        assert_eq!(est.fwd.len(), 3);
        assert_eq!(est.bwd.len(), 3);
    }

    #[test]
    fn test_degenerate_segment() {
        let (frame, map) = uniform_setup();
        let mut ends = build_ends(frame, map, 10, false);
        let seg =
            SharedSegment { hap1: 0, hap2: 1, start: 500, incl_end: 500 };
        let est = ends.estimate(&seg, &[0.05, 0.5]).unwrap();
        assert!(est.fwd.iter().all(|e| e.base <= 500));
        assert!(est.bwd.iter().all(|e| e.base >= 100));
    }
}
