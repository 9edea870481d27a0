use std::sync::Arc;

use crate::errs::{EndsError, EndsResult};
use crate::ibs::IbsLengthProbs;
use crate::markers::{MarkerFrame, Orientation, OrientedFrame};
use crate::model::coalescent;

/// A window contributing less than this fraction of the mass accumulated so
/// far ends the cdf construction.
const MIN_WINDOW_RATIO: f64 = 1e-3;
/// Accumulated mass above this is folded back into the running constant to
/// keep the unnormalised cdf finite.
const RESCALE_LIMIT: f64 = 1e50;

#[derive(Debug, Clone, Copy)]
pub struct ModelParams {
    /// Per-site discordance probability inside an IBD segment.
    pub err: f64,
    /// Per-site discordance probability within a gene-conversion tract.
    pub gc_err: f64,
    /// Maximum gene-conversion tract length in base pairs.
    pub gc_bp: i64,
    /// Constant effective population size of the coalescent length prior.
    pub ne: f64,
}

/// One inverted endpoint: a base-pair position and its Morgan position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Endpoint {
    pub base: i64,
    pub morgan: f64,
}

/// Builds, for one haplotype pair and focus, the cumulative distribution of
/// the IBD endpoint past the focus and inverts it at requested
/// probabilities. Holds forward and reverse IBS models; backward queries
/// negate coordinates and reuse the forward machinery.
pub struct QuantileEstimator {
    frame: Arc<MarkerFrame>,
    fwd_probs: Arc<IbsLengthProbs>,
    rev_probs: Arc<IbsLengthProbs>,
    params: ModelParams,
    cdf: Vec<f64>,
}

impl QuantileEstimator {
    pub fn new(
        frame: Arc<MarkerFrame>,
        fwd_probs: Arc<IbsLengthProbs>,
        rev_probs: Arc<IbsLengthProbs>,
        params: ModelParams,
    ) -> QuantileEstimator {
        let n_markers = frame.n_markers();
        QuantileEstimator {
            frame,
            fwd_probs,
            rev_probs,
            params,
            cdf: vec![0.0; n_markers],
        }
    }

    /// Endpoint quantiles downstream of `focus_pos`, anchored at the Morgan
    /// position of the segment's other (upstream) endpoint.
    pub fn fwd_quantiles(
        &mut self,
        h1: usize,
        h2: usize,
        anchor_morgan: f64,
        focus_pos: i64,
        focus_morgan: f64,
        probs: &[f64],
        out: &mut Vec<Endpoint>,
    ) -> EndsResult<()> {
        self.estimate(
            Orientation::Forward,
            h1,
            h2,
            anchor_morgan,
            focus_pos,
            focus_morgan,
            probs,
            out,
        )
    }

    /// Endpoint quantiles upstream of `focus_pos`. Coordinates are negated
    /// into the reverse orientation and the results negated back, so
    /// returned positions are below the focus.
    pub fn bwd_quantiles(
        &mut self,
        h1: usize,
        h2: usize,
        anchor_morgan: f64,
        focus_pos: i64,
        focus_morgan: f64,
        probs: &[f64],
        out: &mut Vec<Endpoint>,
    ) -> EndsResult<()> {
        self.estimate(
            Orientation::Reverse,
            h1,
            h2,
            -anchor_morgan,
            -focus_pos,
            -focus_morgan,
            probs,
            out,
        )?;
        for endpoint in out.iter_mut() {
            endpoint.base = -endpoint.base;
            endpoint.morgan = -endpoint.morgan;
        }
        Ok(())
    }

    fn estimate(
        &mut self,
        orientation: Orientation,
        h1: usize,
        h2: usize,
        anchor_morgan: f64,
        focus_pos: i64,
        focus_morgan: f64,
        probs: &[f64],
        out: &mut Vec<Endpoint>,
    ) -> EndsResult<()> {
        out.clear();
        let frame = Arc::clone(&self.frame);
        let view = frame.oriented(orientation);
        let tbl = match orientation {
            Orientation::Forward => Arc::clone(&self.fwd_probs),
            Orientation::Reverse => Arc::clone(&self.rev_probs),
        };
        let n_markers = view.n_markers();
        let cdf_start = view.first_past(focus_pos);
        if cdf_start == n_markers {
            // focus at the terminal marker, nothing to estimate past it
            for _ in probs {
                out.push(Endpoint {
                    base: focus_pos + 1,
                    morgan: focus_morgan,
                });
            }
            return Ok(());
        }

        let ne = self.params.ne;
        let mut constant = 1.0f64;
        let mut f1 = coalescent::cdf(focus_morgan - anchor_morgan, ne);
        let mut next = view.next_discord(h1, h2, cdf_start);
        let mut min_next_discord_pos = discord_pos(&view, next)
            .saturating_add(self.params.gc_bp);
        let mut current_start = cdf_start;
        let mut total = 0.0f64;

        let cdf_end = loop {
            let window_end = (next + 1).min(n_markers);
            let window_base = total;
            for m in current_start..window_end {
                let f2 = coalescent::cdf(view.morgan(m) - anchor_morgan, ne);
                total += (f2 - f1) * tbl.prob(m, next) * constant;
                self.cdf[m] = total;
                f1 = f2;
            }
            if window_end == n_markers
                || total - window_base < MIN_WINDOW_RATIO * total
            {
                break window_end;
            }
            if total > RESCALE_LIMIT {
                let scale = total.recip();
                for value in self.cdf[cdf_start..window_end].iter_mut() {
                    *value *= scale;
                }
                total *= scale;
                constant *= scale;
            }
            current_start = window_end;
            next = view.next_discord(h1, h2, current_start);
            let next_pos = discord_pos(&view, next);
            let rate = if next_pos >= min_next_discord_pos {
                min_next_discord_pos =
                    next_pos.saturating_add(self.params.gc_bp);
                self.params.err
            } else {
                self.params.gc_err
            };
            constant *= rate / tbl.prob(current_start, next);
        };

        let total = self.cdf[cdf_end - 1];
        if !(total > 0.0 && total.is_finite()) {
            return Err(EndsError::EmptyCdf);
        }
        let scale = total.recip();
        for value in self.cdf[cdf_start..cdf_end].iter_mut() {
            *value *= scale;
        }

        for &p in probs {
            if !(p > 0.0 && p < 1.0) {
                return Err(EndsError::InvalidProbability(p));
            }
            out.push(self.invert(
                &view,
                cdf_start,
                cdf_end,
                anchor_morgan,
                focus_pos,
                focus_morgan,
                p,
            )?);
        }
        Ok(())
    }

    /// Inverts the normalised cdf at probability `p`, interpolating within
    /// the bracketing marker interval on the coalescent prior scale.
    fn invert(
        &self,
        view: &OrientedFrame<'_>,
        cdf_start: usize,
        cdf_end: usize,
        anchor_morgan: f64,
        focus_pos: i64,
        focus_morgan: f64,
        p: f64,
    ) -> EndsResult<Endpoint> {
        let ne = self.params.ne;
        let window = &self.cdf[cdf_start..cdf_end];
        let i = (cdf_start + window.partition_point(|&c| c < p))
            .min(cdf_end - 1);
        let (p1, x1, b1) = if i == cdf_start {
            (0.0, focus_morgan, focus_pos)
        } else {
            (self.cdf[i - 1], view.morgan(i - 1), view.base(i - 1))
        };
        let p2 = self.cdf[i];
        let x2 = view.morgan(i);
        let b2 = view.base(i);

        let ff1 = coalescent::cdf(x1 - anchor_morgan, ne);
        let ff2 = coalescent::cdf(x2 - anchor_morgan, ne);
        let x = if p2 > p1 && ff2 > ff1 {
            let pp = ff1 + (p - p1) / (p2 - p1) * (ff2 - ff1);
            if pp <= 0.0 {
                x1
            } else if pp >= 1.0 {
                x2
            } else {
                // rounding in the final normalisation can leave p a hair
                // outside [p1, p2]; stay inside the bracketing interval
                (anchor_morgan + coalescent::inv_cdf(pp, ne)?)
                    .clamp(x1, x2)
            }
        } else {
            x1
        };
        let frac = if x2 > x1 { (x - x1) / (x2 - x1) } else { 0.0 };
        let base = b1 as f64 + frac * (b2 - b1) as f64;
        let base = (base.round() as i64).max(focus_pos + 1);
        Ok(Endpoint { base, morgan: x })
    }
}

#[inline]
fn discord_pos(view: &OrientedFrame<'_>, next: usize) -> i64 {
    if next < view.n_markers() {
        view.base(next)
    } else {
        i64::MAX
    }
}
