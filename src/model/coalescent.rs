use crate::errs::{EndsError, EndsResult};

/// Prior probability, under a constant effective population size `ne`, that
/// an IBD segment containing a focal point ends within `y` Morgans of it.
#[inline]
pub fn cdf(y: f64, ne: f64) -> f64 {
    1.0 - 1.0 / (2.0 * ne * (2.0 * y).exp_m1() + 1.0)
}

/// Inverse of [`cdf`] in its first argument.
pub fn inv_cdf(p: f64, ne: f64) -> EndsResult<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(EndsError::InvalidProbability(p));
    }
    if !(ne.is_finite() && ne > 0.0) {
        return Err(EndsError::InvalidNe(ne));
    }
    let d = 2.0 * ne * (1.0 - p);
    Ok(0.5 * ((p + d) / d).ln())
}
