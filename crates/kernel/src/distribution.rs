//! Analytic distribution of the wall-normal inflow velocity at an open
//! boundary face.
//!
//! Particles enter through a face in proportion to their normal velocity, so
//! the entering-velocity distribution is the flux-weighted Gaussian
//!
//! ```text
//! pdf(x) = (2 b^2 / D) * x * exp(-b^2 (x - U)^2)      for x >= 0
//! b      = 1 / (sqrt(2) * sigma)
//! D      = exp(-U^2 b^2) + U b sqrt(pi) * (erf(U b) + 1)
//! ```
//!
//! with `U` the mean and `sigma` the RMS spread of the underlying normal
//! velocity. The CDF has the closed form
//!
//! ```text
//! cdf(x) = [exp(-U^2 b^2) - exp(-b^2 (x-U)^2)
//!           + U b sqrt(pi) * (erf(U b) + erf(b (x - U)))] / D
//! ```
//!
//! which is 0 at x = 0 and tends to 1 as x grows. Sampling inverts the CDF
//! with a bisection-safeguarded Newton iteration.

use thiserror::Error;

use crate::math::erf;

/// Spread below which the distribution degenerates to a point mass at the
/// mean (relative to the mean's magnitude, with an absolute floor of 1).
const DEGENERATE_SPREAD_REL: f64 = 1.0e-12;

/// Invalid parameters for [`InletRandom`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    /// The mean must be a finite number.
    #[error("inlet distribution mean must be finite, got {mean}")]
    NonFiniteMean {
        /// Offending mean value.
        mean: f64,
    },
    /// The spread must be finite and non-negative.
    #[error("inlet distribution spread must be finite and >= 0, got {spread}")]
    InvalidSpread {
        /// Offending spread value.
        spread: f64,
    },
}

/// Flux-weighted Gaussian distribution of the wall-normal inflow velocity.
///
/// Constructed from `(mean, spread)`; the normalization constants are
/// precomputed once and never mutated independently of the two primary
/// parameters. A spread of (numerically) zero degenerates to returning the
/// mean deterministically instead of dividing by zero.
#[derive(Debug, Clone)]
pub struct InletRandom {
    mean: f64,
    spread: f64,
    /// Point-mass location when the distribution degenerates; NaN otherwise.
    point: f64,
    // Derived constants, fixed at construction.
    b: f64,
    b2: f64,
    expm_u2b2: f64,
    erf_ub: f64,
    ub_sqrt_pi: f64,
    denom: f64,
    b22_denom: f64,
}

impl InletRandom {
    /// Build the distribution for a given mean and RMS spread.
    ///
    /// Non-finite mean, or negative/non-finite spread, is rejected here —
    /// never silently clamped.
    pub fn new(mean: f64, spread: f64) -> Result<Self, DistributionError> {
        if !mean.is_finite() {
            return Err(DistributionError::NonFiniteMean { mean });
        }
        if !spread.is_finite() || spread < 0.0 {
            return Err(DistributionError::InvalidSpread { spread });
        }

        if spread <= DEGENERATE_SPREAD_REL * mean.abs().max(1.0) {
            return Ok(Self::point_mass(mean, spread, mean));
        }

        let b = 1.0 / (std::f64::consts::SQRT_2 * spread);
        let b2 = b * b;
        let ub = mean * b;
        let expm_u2b2 = (-ub * ub).exp();
        let erf_ub = erf(ub);
        let ub_sqrt_pi = ub * std::f64::consts::PI.sqrt();
        let denom = expm_u2b2 + ub_sqrt_pi * (erf_ub + 1.0);
        // Many spreads below zero mean there is effectively no inflow mass
        // and the normalization underflows; degenerate to a point at the
        // support edge rather than dividing by (numerical) zero.
        if !denom.is_finite() || denom <= 1.0e-300 {
            return Ok(Self::point_mass(mean, spread, mean.max(0.0)));
        }
        let b22_denom = 2.0 * b2 / denom;

        Ok(Self {
            mean,
            spread,
            point: f64::NAN,
            b,
            b2,
            expm_u2b2,
            erf_ub,
            ub_sqrt_pi,
            denom,
            b22_denom,
        })
    }

    fn point_mass(mean: f64, spread: f64, point: f64) -> Self {
        Self {
            mean,
            spread,
            point,
            b: 0.0,
            b2: 0.0,
            expm_u2b2: 0.0,
            erf_ub: 0.0,
            ub_sqrt_pi: 0.0,
            denom: 1.0,
            b22_denom: 0.0,
        }
    }

    #[inline]
    fn is_degenerate(&self) -> bool {
        !self.point.is_nan()
    }

    /// Mean of the underlying normal velocity.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// RMS spread of the underlying normal velocity.
    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// Probability density at `x`. Zero outside the support `x >= 0`, and
    /// identically zero in the degenerate (point-mass) case.
    pub fn pdf(&self, x: f64) -> f64 {
        if self.is_degenerate() || x <= 0.0 {
            return 0.0;
        }
        let xp = x - self.mean;
        self.b22_denom * (-self.b2 * xp * xp).exp() * x
    }

    /// Cumulative distribution at `x`, in `[0, 1]`.
    pub fn cdf(&self, x: f64) -> f64 {
        if self.is_degenerate() {
            return if x < self.point { 0.0 } else { 1.0 };
        }
        if x <= 0.0 {
            return 0.0;
        }
        let xp = x - self.mean;
        let value = (self.expm_u2b2 - (-self.b2 * xp * xp).exp()
            + self.ub_sqrt_pi * (self.erf_ub + erf(self.b * xp)))
            / self.denom;
        value.clamp(0.0, 1.0)
    }

    /// Invert the CDF: map a uniform draw `u` in `[0, 1)` to a velocity.
    ///
    /// Uses Newton iteration safeguarded by bisection on a bracket grown
    /// until it covers `u`; the safeguard makes the inversion robust in the
    /// flat tails where the density vanishes.
    pub fn sample(&self, u: f64) -> f64 {
        if self.is_degenerate() {
            return self.point;
        }
        let u = u.clamp(0.0, 1.0 - 1.0e-16);
        if u == 0.0 {
            return 0.0;
        }

        // Grow the upper bracket until the CDF exceeds u.
        let mut lo = 0.0;
        let mut hi = self.mean.max(0.0) + 8.0 * self.spread;
        for _ in 0..64 {
            if self.cdf(hi) >= u {
                break;
            }
            hi += 4.0 * self.spread;
        }

        let mut x = self.mean.clamp(lo + 0.25 * self.spread, hi);
        for _ in 0..100 {
            let f = self.cdf(x) - u;
            if f.abs() < 1.0e-13 {
                break;
            }
            if f > 0.0 {
                hi = x;
            } else {
                lo = x;
            }
            let slope = self.pdf(x);
            let newton = if slope > f64::MIN_POSITIVE {
                x - f / slope
            } else {
                f64::NAN
            };
            x = if newton.is_finite() && newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
            if hi - lo < 1.0e-15 * (1.0 + x.abs()) {
                break;
            }
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            InletRandom::new(f64::NAN, 1.0),
            Err(DistributionError::NonFiniteMean { .. })
        ));
        assert!(matches!(
            InletRandom::new(1.0, -0.1),
            Err(DistributionError::InvalidSpread { .. })
        ));
        assert!(matches!(
            InletRandom::new(1.0, f64::INFINITY),
            Err(DistributionError::InvalidSpread { .. })
        ));
    }

    #[test]
    fn zero_spread_degenerates_to_mean() {
        let d = InletRandom::new(2.0, 0.0).unwrap();
        assert_eq!(d.sample(0.3), 2.0);
        assert_eq!(d.sample(0.9), 2.0);
        assert_eq!(d.cdf(1.9), 0.0);
        assert_eq!(d.cdf(2.1), 1.0);
    }

    #[test]
    fn pdf_integrates_to_one() {
        let d = InletRandom::new(2.0, 0.5).unwrap();
        let hi = 2.0 + 12.0 * 0.5;
        let n = 20_000;
        let dx = hi / n as f64;
        let integral: f64 = (0..n)
            .map(|i| d.pdf((i as f64 + 0.5) * dx) * dx)
            .sum();
        // Tolerance covers the erf approximation error in the normalization.
        assert!(
            (integral - 1.0).abs() < 1.0e-5,
            "pdf should integrate to 1, got {integral}"
        );
    }

    #[test]
    fn cdf_is_derivative_consistent_with_pdf() {
        let d = InletRandom::new(1.5, 0.4).unwrap();
        for i in 1..40 {
            let x = i as f64 * 0.1;
            let h = 1.0e-6;
            let numeric = (d.cdf(x + h) - d.cdf(x - h)) / (2.0 * h);
            let analytic = d.pdf(x);
            assert!(
                (numeric - analytic).abs() < 1.0e-4 * (1.0 + analytic),
                "d(cdf)/dx != pdf at x={x}: {numeric} vs {analytic}"
            );
        }
    }

    #[test]
    fn sample_inverts_cdf() {
        let d = InletRandom::new(3.0, 0.7).unwrap();
        for i in 1..100 {
            let u = i as f64 / 100.0;
            let x = d.sample(u);
            assert!(
                (d.cdf(x) - u).abs() < 1.0e-9,
                "cdf(sample({u})) = {} should equal u",
                d.cdf(x)
            );
        }
    }

    #[test]
    fn negative_mean_still_normalizes() {
        // Mean outflow with fluctuations: a small inflow tail remains.
        let d = InletRandom::new(-0.5, 0.6).unwrap();
        assert!(d.cdf(0.0) == 0.0);
        assert!(d.cdf(10.0) > 1.0 - 1.0e-9);
        let x = d.sample(0.5);
        assert!(x > 0.0, "samples must stay in the support, got {x}");
    }
}
