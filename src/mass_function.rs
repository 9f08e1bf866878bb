//! Truncated power-law mass functions, `dN/dM ∝ M^(-alpha)` on `[m_min, m_max]`.
//!
//! Used both for the stellar initial mass function of a stream population (completeness
//! fractions) and for the mass spectrum of the perturbers hitting a stream.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{constants::SolarMass, gapcast_errors::GapcastError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerLawMassFunction {
    pub alpha: f64,
    pub m_min: SolarMass,
    pub m_max: SolarMass,
}

impl PowerLawMassFunction {
    pub fn new(alpha: f64, m_min: SolarMass, m_max: SolarMass) -> Result<Self, GapcastError> {
        if !alpha.is_finite() {
            return Err(GapcastError::InvalidParameter(format!(
                "mass function slope must be finite, got {alpha}"
            )));
        }
        if !(m_min > 0.0 && m_min < m_max && m_max.is_finite()) {
            return Err(GapcastError::InvalidParameter(format!(
                "mass function range must satisfy 0 < m_min < m_max, got [{m_min}, {m_max}]"
            )));
        }
        Ok(PowerLawMassFunction {
            alpha,
            m_min,
            m_max,
        })
    }

    /// Salpeter slope (2.35) on `[m_min, m_max]`.
    pub fn salpeter(m_min: SolarMass, m_max: SolarMass) -> Result<Self, GapcastError> {
        Self::new(2.35, m_min, m_max)
    }

    /// Primitive of `M^(-alpha)`.
    fn primitive(&self, m: SolarMass) -> f64 {
        let k = 1.0 - self.alpha;
        if k.abs() < 1e-12 {
            m.ln()
        } else {
            m.powf(k) / k
        }
    }

    /// Unnormalised number of objects between `lo` and `hi`, clipped to the range.
    fn integral(&self, lo: SolarMass, hi: SolarMass) -> f64 {
        let lo = lo.clamp(self.m_min, self.m_max);
        let hi = hi.clamp(self.m_min, self.m_max);
        if hi <= lo {
            return 0.0;
        }
        self.primitive(hi) - self.primitive(lo)
    }

    /// Fraction of the population with mass in `[lo, hi]`.
    pub fn fraction_between(&self, lo: SolarMass, hi: SolarMass) -> f64 {
        let total = self.integral(self.m_min, self.m_max);
        (self.integral(lo, hi) / total).clamp(0.0, 1.0)
    }

    /// Fraction of the population more massive than `m`.
    pub fn fraction_above(&self, m: SolarMass) -> f64 {
        self.fraction_between(m, self.m_max)
    }

    /// Draw one mass by inverting the cumulative distribution.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> SolarMass {
        let u: f64 = rng.random();
        let k = 1.0 - self.alpha;
        let m = if k.abs() < 1e-12 {
            (self.m_min.ln() + u * (self.m_max / self.m_min).ln()).exp()
        } else {
            let (a, b) = (self.m_min.powf(k), self.m_max.powf(k));
            (a + u * (b - a)).powf(1.0 / k)
        };
        m.clamp(self.m_min, self.m_max)
    }
}
