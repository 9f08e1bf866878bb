//! # Impulse kicks from passing perturbers
//!
//! Each recorded impact is replayed with a perturber drawn from a [`PerturberModel`]:
//! a mass from a power-law mass function (`sample_GM`) and a Plummer scale radius from a
//! mass-size relation (`sample_rs`). A perturber of mass `M` and scale radius `r_s`
//! passing at impact parameter `b` with relative velocity `w = (w∥, w⊥)` changes the
//! velocity of a stream star at distance `y` from the impact point by
//!
//! ```text
//!            2 GM w⊥² y                          2 GM b w²
//! Δv∥ = − ─────────────────────────     Δv⊥ = − ─────────────────────────
//!         w ((b² + r_s²) w² + w⊥² y²)            w ((b² + r_s²) w² + w⊥² y²)
//! ```
//!
//! The [`KickSchedule`] of a sampling call is drawn in one step, before any draw is
//! rewound, and then applied to every draw.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Gyr, KmPerSec, Kpc, SolarMass, G_KPC_KMS2_MSUN},
    dynamics::{AngleFrequencyTime, ImpactGeometry},
    gapcast_errors::GapcastError,
    mass_function::PowerLawMassFunction,
};

/// Mass-size relation of the perturbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RsScaling {
    /// `r_s = rs_at_1e8 · (M / 10⁸ M☉)^exponent`
    PowerLaw { rs_at_1e8: Kpc, exponent: f64 },
    Fixed(Kpc),
}

impl Default for RsScaling {
    fn default() -> Self {
        RsScaling::PowerLaw {
            rs_at_1e8: 1.05,
            exponent: 0.5,
        }
    }
}

impl RsScaling {
    pub fn rs(&self, mass: SolarMass) -> Kpc {
        match self {
            RsScaling::PowerLaw {
                rs_at_1e8,
                exponent,
            } => rs_at_1e8 * (mass / 1e8).powf(*exponent),
            RsScaling::Fixed(rs) => *rs,
        }
    }
}

/// Distribution of the perturbers replayed at each recorded impact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturberModel {
    pub mass_function: PowerLawMassFunction,
    pub rs_scaling: RsScaling,
    /// Probability that a recorded impact is kept, in (0, 1]
    pub rate_modifier: f64,
    /// Perturbers lighter than this give no kick
    pub cutoff_mass: Option<SolarMass>,
}

impl PerturberModel {
    pub fn builder() -> PerturberModelBuilder {
        PerturberModelBuilder::new()
    }

    /// Draw a perturber mass and its GM, in kpc (km/s)².
    #[allow(non_snake_case)]
    pub fn sample_GM<R: Rng>(&self, rng: &mut R) -> (SolarMass, f64) {
        let mass = self.mass_function.sample(rng);
        (mass, G_KPC_KMS2_MSUN * mass)
    }

    pub fn sample_rs(&self, mass: SolarMass) -> Kpc {
        self.rs_scaling.rs(mass)
    }
}

impl Default for PerturberModel {
    fn default() -> Self {
        PerturberModel {
            mass_function: PowerLawMassFunction {
                alpha: 2.0,
                m_min: 1e5,
                m_max: 1e9,
            },
            rs_scaling: RsScaling::default(),
            rate_modifier: 1.0,
            cutoff_mass: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerturberModelBuilder {
    massexp: f64,
    log10_mass_range: (f64, f64),
    rs_scaling: RsScaling,
    rate_modifier: f64,
    cutoff_mass: Option<SolarMass>,
}

impl Default for PerturberModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PerturberModelBuilder {
    pub fn new() -> Self {
        PerturberModelBuilder {
            massexp: -2.0,
            log10_mass_range: (5.0, 9.0),
            rs_scaling: RsScaling::default(),
            rate_modifier: 1.0,
            cutoff_mass: None,
        }
    }

    /// Exponent of `dN/dM ∝ M^massexp`.
    pub fn massexp(mut self, v: f64) -> Self {
        self.massexp = v;
        self
    }

    /// Perturber mass range as `(log10 M_min, log10 M_max)`.
    pub fn log10_mass_range(mut self, lo: f64, hi: f64) -> Self {
        self.log10_mass_range = (lo, hi);
        self
    }

    pub fn rs_scaling(mut self, v: RsScaling) -> Self {
        self.rs_scaling = v;
        self
    }

    pub fn rate_modifier(mut self, v: f64) -> Self {
        self.rate_modifier = v;
        self
    }

    pub fn cutoff_mass(mut self, v: SolarMass) -> Self {
        self.cutoff_mass = Some(v);
        self
    }

    pub fn build(self) -> Result<PerturberModel, GapcastError> {
        let (lo, hi) = self.log10_mass_range;
        let mass_function = PowerLawMassFunction::new(-self.massexp, 10f64.powf(lo), 10f64.powf(hi))?;

        if !(self.rate_modifier > 0.0 && self.rate_modifier <= 1.0) {
            return Err(GapcastError::InvalidParameter(format!(
                "rate_modifier must be in (0, 1], got {}",
                self.rate_modifier
            )));
        }
        if let Some(cutoff) = self.cutoff_mass {
            if !(cutoff > 0.0) || !cutoff.is_finite() {
                return Err(GapcastError::InvalidParameter(format!(
                    "cutoff mass must be positive, got {cutoff}"
                )));
            }
        }
        match self.rs_scaling {
            RsScaling::Fixed(rs) if !(rs > 0.0) => {
                return Err(GapcastError::InvalidParameter(format!(
                    "perturber scale radius must be positive, got {rs}"
                )))
            }
            RsScaling::PowerLaw { rs_at_1e8, .. } if !(rs_at_1e8 > 0.0) => {
                return Err(GapcastError::InvalidParameter(format!(
                    "perturber scale radius must be positive, got {rs_at_1e8}"
                )))
            }
            _ => {}
        }

        Ok(PerturberModel {
            mass_function,
            rs_scaling: self.rs_scaling,
            rate_modifier: self.rate_modifier,
            cutoff_mass: self.cutoff_mass,
        })
    }
}

/// Velocity change `(Δv∥, Δv⊥)` of a star `y` kpc along the stream from the impact point.
pub fn plummer_kick(gm: f64, rs: Kpc, impact: &ImpactGeometry, y: Kpc) -> (KmPerSec, KmPerSec) {
    let w2 = impact.w_par * impact.w_par + impact.w_perp * impact.w_perp;
    let w = w2.sqrt();
    let wperp2 = impact.w_perp * impact.w_perp;
    let b2 = impact.impact_b * impact.impact_b;
    let denom = w * ((b2 + rs * rs) * w2 + wperp2 * y * y);
    (
        -2.0 * gm * wperp2 * y / denom,
        -2.0 * gm * impact.impact_b * w2 / denom,
    )
}

/// Perturber replayed at one impact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kick {
    pub impact: ImpactGeometry,
    pub mass: SolarMass,
    pub gm: f64,
    pub rs: Kpc,
    /// False when the impact was dropped by the rate modifier or the cutoff mass
    pub active: bool,
}

/// Fully drawn perturbers of every recorded impact, earliest first.
#[derive(Debug, Clone, PartialEq)]
pub struct KickSchedule {
    first_time: Gyr,
    kicks: Vec<Kick>,
}

impl KickSchedule {
    /// Draw one perturber per impact. The schedule is complete before any draw is replayed.
    pub fn draw<R: Rng>(
        first: &ImpactGeometry,
        rest: &[ImpactGeometry],
        perturbers: &PerturberModel,
        rng: &mut R,
    ) -> Self {
        let kicks = std::iter::once(first)
            .chain(rest.iter())
            .map(|impact| {
                let kept = perturbers.rate_modifier >= 1.0
                    || rng.random::<f64>() < perturbers.rate_modifier;
                let (mass, gm) = perturbers.sample_GM(rng);
                let heavy = perturbers.cutoff_mass.map_or(true, |cutoff| mass >= cutoff);
                Kick {
                    impact: *impact,
                    mass,
                    gm,
                    rs: perturbers.sample_rs(mass),
                    active: kept && heavy,
                }
            })
            .collect();
        KickSchedule {
            first_time: first.time,
            kicks,
        }
    }

    pub fn kicks(&self) -> &[Kick] {
        &self.kicks
    }

    /// Rewind `aat` to the first impact, apply every kick it was stripped in time for, and
    /// advance it back to the present.
    pub fn apply(
        &self,
        aat: &AngleFrequencyTime,
        kpc_per_rad: Kpc,
        dfreq_per_kms: [f64; 2],
    ) -> AngleFrequencyTime {
        let mut freq = aat.dfreq;
        let mut angle = aat.dangle - freq * self.first_time;
        let mut lookback = self.first_time;

        for kick in &self.kicks {
            angle += freq * (lookback - kick.impact.time);
            lookback = kick.impact.time;
            if !kick.active || aat.t_strip <= kick.impact.time {
                continue;
            }
            let y = (angle[0] - kick.impact.dangle) * kpc_per_rad;
            let (dv_par, dv_perp) = plummer_kick(kick.gm, kick.rs, &kick.impact, y);
            freq[0] += dfreq_per_kms[0] * dv_par;
            freq[1] += dfreq_per_kms[1] * dv_perp;
        }

        AngleFrequencyTime {
            dfreq: freq,
            dangle: angle + freq * lookback,
            t_strip: aat.t_strip,
        }
    }
}
