//! # Survey photometry
//!
//! Everything needed to decide whether a star of a given mass, age and metallicity is seen
//! by a photometric survey:
//!
//! - [`EvolutionaryStage`] – the isochrone phase labels, ordered along stellar evolution.
//!   A selection model keeps every phase up to a chosen `maxlabel`.
//! - [`PhotometricErrorModel`] – per-survey depth, magnitude-error law and completeness.
//! - [`surveys`] – survey definitions and the built-in presets.
//! - [`isochrone`] – already-built isochrone tables.
//! - [`selection`] – the interpolated (mass, age, [Fe/H]) → (magnitude, colour, detection
//!   probability, error) mapping of one survey.
//! - [`iso_cache`] – on-disk and in-memory caching of selection models.
//!
//! ## Error law
//!
//! ```text
//! σ(m)  = sqrt(σ_sys² + (0.2171 · 10^{0.4 (m − m_lim)})²)     (S/N = 5 at m_lim)
//! p(m)  = ½ erfc((m − m_lim) / (√2 · w))                       (50 % complete at m_lim)
//! ```
pub mod iso_cache;
pub mod isochrone;
pub mod selection;
pub mod surveys;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::{
    constants::{Magnitude, SIGMA_AT_DEPTH},
    gapcast_errors::GapcastError,
};

/// Isochrone evolutionary phases, in evolutionary order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum EvolutionaryStage {
    PreMainSequence,
    MainSequence,
    SubGiant,
    #[default]
    Rgb,
    HorizontalBranch,
    EarlyAgb,
    Agb,
}

impl EvolutionaryStage {
    pub const ALL: [EvolutionaryStage; 7] = [
        EvolutionaryStage::PreMainSequence,
        EvolutionaryStage::MainSequence,
        EvolutionaryStage::SubGiant,
        EvolutionaryStage::Rgb,
        EvolutionaryStage::HorizontalBranch,
        EvolutionaryStage::EarlyAgb,
        EvolutionaryStage::Agb,
    ];

    /// Integer label as stored in isochrone tables.
    pub fn label(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for EvolutionaryStage {
    type Error = GapcastError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        EvolutionaryStage::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| {
                GapcastError::InvalidIsochroneGrid(format!("unknown stage label {value}"))
            })
    }
}

impl fmt::Display for EvolutionaryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvolutionaryStage::PreMainSequence => "pms",
            EvolutionaryStage::MainSequence => "ms",
            EvolutionaryStage::SubGiant => "sgb",
            EvolutionaryStage::Rgb => "rgb",
            EvolutionaryStage::HorizontalBranch => "hb",
            EvolutionaryStage::EarlyAgb => "eagb",
            EvolutionaryStage::Agb => "agb",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EvolutionaryStage {
    type Err = GapcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pms" => Ok(EvolutionaryStage::PreMainSequence),
            "ms" => Ok(EvolutionaryStage::MainSequence),
            "sgb" => Ok(EvolutionaryStage::SubGiant),
            "rgb" => Ok(EvolutionaryStage::Rgb),
            "hb" => Ok(EvolutionaryStage::HorizontalBranch),
            "eagb" => Ok(EvolutionaryStage::EarlyAgb),
            "agb" => Ok(EvolutionaryStage::Agb),
            _ => Err(GapcastError::InvalidParameter(format!(
                "Invalid evolutionary stage: {s}"
            ))),
        }
    }
}

/// Depth, error law and completeness of a survey in its detection band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotometricErrorModel {
    /// 5σ limiting magnitude, also the 50 % completeness magnitude
    pub depth: Magnitude,
    /// Systematic error floor (mag)
    pub sigma_sys: Magnitude,
    /// Width of the completeness roll-off (mag)
    pub completeness_width: Magnitude,
}

impl PhotometricErrorModel {
    pub fn new(
        depth: Magnitude,
        sigma_sys: Magnitude,
        completeness_width: Magnitude,
    ) -> Result<Self, GapcastError> {
        if !depth.is_finite() {
            return Err(GapcastError::InvalidParameter(format!(
                "survey depth must be finite, got {depth}"
            )));
        }
        if !(sigma_sys > 0.0) {
            return Err(GapcastError::InvalidParameter(format!(
                "systematic error floor must be > 0, got {sigma_sys}"
            )));
        }
        if !(completeness_width > 0.0) {
            return Err(GapcastError::InvalidParameter(format!(
                "completeness width must be > 0, got {completeness_width}"
            )));
        }
        Ok(PhotometricErrorModel {
            depth,
            sigma_sys,
            completeness_width,
        })
    }

    /// Expected magnitude error of a star of apparent magnitude `mag`.
    pub fn sigma(&self, mag: Magnitude) -> Magnitude {
        let random = SIGMA_AT_DEPTH * 10f64.powf(0.4 * (mag - self.depth));
        (self.sigma_sys * self.sigma_sys + random * random).sqrt()
    }

    /// Probability that a star of apparent magnitude `mag` is detected.
    pub fn detection_probability(&self, mag: Magnitude) -> f64 {
        let x = (mag - self.depth) / (std::f64::consts::SQRT_2 * self.completeness_width);
        (0.5 * erfc(x)).clamp(0.0, 1.0)
    }

    /// Error on a colour built from two bands observed at this depth.
    pub fn color_sigma(&self, mag_a: Magnitude, mag_b: Magnitude) -> Magnitude {
        self.sigma(mag_a).hypot(self.sigma(mag_b))
    }
}
