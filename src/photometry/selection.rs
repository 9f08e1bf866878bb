//! # Isochrone selection models
//!
//! An [`IsochroneSelectionModel`] is the survey-specific view of an [`IsochroneGrid`]:
//! every track is cut to the evolutionary phases up to `maxlabel` and reduced to the
//! survey's detection-band absolute magnitude and colour. Querying it at an arbitrary
//! (age, [Fe/H]) returns a [`Locus`], the bilinear interpolation of the four surrounding
//! tracks on their common mass range.
//!
//! Combined with the survey's [`PhotometricErrorModel`] and a distance modulus, a locus
//! maps a stellar mass to its apparent magnitude, colour, detection probability and
//! photometric errors ([`IsochroneSelectionModel::evaluate`]).
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Gyr, Magnitude, SolarMass, SurveyKey, EPS},
    gapcast_errors::GapcastError,
    photometry::{
        isochrone::{IsochroneGrid, IsochroneTrack},
        surveys::SurveyConfig,
        EvolutionaryStage, PhotometricErrorModel,
    },
};

/// One grid node reduced to the survey bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionTrack {
    pub masses: Vec<SolarMass>,
    pub stages: Vec<EvolutionaryStage>,
    /// Absolute magnitude in the detection band
    pub abs_mag: Vec<Magnitude>,
    /// Detection band minus colour band
    pub color: Vec<Magnitude>,
}

impl SelectionTrack {
    fn from_isochrone(
        track: &IsochroneTrack,
        detection_band: &str,
        color_band: &str,
        maxlabel: EvolutionaryStage,
    ) -> Result<Self, GapcastError> {
        let det = track.band(detection_band)?;
        let col = track.band(color_band)?;

        let mut out = SelectionTrack {
            masses: Vec::new(),
            stages: Vec::new(),
            abs_mag: Vec::new(),
            color: Vec::new(),
        };
        for i in 0..track.len() {
            if track.stages[i] > maxlabel {
                continue;
            }
            out.masses.push(track.masses[i]);
            out.stages.push(track.stages[i]);
            out.abs_mag.push(det[i]);
            out.color.push(det[i] - col[i]);
        }

        if out.masses.len() < 2 {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "track (age={}, feh={}) keeps fewer than two points up to {maxlabel}",
                track.age, track.feh
            )));
        }
        Ok(out)
    }

    fn mass_range(&self) -> (SolarMass, SolarMass) {
        (self.masses[0], self.masses[self.masses.len() - 1])
    }

    /// Linear interpolation of (abs_mag, color) at `mass`, clamped to the track ends.
    fn interpolate(&self, mass: SolarMass) -> (Magnitude, Magnitude) {
        let n = self.masses.len();
        let i = self
            .masses
            .partition_point(|m| *m <= mass)
            .saturating_sub(1)
            .min(n - 2);
        let t = ((mass - self.masses[i]) / (self.masses[i + 1] - self.masses[i])).clamp(0.0, 1.0);
        (
            self.abs_mag[i] + t * (self.abs_mag[i + 1] - self.abs_mag[i]),
            self.color[i] + t * (self.color[i + 1] - self.color[i]),
        )
    }

    fn stage_at(&self, mass: SolarMass) -> EvolutionaryStage {
        let i = self.masses.partition_point(|m| *m <= mass).saturating_sub(1);
        self.stages[i]
    }
}

/// Isochrone of one stellar population, as seen in one survey's bands.
#[derive(Debug, Clone, PartialEq)]
pub struct Locus {
    pub masses: Vec<SolarMass>,
    pub stages: Vec<EvolutionaryStage>,
    pub abs_mag: Vec<Magnitude>,
    pub color: Vec<Magnitude>,
}

impl Locus {
    pub fn min_mass(&self) -> SolarMass {
        self.masses[0]
    }

    pub fn max_mass(&self) -> SolarMass {
        self.masses[self.masses.len() - 1]
    }

    /// Absolute magnitude and colour at `mass`, `None` outside the locus.
    pub fn at_mass(&self, mass: SolarMass) -> Option<(Magnitude, Magnitude)> {
        if mass < self.min_mass() || mass > self.max_mass() {
            return None;
        }
        let n = self.masses.len();
        let i = self
            .masses
            .partition_point(|m| *m <= mass)
            .saturating_sub(1)
            .min(n - 2);
        let t = (mass - self.masses[i]) / (self.masses[i + 1] - self.masses[i]);
        Some((
            self.abs_mag[i] + t * (self.abs_mag[i + 1] - self.abs_mag[i]),
            self.color[i] + t * (self.color[i + 1] - self.color[i]),
        ))
    }

    /// Colours of every branch of the locus crossing the absolute magnitude `abs_mag`.
    pub fn branch_colors(&self, abs_mag: Magnitude) -> Vec<Magnitude> {
        let mut colors = Vec::new();
        for i in 0..self.masses.len() - 1 {
            let (m0, m1) = (self.abs_mag[i], self.abs_mag[i + 1]);
            let (lo, hi) = if m0 <= m1 { (m0, m1) } else { (m1, m0) };
            if abs_mag < lo || abs_mag > hi {
                continue;
            }
            if (m1 - m0).abs() < EPS {
                colors.push(self.color[i]);
                colors.push(self.color[i + 1]);
            } else {
                let t = (abs_mag - m0) / (m1 - m0);
                colors.push(self.color[i] + t * (self.color[i + 1] - self.color[i]));
            }
        }
        colors
    }
}

/// Apparent photometry of one star as measured by a survey.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarPhotometry {
    pub mag: Magnitude,
    pub color: Magnitude,
    pub detection_probability: f64,
    pub sigma_mag: Magnitude,
    pub sigma_color: Magnitude,
    pub stage: EvolutionaryStage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsochroneSelectionModel {
    pub survey: SurveyKey,
    pub maxlabel: EvolutionaryStage,
    pub detection_band: String,
    pub color_band: String,
    pub errors: PhotometricErrorModel,
    ages: Vec<Gyr>,
    fehs: Vec<f64>,
    /// Row-major over (age, feh)
    tracks: Vec<SelectionTrack>,
}

impl IsochroneSelectionModel {
    /// Reduce `grid` to the bands of `survey`, keeping the phases up to `maxlabel`.
    pub fn build(
        grid: &IsochroneGrid,
        survey: &SurveyConfig,
        maxlabel: EvolutionaryStage,
    ) -> Result<Self, GapcastError> {
        let tracks = grid
            .tracks()
            .iter()
            .map(|t| {
                SelectionTrack::from_isochrone(
                    t,
                    &survey.detection_band,
                    &survey.color_band,
                    maxlabel,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(IsochroneSelectionModel {
            survey: survey.key.clone(),
            maxlabel,
            detection_band: survey.detection_band.clone(),
            color_band: survey.color_band.clone(),
            errors: survey.errors,
            ages: grid.ages().to_vec(),
            fehs: grid.fehs().to_vec(),
            tracks,
        })
    }

    pub fn ages(&self) -> &[Gyr] {
        &self.ages
    }

    pub fn fehs(&self) -> &[f64] {
        &self.fehs
    }

    /// Whether (age, feh) lies inside the grid.
    pub fn covers(&self, age: Gyr, feh: f64) -> bool {
        bracket(&self.ages, age).is_some() && bracket(&self.fehs, feh).is_some()
    }

    /// Interpolated isochrone of the population (age, feh).
    ///
    /// Return
    /// ----------
    /// * The locus, or [`GapcastError::InvalidParameter`] if the population lies outside
    ///   the grid or the surrounding tracks share no mass range.
    pub fn locus(&self, age: Gyr, feh: f64) -> Result<Locus, GapcastError> {
        let outside = || {
            GapcastError::InvalidParameter(format!(
                "population (age={age}, feh={feh}) lies outside the isochrone grid of {}",
                self.survey
            ))
        };
        let (ia, ta) = bracket(&self.ages, age).ok_or_else(outside)?;
        let (ifeh, tf) = bracket(&self.fehs, feh).ok_or_else(outside)?;
        let ia1 = (ia + 1).min(self.ages.len() - 1);
        let ifeh1 = (ifeh + 1).min(self.fehs.len() - 1);

        let nfeh = self.fehs.len();
        let corners = [
            (&self.tracks[ia * nfeh + ifeh], (1.0 - ta) * (1.0 - tf)),
            (&self.tracks[ia1 * nfeh + ifeh], ta * (1.0 - tf)),
            (&self.tracks[ia * nfeh + ifeh1], (1.0 - ta) * tf),
            (&self.tracks[ia1 * nfeh + ifeh1], ta * tf),
        ];

        let lo = corners
            .iter()
            .map(|(t, _)| t.mass_range().0)
            .fold(f64::NEG_INFINITY, f64::max);
        let hi = corners
            .iter()
            .map(|(t, _)| t.mass_range().1)
            .fold(f64::INFINITY, f64::min);
        if !(lo < hi) {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "tracks around (age={age}, feh={feh}) share no mass range"
            )));
        }

        let (base, _) = corners
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(outside)?;
        let mut masses = vec![lo];
        masses.extend(base.masses.iter().copied().filter(|m| *m > lo && *m < hi));
        masses.push(hi);

        let mut locus = Locus {
            stages: masses.iter().map(|m| base.stage_at(*m)).collect(),
            abs_mag: Vec::with_capacity(masses.len()),
            color: Vec::with_capacity(masses.len()),
            masses,
        };
        for &m in &locus.masses {
            let (mag, color) = corners.iter().fold((0.0, 0.0), |(mag, color), (t, w)| {
                let (tm, tc) = t.interpolate(m);
                (mag + w * tm, color + w * tc)
            });
            locus.abs_mag.push(mag);
            locus.color.push(color);
        }
        Ok(locus)
    }

    /// Photometry of a star of `mass` in the population (age, feh) at distance modulus `dm`.
    ///
    /// Return
    /// ----------
    /// * `Ok(None)` if `mass` falls outside the phases kept by this model.
    pub fn evaluate(
        &self,
        mass: SolarMass,
        age: Gyr,
        feh: f64,
        dm: Magnitude,
    ) -> Result<Option<StarPhotometry>, GapcastError> {
        let locus = self.locus(age, feh)?;
        let Some((abs_mag, color)) = locus.at_mass(mass) else {
            return Ok(None);
        };
        let mag = abs_mag + dm;
        let stage = locus.stages[locus.masses.partition_point(|m| *m <= mass).saturating_sub(1)];
        Ok(Some(StarPhotometry {
            mag,
            color,
            detection_probability: self.errors.detection_probability(mag),
            sigma_mag: self.errors.sigma(mag),
            sigma_color: self.errors.color_sigma(mag, mag - color),
            stage,
        }))
    }
}

/// Lower node index and fractional position of `x` on a sorted axis.
fn bracket(axis: &[f64], x: f64) -> Option<(usize, f64)> {
    let (first, last) = (*axis.first()?, *axis.last()?);
    if x < first - EPS || x > last + EPS {
        return None;
    }
    if axis.len() == 1 {
        return Some((0, 0.0));
    }
    let i = axis
        .partition_point(|v| *v <= x)
        .saturating_sub(1)
        .min(axis.len() - 2);
    let t = ((x - axis[i]) / (axis[i + 1] - axis[i])).clamp(0.0, 1.0);
    Some((i, t))
}
