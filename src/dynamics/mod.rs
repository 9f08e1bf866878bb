//! # Dynamical stream models
//!
//! A [`DynamicalStreamModel`] is the cached, already-fitted description of one tail of a
//! tidal stream in frequency-angle-time space. It is never integrated here; it is only
//! queried:
//!
//! - **density** – the along-stream angle distribution of the unperturbed tail
//!   ([`DynamicalStreamModel::density_par`]), its integral over an observed window
//!   ([`DynamicalStreamModel::fraction_in_region`]) and the projected density on the sky
//!   ([`DynamicalStreamModel::density`]);
//! - **sampling** – draws of (frequency offset, angle offset, stripping time), unperturbed
//!   ([`DynamicalStreamModel::sample_unperturbed`]) or replaying the recorded impacts
//!   ([`DynamicalStreamModel::sample_aat`]);
//! - **mapping** – conversion of a draw to galactocentric phase space through the stream
//!   track and its local Jacobian ([`DynamicalStreamModel::phase_space`]).
//!
//! ## Unperturbed model
//!
//! Stars are stripped uniformly over `[0, t_disrupt]` Gyr ago. A star stripped `t` ago has
//!
//! ```text
//! ΔΩ∥ ~ N(±mean_dfreq, sig_dfreq)     ΔΩ⊥ ~ N(0, sig_dfreq_perp)
//! Δθ  = ΔΩ · t + N(0, sig_angle)
//! ```
//!
//! with the `+` sign for the leading tail and `-` for the trailing tail.
//!
//! ## Impacts
//!
//! The recorded impacts are an [`ImpactHistory`]. An unperturbed history returns the
//! base draws untouched; a perturbed one always has a first impact, from which the
//! rewind / kick / re-advance sequence of [`kicks::KickSchedule`] starts.
pub mod kicks;
pub mod model_store;

use std::{fmt, str::FromStr};

use nalgebra::{Matrix6, Vector3, Vector6};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;

use crate::{
    constants::{Degree, Gyr, KmPerSec, Kpc, Radian},
    coordinates::{galactocentric_to_observed, SkyFrame, SkyPosition},
    dynamics::kicks::{KickSchedule, PerturberModel},
    gapcast_errors::GapcastError,
};

/// Number of Simpson intervals used for integrals over stripping time.
const NTIME_QUADRATURE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tail {
    Leading,
    Trailing,
}

impl Tail {
    pub const ALL: [Tail; 2] = [Tail::Leading, Tail::Trailing];

    /// Sign of the mean frequency offset of the tail.
    pub fn sign(&self) -> f64 {
        match self {
            Tail::Leading => 1.0,
            Tail::Trailing => -1.0,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Tail::Leading => 0,
            Tail::Trailing => 1,
        }
    }
}

impl fmt::Display for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tail::Leading => write!(f, "leading"),
            Tail::Trailing => write!(f, "trailing"),
        }
    }
}

impl FromStr for Tail {
    type Err = GapcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "leading" => Ok(Tail::Leading),
            "trailing" => Ok(Tail::Trailing),
            _ => Err(GapcastError::InvalidParameter(format!(
                "Invalid tail: {s}, expected leading or trailing"
            ))),
        }
    }
}

/// Geometry of one recorded encounter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactGeometry {
    /// Look-back time of the impact (Gyr)
    pub time: Gyr,
    /// Along-stream angle of the impact point at the time of impact (rad)
    pub dangle: Radian,
    /// Impact parameter (kpc)
    pub impact_b: Kpc,
    /// Relative velocity of the perturber along the stream (km/s)
    pub w_par: KmPerSec,
    /// Relative velocity of the perturber perpendicular to the stream (km/s)
    pub w_perp: KmPerSec,
}

/// Impacts recorded when the model was built.
///
/// A perturbed history always carries its first (earliest) impact, so nothing that depends
/// on the impact sequence can run on an empty one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum ImpactHistory {
    #[default]
    Unperturbed,
    Perturbed {
        first: ImpactGeometry,
        /// Later impacts, most recent last
        rest: Vec<ImpactGeometry>,
    },
}

impl ImpactHistory {
    /// Order `impacts` from the earliest (largest look-back time) to the most recent.
    pub fn from_impacts(mut impacts: Vec<ImpactGeometry>) -> Result<Self, GapcastError> {
        if let Some(bad) = impacts.iter().find(|i| !(i.time >= 0.0) || !i.time.is_finite()) {
            return Err(GapcastError::InvalidParameter(format!(
                "impact time must be a finite look-back time, got {}",
                bad.time
            )));
        }
        if let Some(bad) = impacts
            .iter()
            .find(|i| !(i.w_par.hypot(i.w_perp) > 0.0) || !(i.impact_b >= 0.0))
        {
            return Err(GapcastError::InvalidParameter(format!(
                "impact at {} Gyr needs a non-zero relative velocity and b >= 0",
                bad.time
            )));
        }
        impacts.sort_by(|a, b| b.time.total_cmp(&a.time));

        let mut iter = impacts.into_iter();
        Ok(match iter.next() {
            None => ImpactHistory::Unperturbed,
            Some(first) => ImpactHistory::Perturbed {
                first,
                rest: iter.collect(),
            },
        })
    }

    pub fn nimpact(&self) -> usize {
        match self {
            ImpactHistory::Unperturbed => 0,
            ImpactHistory::Perturbed { rest, .. } => 1 + rest.len(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImpactGeometry> {
        let (first, rest): (Option<&ImpactGeometry>, &[ImpactGeometry]) = match self {
            ImpactHistory::Unperturbed => (None, &[]),
            ImpactHistory::Perturbed { first, rest } => (Some(first), rest.as_slice()),
        };
        first.into_iter().chain(rest.iter())
    }
}

/// One node of the mean stream track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Along-stream angle offset from the progenitor (rad)
    pub dangle: Radian,
    /// Galactocentric position (kpc) and velocity (km/s) of the track
    pub xv: Vector6<f64>,
    /// ∂(x, v) / ∂(ΔΩ∥, ΔΩ⊥1, ΔΩ⊥2, Δθ∥, Δθ⊥1, Δθ⊥2) around the track
    pub jacobian: Matrix6<f64>,
}

/// One draw in frequency-angle-time space, offsets relative to the progenitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleFrequencyTime {
    /// (∥, ⊥1, ⊥2) frequency offset (rad/Gyr)
    pub dfreq: Vector3<f64>,
    /// (∥, ⊥1, ⊥2) angle offset (rad)
    pub dangle: Vector3<f64>,
    /// Time since stripping (Gyr)
    pub t_strip: Gyr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicalStreamModel {
    pub name: String,
    pub tail: Tail,
    /// Number of impact times the model was built with
    pub ntimes: usize,
    /// Magnitude of the mean parallel frequency offset (rad/Gyr)
    pub mean_dfreq: f64,
    pub sig_dfreq: f64,
    pub sig_dfreq_perp: f64,
    pub sig_angle: Radian,
    pub t_disrupt: Gyr,
    /// Physical length of one radian of along-stream angle (kpc)
    pub kpc_per_rad: Kpc,
    /// Frequency change per unit velocity kick, (∥, ⊥) in rad/Gyr per km/s
    pub dfreq_per_kms: [f64; 2],
    /// Mean track, sorted by increasing `dangle`
    pub track: Vec<TrackPoint>,
    /// Gaussian width of the stream across the track on the sky
    pub track_width: Degree,
    pub impacts: ImpactHistory,
}

impl DynamicalStreamModel {
    /// Check the invariants a deserialized model must satisfy.
    pub fn validate(&self) -> Result<(), GapcastError> {
        let positive = [
            ("mean_dfreq", self.mean_dfreq),
            ("sig_dfreq", self.sig_dfreq),
            ("sig_dfreq_perp", self.sig_dfreq_perp),
            ("sig_angle", self.sig_angle),
            ("t_disrupt", self.t_disrupt),
            ("kpc_per_rad", self.kpc_per_rad),
            ("track_width", self.track_width),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| !(*v > 0.0) || !v.is_finite())
        {
            return Err(GapcastError::InvalidParameter(format!(
                "model {}_{}: {name} must be positive and finite, got {value}",
                self.name, self.tail
            )));
        }
        if self.track.len() < 2 || !self.track.windows(2).all(|w| w[0].dangle < w[1].dangle) {
            return Err(GapcastError::InvalidParameter(format!(
                "model {}_{}: the track needs at least two nodes sorted by angle",
                self.name, self.tail
            )));
        }
        let ordered = ImpactHistory::from_impacts(self.impacts.iter().copied().collect())?;
        if ordered != self.impacts {
            return Err(GapcastError::InvalidParameter(format!(
                "model {}_{}: impacts must be recorded from the earliest to the most recent",
                self.name, self.tail
            )));
        }
        Ok(())
    }

    pub fn nimpact(&self) -> usize {
        self.impacts.nimpact()
    }

    fn mean_signed_dfreq(&self) -> f64 {
        self.tail.sign() * self.mean_dfreq
    }

    /// Mean and spread of the along-stream angle of stars stripped `t` ago.
    fn angle_distribution(&self, t: Gyr) -> (f64, f64) {
        let mean = self.mean_signed_dfreq() * t;
        let sd = (self.sig_dfreq * self.sig_dfreq * t * t + self.sig_angle * self.sig_angle).sqrt();
        (mean, sd)
    }

    /// Average of `f(t)` over the stripping times, by composite Simpson quadrature.
    fn average_over_stripping<F: Fn(Gyr) -> f64>(&self, f: F) -> f64 {
        let h = self.t_disrupt / NTIME_QUADRATURE as f64;
        let sum: f64 = (0..=NTIME_QUADRATURE)
            .map(|k| {
                let w = if k == 0 || k == NTIME_QUADRATURE {
                    1.0
                } else if k % 2 == 1 {
                    4.0
                } else {
                    2.0
                };
                w * f(k as f64 * h)
            })
            .sum();
        sum * h / 3.0 / self.t_disrupt
    }

    /// Probability density of the along-stream angle offset `dangle` (per radian).
    pub fn density_par(&self, dangle: Radian) -> f64 {
        self.average_over_stripping(|t| {
            let (mean, sd) = self.angle_distribution(t);
            let z = (dangle - mean) / sd;
            (-0.5 * z * z).exp() / (sd * (2.0 * std::f64::consts::PI).sqrt())
        })
    }

    /// Fraction of the tail's stars with along-stream angle in `[lo, hi]`.
    pub fn fraction_in_region(&self, lo: Radian, hi: Radian) -> f64 {
        if hi <= lo {
            return 0.0;
        }
        let frac = self.average_over_stripping(|t| {
            let (mean, sd) = self.angle_distribution(t);
            let cdf = |x: f64| 0.5 * (1.0 + erf((x - mean) / (sd * std::f64::consts::SQRT_2)));
            cdf(hi) - cdf(lo)
        });
        frac.clamp(0.0, 1.0)
    }

    /// Track segment holding `dangle` and the position inside it, `None` below two nodes.
    fn track_bracket(&self, dangle: Radian) -> Option<(usize, f64)> {
        let last = self.track.len().checked_sub(2)?;
        let i = self
            .track
            .partition_point(|p| p.dangle <= dangle)
            .saturating_sub(1)
            .min(last);
        let (a, b) = (&self.track[i], &self.track[i + 1]);
        let t = ((dangle - a.dangle) / (b.dangle - a.dangle)).clamp(0.0, 1.0);
        Some((i, t))
    }

    /// Galactocentric phase-space point of a draw.
    ///
    /// The track is interpolated at the draw's along-stream angle (clamped to the track
    /// ends) and the remaining offsets are mapped through the local Jacobian. A model
    /// without a usable track maps every draw to NaN.
    pub fn phase_space(&self, aat: &AngleFrequencyTime) -> Vector6<f64> {
        let Some((i, t)) = self.track_bracket(aat.dangle[0]) else {
            return Vector6::repeat(f64::NAN);
        };
        let (a, b) = (&self.track[i], &self.track[i + 1]);
        let xv = a.xv.lerp(&b.xv, t);
        let jacobian = a.jacobian * (1.0 - t) + b.jacobian * t;

        let offset = Vector6::new(
            aat.dfreq[0] - self.mean_signed_dfreq(),
            aat.dfreq[1],
            aat.dfreq[2],
            0.0,
            aat.dangle[1],
            aat.dangle[2],
        );
        xv + jacobian * offset
    }

    /// Stream density at `position` of `frame`, as a fraction of the tail's stars per deg².
    ///
    /// Uses the track node nearest to `position` and a Gaussian cross-track profile of
    /// width `track_width`.
    pub fn density(&self, position: &SkyPosition, frame: SkyFrame) -> f64 {
        if self.track.len() < 2 {
            return 0.0;
        }
        let sky: Vec<SkyPosition> = self
            .track
            .iter()
            .map(|p| {
                let obs = galactocentric_to_observed(&p.xv, frame);
                SkyPosition::new(obs.lon, obs.lat)
            })
            .collect();

        let Some((i, sep)) = sky
            .iter()
            .map(|s| s.separation(position))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return 0.0;
        };

        let j = if i + 1 < sky.len() { i + 1 } else { i - 1 };
        let deg_per_rad =
            sky[i].separation(&sky[j]) / (self.track[j].dangle - self.track[i].dangle).abs();
        if !(deg_per_rad > 0.0) {
            return 0.0;
        }

        let w = self.track_width;
        let cross = (-0.5 * (sep / w).powi(2)).exp() / (w * (2.0 * std::f64::consts::PI).sqrt());
        self.density_par(self.track[i].dangle) / deg_per_rad * cross
    }

    /// Draws from the unperturbed model. Fails on a model that does not pass
    /// [`DynamicalStreamModel::validate`].
    pub fn sample_unperturbed<R: Rng>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<AngleFrequencyTime>, GapcastError> {
        self.validate()?;
        let par = Normal::new(self.mean_signed_dfreq(), self.sig_dfreq)?;
        let perp = Normal::new(0.0, self.sig_dfreq_perp)?;
        let spread = Normal::new(0.0, self.sig_angle)?;

        Ok((0..n)
            .map(|_| {
                let t_strip = rng.random_range(0.0..self.t_disrupt);
                let dfreq = Vector3::new(par.sample(rng), perp.sample(rng), perp.sample(rng));
                let noise = Vector3::new(spread.sample(rng), spread.sample(rng), spread.sample(rng));
                AngleFrequencyTime {
                    dfreq,
                    dangle: dfreq * t_strip + noise,
                    t_strip,
                }
            })
            .collect())
    }

    /// Draws consistent with the recorded impact history.
    ///
    /// Without impacts this is exactly [`DynamicalStreamModel::sample_unperturbed`]. With
    /// impacts, the perturbers of every impact are drawn first, then each base draw is
    /// rewound to the first impact, kicked at every impact it had already been stripped
    /// for, and advanced back to the present.
    pub fn sample_aat<R: Rng>(
        &self,
        n: usize,
        perturbers: &PerturberModel,
        rng: &mut R,
    ) -> Result<Vec<AngleFrequencyTime>, GapcastError> {
        match &self.impacts {
            ImpactHistory::Unperturbed => self.sample_unperturbed(n, rng),
            ImpactHistory::Perturbed { first, rest } => {
                let schedule = KickSchedule::draw(first, rest, perturbers, rng);
                let draws = self.sample_unperturbed(n, rng)?;
                Ok(draws
                    .iter()
                    .map(|aat| schedule.apply(aat, self.kpc_per_rad, self.dfreq_per_kms))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod dynamics_test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn straight_model(tail: Tail) -> DynamicalStreamModel {
        // A straight track along galactocentric y, 20 kpc from the centre
        let track = (0..=20)
            .map(|k| {
                let dangle = -1.0 + 0.1 * k as f64;
                TrackPoint {
                    dangle,
                    xv: Vector6::new(20.0, 20.0 * dangle, 5.0, 0.0, 200.0, 0.0),
                    jacobian: Matrix6::identity(),
                }
            })
            .collect();
        DynamicalStreamModel {
            name: "Toy".into(),
            tail,
            ntimes: 1,
            mean_dfreq: 0.1,
            sig_dfreq: 0.02,
            sig_dfreq_perp: 0.01,
            sig_angle: 0.01,
            t_disrupt: 5.0,
            kpc_per_rad: 20.0,
            dfreq_per_kms: [0.01, 0.01],
            track,
            track_width: 0.2,
            impacts: ImpactHistory::Unperturbed,
        }
    }

    #[test]
    fn test_tail_parse_and_display() {
        for tail in Tail::ALL {
            assert_eq!(tail.to_string().parse::<Tail>().unwrap(), tail);
        }
        assert!("middle".parse::<Tail>().is_err());
    }

    #[test]
    fn test_impact_history_order() {
        let impact = |time| ImpactGeometry {
            time,
            dangle: 0.1,
            impact_b: 0.0,
            w_par: 100.0,
            w_perp: 100.0,
        };
        let history = ImpactHistory::from_impacts(vec![impact(1.0), impact(3.0), impact(2.0)])
            .unwrap();
        assert_eq!(history.nimpact(), 3);
        let times: Vec<f64> = history.iter().map(|i| i.time).collect();
        assert_eq!(times, vec![3.0, 2.0, 1.0]);

        assert_eq!(
            ImpactHistory::from_impacts(vec![]).unwrap(),
            ImpactHistory::Unperturbed
        );
        assert!(ImpactHistory::from_impacts(vec![impact(-1.0)]).is_err());
    }

    #[test]
    fn test_density_par_normalised() {
        let model = straight_model(Tail::Leading);
        assert_relative_eq!(model.fraction_in_region(-1.0, 2.0), 1.0, epsilon = 1e-6);
        assert!(model.fraction_in_region(-1.0, 0.0) < 0.05);

        // trapezoidal integral of the density over the leading side
        let n = 3000;
        let h = 1.0 / n as f64;
        let integral: f64 = (0..n)
            .map(|k| {
                let x = k as f64 * h;
                0.5 * h * (model.density_par(x) + model.density_par(x + h))
            })
            .sum();
        assert_relative_eq!(integral, model.fraction_in_region(0.0, 1.0), epsilon = 1e-3);
    }

    #[test]
    fn test_trailing_is_mirrored() {
        let leading = straight_model(Tail::Leading);
        let trailing = straight_model(Tail::Trailing);
        assert_relative_eq!(
            leading.density_par(0.3),
            trailing.density_par(-0.3),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_unperturbed_draws() {
        let model = straight_model(Tail::Trailing);
        let mut rng = StdRng::seed_from_u64(7);
        let draws = model.sample_unperturbed(4000, &mut rng).unwrap();
        assert!(draws.iter().all(|d| (0.0..5.0).contains(&d.t_strip)));
        let mean_freq = draws.iter().map(|d| d.dfreq[0]).sum::<f64>() / draws.len() as f64;
        assert_relative_eq!(mean_freq, -0.1, epsilon = 2e-3);
    }

    #[test]
    fn test_phase_space_on_track() {
        let model = straight_model(Tail::Leading);
        let aat = AngleFrequencyTime {
            dfreq: Vector3::new(0.1, 0.0, 0.0),
            dangle: Vector3::new(0.25, 0.0, 0.0),
            t_strip: 2.5,
        };
        let xv = model.phase_space(&aat);
        assert_relative_eq!(xv[1], 5.0, epsilon = 1e-12);
        assert_relative_eq!(xv[4], 200.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sky_density_peaks_on_track() {
        let model = straight_model(Tail::Leading);
        let on_track = galactocentric_to_observed(&model.track[13].xv, SkyFrame::Galactic);
        let on = SkyPosition::new(on_track.lon, on_track.lat);
        let off = SkyPosition::new(on_track.lon, on_track.lat - 1.0);
        let d_on = model.density(&on, SkyFrame::Galactic);
        let d_off = model.density(&off, SkyFrame::Galactic);
        assert!(d_on > 0.0);
        assert!(d_off < d_on * 1e-3);
    }

    #[test]
    fn test_invalid_model_is_not_sampled() {
        let mut rng = StdRng::seed_from_u64(1);

        let mut short = straight_model(Tail::Leading);
        short.track.truncate(1);
        assert!(matches!(
            short.sample_unperturbed(10, &mut rng),
            Err(GapcastError::InvalidParameter(_))
        ));
        let aat = AngleFrequencyTime {
            dfreq: Vector3::zeros(),
            dangle: Vector3::zeros(),
            t_strip: 1.0,
        };
        assert!(short.phase_space(&aat).iter().all(|v| v.is_nan()));

        let mut instant = straight_model(Tail::Leading);
        instant.t_disrupt = 0.0;
        assert!(matches!(
            instant.sample_aat(10, &PerturberModel::default(), &mut rng),
            Err(GapcastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_out_of_order_impacts_are_rejected() {
        let impact = |time| ImpactGeometry {
            time,
            dangle: 0.1,
            impact_b: 0.0,
            w_par: 100.0,
            w_perp: 100.0,
        };
        let mut model = straight_model(Tail::Leading);
        model.impacts = ImpactHistory::from_impacts(vec![impact(0.5), impact(3.0)]).unwrap();
        assert!(model.validate().is_ok());

        // a cache file written with the most recent impact first
        model.impacts = ImpactHistory::Perturbed {
            first: impact(0.5),
            rest: vec![impact(3.0)],
        };
        let json = serde_json::to_string(&model).unwrap();
        let reloaded: DynamicalStreamModel = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            reloaded.validate(),
            Err(GapcastError::InvalidParameter(_))
        ));

        model.impacts = ImpactHistory::Perturbed {
            first: ImpactGeometry {
                w_par: 0.0,
                w_perp: 0.0,
                ..impact(3.0)
            },
            rest: vec![],
        };
        assert!(model.validate().is_err());
    }
}
