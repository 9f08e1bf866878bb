//! # Mock stream catalogues
//!
//! [`StreamSampler`] draws stars from the loaded dynamical model of one stream tail,
//! replaying its recorded impacts with perturbers from a [`PerturberModel`], and maps
//! every draw to galactocentric phase space and then to the sky.
//!
//! Every call is an independent draw: reproducibility comes only from the caller's
//! random number generator.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gapcast::sampler::{SampleParams, StreamSampler};
//! use gapcast::stream::StreamConfig;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> Result<(), gapcast::gapcast_errors::GapcastError> {
//! let gd1 = StreamConfig::gd1();
//! // gd1.load(&store, Tail::Trailing)? beforehand
//! let params = SampleParams::builder().n(1000).build()?;
//! let stars = StreamSampler::new(&gd1).sample(&params, &mut StdRng::seed_from_u64(42))?;
//! # Ok(())
//! # }
//! ```
use log::debug;
use nalgebra::Vector6;
use rand::Rng;

use crate::{
    constants::Degree,
    coordinates::{galactocentric_to_observed, ObservedPoint, SkyPosition},
    dynamics::{kicks::PerturberModel, AngleFrequencyTime, Tail},
    gapcast_errors::GapcastError,
    stream::StreamConfig,
};

/// What a mock star carries besides its phase-space point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCoords {
    /// Sky position, distance and velocities in the stream's frame
    #[default]
    Sky,
    /// Galactocentric cartesian coordinates only
    Cartesian,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleParams {
    pub n: usize,
    /// Tail to sample, the stream's own tail when `None`
    pub tail: Option<Tail>,
    pub perturbers: PerturberModel,
    pub coords: OutputCoords,
    /// Keep the frequency-angle-time draw of each star
    pub with_aat: bool,
}

impl SampleParams {
    pub fn builder() -> SampleParamsBuilder {
        SampleParamsBuilder::new()
    }
}

impl Default for SampleParams {
    fn default() -> Self {
        SampleParams {
            n: 1000,
            tail: None,
            perturbers: PerturberModel::default(),
            coords: OutputCoords::Sky,
            with_aat: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SampleParamsBuilder {
    params: SampleParams,
}

impl SampleParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: SampleParams::default(),
        }
    }

    pub fn n(mut self, v: usize) -> Self {
        self.params.n = v;
        self
    }

    pub fn tail(mut self, v: Tail) -> Self {
        self.params.tail = Some(v);
        self
    }

    pub fn perturbers(mut self, v: PerturberModel) -> Self {
        self.params.perturbers = v;
        self
    }

    pub fn coords(mut self, v: OutputCoords) -> Self {
        self.params.coords = v;
        self
    }

    pub fn with_aat(mut self, v: bool) -> Self {
        self.params.with_aat = v;
        self
    }

    pub fn build(self) -> Result<SampleParams, GapcastError> {
        if self.params.n == 0 {
            return Err(GapcastError::InvalidParameter(
                "sample size n must be > 0".into(),
            ));
        }
        Ok(self.params)
    }
}

/// One mock stream star.
#[derive(Debug, Clone, PartialEq)]
pub struct MockStar {
    /// Galactocentric position (kpc) and velocity (km/s)
    pub xv: Vector6<f64>,
    /// Observables in the stream's sky frame, with [`OutputCoords::Sky`]
    pub observed: Option<ObservedPoint>,
    /// `(φ1, φ2)` when the stream has a custom coordinate system
    pub stream_coords: Option<(Degree, Degree)>,
    pub aat: Option<AngleFrequencyTime>,
}

pub struct StreamSampler<'a> {
    stream: &'a StreamConfig,
}

impl<'a> StreamSampler<'a> {
    pub fn new(stream: &'a StreamConfig) -> Self {
        StreamSampler { stream }
    }

    /// Draw `params.n` mock stars.
    ///
    /// The tail's model must be loaded (see [`StreamConfig::load`]).
    ///
    /// Return
    /// ----------
    /// * Exactly `params.n` stars, or [`GapcastError::InvalidSample`] if a draw maps to a
    ///   non-finite phase-space point.
    pub fn sample<R: Rng>(
        &self,
        params: &SampleParams,
        rng: &mut R,
    ) -> Result<Vec<MockStar>, GapcastError> {
        let tail = params.tail.unwrap_or(self.stream.tail);
        let model = self.stream.model(tail)?;
        let aats = model.sample_aat(params.n, &params.perturbers, rng)?;
        debug!(
            "Sampled {} draws of {}_{} with {} impacts",
            aats.len(),
            self.stream.name,
            tail,
            model.nimpact()
        );

        let custom = self.stream.stream_coord.stream_frame();
        aats.into_iter()
            .map(|aat| {
                let xv = model.phase_space(&aat);
                if xv.iter().any(|v| !v.is_finite()) {
                    return Err(GapcastError::InvalidSample(format!(
                        "non-finite phase-space point for {}_{} at t_strip = {}",
                        self.stream.name, tail, aat.t_strip
                    )));
                }

                let observed = match params.coords {
                    OutputCoords::Sky => Some(galactocentric_to_observed(&xv, self.stream.frame)),
                    OutputCoords::Cartesian => None,
                };
                let stream_coords = custom.map(|frame| {
                    let p = galactocentric_to_observed(&xv, frame.base);
                    frame.to_stream(&SkyPosition::new(p.lon, p.lat))
                });

                Ok(MockStar {
                    xv,
                    observed,
                    stream_coords,
                    aat: params.with_aat.then_some(aat),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod sampler_test {
    use super::*;
    use crate::{
        coordinates::{CoordinateSystem, SkyFrame, StreamFrame},
        dynamics::{DynamicalStreamModel, ImpactGeometry, ImpactHistory, TrackPoint},
        stream::Progenitor,
    };
    use nalgebra::Matrix6;
    use rand::{rngs::StdRng, SeedableRng};

    fn model(impacts: ImpactHistory) -> DynamicalStreamModel {
        let track = (0..=10)
            .map(|k| {
                let dangle = -0.5 + 0.1 * k as f64;
                TrackPoint {
                    dangle,
                    xv: Vector6::new(12.0, 12.0 * dangle, 6.0, 0.0, 180.0, 20.0),
                    jacobian: Matrix6::identity(),
                }
            })
            .collect();
        DynamicalStreamModel {
            name: "Toy".into(),
            tail: Tail::Leading,
            ntimes: 1,
            mean_dfreq: 0.05,
            sig_dfreq: 0.01,
            sig_dfreq_perp: 0.005,
            sig_angle: 0.01,
            t_disrupt: 4.0,
            kpc_per_rad: 12.0,
            dfreq_per_kms: [0.005, 0.005],
            track,
            track_width: 0.3,
            impacts,
        }
    }

    fn stream(impacts: ImpactHistory) -> StreamConfig {
        StreamConfig::new(
            "Toy",
            Progenitor {
                distance: 10.0,
                age: 12.0,
                feh: -1.5,
                sigv: 0.5,
                position: SkyPosition::new(0.0, 0.0),
            },
            1,
            "SDSS",
            100,
        )
        .unwrap()
        .with_model(model(impacts))
        .unwrap()
    }

    #[test]
    fn test_unperturbed_matches_base_sampler() {
        let stream = stream(ImpactHistory::Unperturbed);
        let params = SampleParams::builder()
            .n(50)
            .with_aat(true)
            .build()
            .unwrap();
        let stars = StreamSampler::new(&stream)
            .sample(&params, &mut StdRng::seed_from_u64(7))
            .unwrap();
        let base = stream
            .model(Tail::Leading)
            .unwrap()
            .sample_unperturbed(50, &mut StdRng::seed_from_u64(7))
            .unwrap();

        assert_eq!(stars.len(), 50);
        for (star, aat) in stars.iter().zip(&base) {
            assert_eq!(star.aat.as_ref(), Some(aat));
            assert!(star.observed.is_some());
            assert!(star.stream_coords.is_none());
        }
    }

    #[test]
    fn test_perturbed_sampling_is_reproducible() {
        let impacts = ImpactHistory::from_impacts(vec![ImpactGeometry {
            time: 1.0,
            dangle: 0.05,
            impact_b: 0.0,
            w_par: 50.0,
            w_perp: 150.0,
        }])
        .unwrap();
        let stream = stream(impacts);
        let params = SampleParams::builder()
            .n(20)
            .coords(OutputCoords::Cartesian)
            .build()
            .unwrap();
        let sampler = StreamSampler::new(&stream);
        let a = sampler
            .sample(&params, &mut StdRng::seed_from_u64(3))
            .unwrap();
        let b = sampler
            .sample(&params, &mut StdRng::seed_from_u64(3))
            .unwrap();

        assert_eq!(a, b);
        assert!(a.iter().all(|s| s.observed.is_none() && s.aat.is_none()));
    }

    #[test]
    fn test_custom_frame_coordinates() {
        let frame = StreamFrame::from_pole_and_origin(
            SkyFrame::Galactic,
            SkyPosition::new(0.0, 90.0),
            SkyPosition::new(0.0, 0.0),
        );
        let stream = stream(ImpactHistory::Unperturbed)
            .with_frame(SkyFrame::Galactic)
            .with_stream_coord(CoordinateSystem::Custom(frame));
        let params = SampleParams::builder().n(10).build().unwrap();
        let stars = StreamSampler::new(&stream)
            .sample(&params, &mut StdRng::seed_from_u64(11))
            .unwrap();

        // a pole at b = 90° leaves (φ1, φ2) equal to galactic (l, b), φ1 wrapped
        for star in &stars {
            let obs = star.observed.unwrap();
            let (phi1, phi2) = star.stream_coords.unwrap();
            let l = if obs.lon > 180.0 { obs.lon - 360.0 } else { obs.lon };
            approx::assert_relative_eq!(phi1, l, epsilon = 1e-8);
            approx::assert_relative_eq!(phi2, obs.lat, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_unloaded_tail() {
        let stream = stream(ImpactHistory::Unperturbed);
        let params = SampleParams::builder()
            .tail(Tail::Trailing)
            .build()
            .unwrap();
        let res = StreamSampler::new(&stream).sample(&params, &mut StdRng::seed_from_u64(1));
        assert!(matches!(res, Err(GapcastError::ModelCacheMiss(_))));
        assert!(SampleParams::builder().n(0).build().is_err());
    }
}
