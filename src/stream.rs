//! # Stream configurations
//!
//! A [`StreamConfig`] identifies a tidal stream (progenitor population and position, number
//! of impact times, sky frame, optional stream-aligned frame) and owns everything loaded
//! for it during a run:
//!
//! - one [`DynamicalStreamModel`] per tail, loaded on demand by [`StreamConfig::load`];
//! - the [`BackgroundFieldModel`] of its sky patch ([`StreamConfig::load_background`]);
//! - the `nstars` results, survey key → forecast star count, seeded with the count
//!   measured in the stream's reference survey.
//!
//! Loading is explicit and idempotent: each model is read at most once and shared through
//! an [`Arc`]. `nstars` sits behind a lock so forecasts running concurrently on the same
//! stream serialise their writes (last writer wins).
//!
//! Built-in presets: [`StreamConfig::pal5`], [`StreamConfig::gd1`], [`StreamConfig::phoenix`].
use std::{collections::HashMap, sync::Arc};

use ahash::RandomState;
use nalgebra::Matrix3;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::{
    background::{ensure_background, BackgroundFieldModel, BackgroundGenerator},
    constants::{
        distance_modulus, Gyr, KmPerSec, Kpc, Magnitude, Radian, SurveyKey,
        BACKGROUND_PATCH_RADIUS,
    },
    coordinates::{CoordinateSystem, SkyFrame, SkyPosition, StreamFrame},
    dynamics::{model_store::ModelStore, DynamicalStreamModel, Tail},
    env_state::GapcastEnv,
    gapcast_errors::GapcastError,
};

/// Stellar population and position of the stream progenitor.
#[derive(Debug, Clone, PartialEq)]
pub struct Progenitor {
    pub distance: Kpc,
    pub age: Gyr,
    pub feh: f64,
    /// Velocity dispersion of the progenitor (km/s)
    pub sigv: KmPerSec,
    /// Sky position in the stream's frame
    pub position: SkyPosition,
}

fn check_progenitor(progenitor: &Progenitor) -> Result<(), GapcastError> {
    if !(progenitor.distance > 0.0) || !progenitor.distance.is_finite() {
        return Err(GapcastError::InvalidParameter(format!(
            "progenitor distance must be positive, got {}",
            progenitor.distance
        )));
    }
    if !(progenitor.age > 0.0) {
        return Err(GapcastError::InvalidParameter(format!(
            "progenitor age must be positive, got {}",
            progenitor.age
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct StreamConfig {
    pub name: String,
    pub progenitor: Progenitor,
    /// Number of impact times of the dynamical models
    pub ntimes: usize,
    /// Tail covered by the observed region
    pub tail: Tail,
    pub frame: SkyFrame,
    pub stream_coord: CoordinateSystem,
    /// Survey in which the stream's star count is measured
    pub reference_survey: SurveyKey,
    sdf: [OnceCell<Arc<DynamicalStreamModel>>; 2],
    bg: OnceCell<Arc<BackgroundFieldModel>>,
    nstars: RwLock<HashMap<SurveyKey, u64, RandomState>>,
}

impl StreamConfig {
    /// New stream whose count in `reference_survey` is `reference_count`.
    pub fn new(
        name: impl Into<String>,
        progenitor: Progenitor,
        ntimes: usize,
        reference_survey: impl Into<SurveyKey>,
        reference_count: u64,
    ) -> Result<Self, GapcastError> {
        check_progenitor(&progenitor)?;
        Ok(Self::from_parts(
            name.into(),
            progenitor,
            ntimes,
            reference_survey.into(),
            reference_count,
        ))
    }

    fn from_parts(
        name: String,
        progenitor: Progenitor,
        ntimes: usize,
        reference_survey: SurveyKey,
        reference_count: u64,
    ) -> Self {
        let mut nstars = HashMap::default();
        nstars.insert(reference_survey.clone(), reference_count);

        StreamConfig {
            name,
            progenitor,
            ntimes,
            tail: Tail::Leading,
            frame: SkyFrame::default(),
            stream_coord: CoordinateSystem::Default,
            reference_survey,
            sdf: [OnceCell::new(), OnceCell::new()],
            bg: OnceCell::new(),
            nstars: RwLock::new(nstars),
        }
    }

    pub fn with_frame(mut self, frame: SkyFrame) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_tail(mut self, tail: Tail) -> Self {
        self.tail = tail;
        self
    }

    pub fn with_stream_coord(mut self, coord: CoordinateSystem) -> Self {
        self.stream_coord = coord;
        self
    }

    /// Use an already-built dynamical model for its tail instead of the cache.
    pub fn with_model(mut self, model: DynamicalStreamModel) -> Result<Self, GapcastError> {
        model.validate()?;
        let idx = model.tail.index();
        self.sdf[idx] = OnceCell::from(Arc::new(model));
        Ok(self)
    }

    /// Use an already-loaded background catalog instead of the data directory.
    pub fn with_background(mut self, bg: BackgroundFieldModel) -> Self {
        self.bg = OnceCell::from(Arc::new(bg));
        self
    }

    /// Palomar 5, star count measured in CFHT.
    pub fn pal5() -> Self {
        Self::preset(
            "Pal5",
            Progenitor {
                distance: 23.2,
                age: 11.5,
                feh: -1.3,
                sigv: 0.5,
                position: SkyPosition::new(229.018, -0.124),
            },
            "CFHT",
            3200,
        )
    }

    /// GD-1, star count measured in SDSS, with the (φ1, φ2) frame of Koposov et al. (2010).
    pub fn gd1() -> Self {
        let koposov = Matrix3::new(
            -0.4776303088,
            -0.1738432154,
            0.8611897727,
            0.510844589,
            -0.8524449229,
            0.111245042,
            0.7147776536,
            0.4930681392,
            0.4959603976,
        );
        Self::preset(
            "GD1",
            Progenitor {
                distance: 8.0,
                age: 12.0,
                feh: -2.2,
                sigv: 0.3,
                position: SkyPosition::new(149.1, 36.0),
            },
            "SDSS",
            1800,
        )
        .with_tail(Tail::Trailing)
        .with_stream_coord(CoordinateSystem::Custom(StreamFrame::new(
            SkyFrame::Equatorial,
            koposov,
        )))
    }

    /// Phoenix, star count measured in DES.
    pub fn phoenix() -> Self {
        Self::preset(
            "Phoenix",
            Progenitor {
                distance: 17.5,
                age: 13.0,
                feh: -2.7,
                sigv: 0.2,
                position: SkyPosition::new(27.0, -47.0),
            },
            "DES",
            1000,
        )
    }

    fn preset(name: &str, progenitor: Progenitor, reference: &str, count: u64) -> Self {
        Self::from_parts(name.to_string(), progenitor, 64, reference.to_string(), count)
    }

    /// Preset by (case-insensitive) name.
    pub fn from_name(name: &str) -> Result<Self, GapcastError> {
        match name.to_ascii_lowercase().replace(['-', ' '], "").as_str() {
            "pal5" => Ok(Self::pal5()),
            "gd1" => Ok(Self::gd1()),
            "phoenix" => Ok(Self::phoenix()),
            _ => Err(GapcastError::UnknownStream(name.to_string())),
        }
    }

    pub fn presets() -> Vec<Self> {
        vec![Self::pal5(), Self::gd1(), Self::phoenix()]
    }

    pub fn distance_modulus(&self) -> Magnitude {
        distance_modulus(self.progenitor.distance)
    }

    /// Load the dynamical model of `tail` from `store`, once.
    pub fn load(
        &self,
        store: &ModelStore,
        tail: Tail,
    ) -> Result<Arc<DynamicalStreamModel>, GapcastError> {
        self.sdf[tail.index()]
            .get_or_try_init(|| store.load(&self.name, self.ntimes, tail).map(Arc::new))
            .cloned()
    }

    /// Load both tails.
    pub fn load_all(&self, store: &ModelStore) -> Result<(), GapcastError> {
        for tail in Tail::ALL {
            self.load(store, tail)?;
        }
        Ok(())
    }

    /// The loaded model of `tail`, or [`GapcastError::ModelCacheMiss`] if not loaded yet.
    pub fn model(&self, tail: Tail) -> Result<Arc<DynamicalStreamModel>, GapcastError> {
        self.sdf[tail.index()].get().cloned().ok_or_else(|| {
            GapcastError::ModelCacheMiss(format!(
                "{}_{}_{} is not loaded",
                self.name, self.ntimes, tail
            ))
        })
    }

    /// Generate the background catalog with `generator` unless it already exists.
    pub fn ensure_background(
        &self,
        env: &GapcastEnv,
        generator: &dyn BackgroundGenerator,
    ) -> Result<(), GapcastError> {
        ensure_background(
            env,
            &self.name,
            &self.progenitor.position,
            self.frame,
            BACKGROUND_PATCH_RADIUS,
            generator,
        )
        .map(|_| ())
    }

    /// Load the background catalog from the data directory, once.
    pub fn load_background(
        &self,
        env: &GapcastEnv,
    ) -> Result<Arc<BackgroundFieldModel>, GapcastError> {
        self.bg
            .get_or_try_init(|| {
                BackgroundFieldModel::from_csv_path(&env.background_path(&self.name))
                    .map(Arc::new)
            })
            .cloned()
    }

    pub fn background(&self) -> Result<Arc<BackgroundFieldModel>, GapcastError> {
        self.bg.get().cloned().ok_or_else(|| {
            GapcastError::BackgroundNotFound(format!("{} background is not loaded", self.name))
        })
    }

    pub fn nstars(&self, survey: &str) -> Option<u64> {
        self.nstars.read().get(survey).copied()
    }

    pub fn set_nstars(&self, survey: impl Into<SurveyKey>, count: u64) {
        self.nstars.write().insert(survey.into(), count);
    }

    /// Expected number of stars of `tail` seen by `survey` with along-stream angle in
    /// `[lo, hi]`.
    ///
    /// The survey's count must be known and is split evenly between the two tails; the
    /// tail's model must be loaded.
    pub fn count_in_region(
        &self,
        survey: &str,
        tail: Tail,
        lo: Radian,
        hi: Radian,
    ) -> Result<f64, GapcastError> {
        let total = self
            .nstars(survey)
            .ok_or_else(|| GapcastError::MissingReferenceCount {
                stream: self.name.clone(),
                survey: survey.to_string(),
            })?;
        let model = self.model(tail)?;
        Ok(0.5 * total as f64 * model.fraction_in_region(lo, hi))
    }

    /// Copy of the `nstars` results, sorted by survey key.
    pub fn nstars_snapshot(&self) -> Vec<(SurveyKey, u64)> {
        let mut out: Vec<_> = self
            .nstars
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod stream_test {
    use super::*;
    use camino::Utf8Path;

    #[test]
    fn test_presets() {
        let pal5 = StreamConfig::from_name("Pal 5").unwrap();
        assert_eq!(pal5.nstars("CFHT"), Some(3200));
        assert_eq!(pal5.nstars("SDSS"), None);
        assert!(pal5.stream_coord.stream_frame().is_none());

        let gd1 = StreamConfig::from_name("GD-1").unwrap();
        assert!(gd1.stream_coord.stream_frame().is_some());
        assert_eq!(
            StreamConfig::from_name("Orphan").unwrap_err(),
            GapcastError::UnknownStream("Orphan".into())
        );
        assert_eq!(StreamConfig::presets().len(), 3);
        for preset in StreamConfig::presets() {
            assert!(check_progenitor(&preset.progenitor).is_ok());
            assert_eq!(preset.ntimes, 64);
        }

        let mut far = StreamConfig::phoenix().progenitor;
        far.distance = 0.0;
        assert!(matches!(
            StreamConfig::new("Far", far, 64, "DES", 10),
            Err(GapcastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_gd1_frame_puts_stream_on_equator() {
        // a point of the GD-1 track, (ra, dec) ≈ (160, 45.7), lies near φ2 = 0
        let gd1 = StreamConfig::gd1();
        let frame = gd1.stream_coord.stream_frame().unwrap();
        let (_, phi2) = frame.to_stream(&SkyPosition::new(160.0, 45.7));
        assert!(phi2.abs() < 1.5);
    }

    #[test]
    fn test_load_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let env = GapcastEnv::new(root, root);
        let pal5 = StreamConfig::pal5();
        let store = ModelStore::new(env.clone());
        assert!(matches!(
            pal5.load(&store, Tail::Leading),
            Err(GapcastError::ModelCacheMiss(_))
        ));
        assert!(pal5.model(Tail::Leading).is_err());
        assert!(matches!(
            pal5.load_background(&env),
            Err(GapcastError::BackgroundNotFound(_))
        ));
    }

    #[test]
    fn test_count_in_region() {
        use crate::dynamics::{ImpactHistory, TrackPoint};
        use nalgebra::{Matrix6, Vector6};

        let track = [-1.0, 1.0]
            .iter()
            .map(|&dangle| TrackPoint {
                dangle,
                xv: Vector6::new(10.0, dangle, 0.0, 0.0, 200.0, 0.0),
                jacobian: Matrix6::identity(),
            })
            .collect();
        let model = DynamicalStreamModel {
            name: "Pal5".into(),
            tail: Tail::Leading,
            ntimes: 64,
            mean_dfreq: 0.1,
            sig_dfreq: 0.01,
            sig_dfreq_perp: 0.01,
            sig_angle: 0.01,
            t_disrupt: 4.0,
            kpc_per_rad: 23.0,
            dfreq_per_kms: [0.01, 0.01],
            track,
            track_width: 0.1,
            impacts: ImpactHistory::Unperturbed,
        };
        let mut short = model.clone();
        short.track.truncate(1);
        assert!(matches!(
            StreamConfig::pal5().with_model(short),
            Err(GapcastError::InvalidParameter(_))
        ));
        let pal5 = StreamConfig::pal5().with_model(model).unwrap();

        let all = pal5.count_in_region("CFHT", Tail::Leading, -1.0, 2.0).unwrap();
        assert!((all - 1600.0).abs() < 1e-3);
        let part = pal5.count_in_region("CFHT", Tail::Leading, 0.0, 0.2).unwrap();
        assert!(part > 0.0 && part < all);
        assert!(pal5.count_in_region("SDSS", Tail::Leading, 0.0, 0.2).is_err());
        assert!(pal5.count_in_region("CFHT", Tail::Trailing, 0.0, 0.2).is_err());
    }

    #[test]
    fn test_nstars_last_writer_wins() {
        let pal5 = StreamConfig::pal5();
        pal5.set_nstars("LSST1", 10);
        pal5.set_nstars("LSST1", 12);
        assert_eq!(
            pal5.nstars_snapshot(),
            vec![("CFHT".to_string(), 3200), ("LSST1".to_string(), 12)]
        );
    }
}
