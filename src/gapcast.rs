//! # Gapcast: environment, surveys and caches
//!
//! [`Gapcast`] wires together everything a forecast run shares:
//!
//! 1. **Environment** ([`GapcastEnv`]) – the data and local directories every file lives in.
//! 2. **Survey registry** ([`SurveyRegistry`]) – the built-in surveys plus any registered
//!    ones.
//! 3. **Isochrone cache** ([`IsoInterpCache`]) – selection models per (survey, maxlabel).
//! 4. **Model store** ([`ModelStore`]) – cached dynamical models per (stream, tail).
//!
//! Streams are not owned by the façade: a [`StreamConfig`] is prepared once with
//! [`Gapcast::prepare_stream`] and then shared (typically behind an [`Arc`]) between
//! forecasts and samplers.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use std::sync::Arc;
//! use gapcast::forecast::{ForecastParams, SurveyTargets};
//! use gapcast::gapcast::Gapcast;
//! use gapcast::photometry::EvolutionaryStage;
//! use gapcast::stream::StreamConfig;
//!
//! # fn main() -> Result<(), gapcast::gapcast_errors::GapcastError> {
//! let gapcast = Gapcast::from_env()?;
//! for key in gapcast.registry().keys() {
//!     gapcast.load_iso_interps(&key, EvolutionaryStage::Rgb, None, false, false)?;
//! }
//!
//! let streams = StreamConfig::presets()
//!     .into_iter()
//!     .map(Arc::new)
//!     .collect::<Vec<_>>();
//! for stream in &streams {
//!     gapcast.prepare_stream(stream, None)?;
//! }
//!
//! let table = gapcast.forecast(&streams, &SurveyTargets::AllRegistered, &ForecastParams::default());
//! println!("{table}");
//! # Ok(())
//! # }
//! ```
use std::sync::Arc;

use log::info;

use crate::{
    background::BackgroundGenerator,
    dynamics::model_store::{BuildOutcome, BuildTask, ModelStore, StreamModelBuilder},
    env_state::GapcastEnv,
    forecast::{table::ForecastTable, ForecastParams, SurveyTargets},
    gapcast_errors::GapcastError,
    photometry::{
        iso_cache::IsoInterpCache,
        isochrone::IsochroneGrid,
        selection::IsochroneSelectionModel,
        surveys::{SurveyConfig, SurveyRegistry},
        EvolutionaryStage,
    },
    stream::StreamConfig,
};

#[derive(Debug)]
pub struct Gapcast {
    env: GapcastEnv,
    registry: SurveyRegistry,
    iso_cache: IsoInterpCache,
    model_store: ModelStore,
}

impl Gapcast {
    /// Construct a [`Gapcast`] context over `env`, with the built-in surveys registered.
    ///
    /// Nothing is read from disk yet: selection models, dynamical models and background
    /// catalogs are loaded on request.
    pub fn new(env: GapcastEnv) -> Result<Self, GapcastError> {
        Ok(Gapcast {
            registry: SurveyRegistry::presets()?,
            iso_cache: IsoInterpCache::new(env.clone()),
            model_store: ModelStore::new(env.clone()),
            env,
        })
    }

    /// Same as [`Gapcast::new`] with the directories taken from the environment variables.
    pub fn from_env() -> Result<Self, GapcastError> {
        Self::new(GapcastEnv::from_env()?)
    }

    pub fn env(&self) -> &GapcastEnv {
        &self.env
    }

    pub fn registry(&self) -> &SurveyRegistry {
        &self.registry
    }

    pub fn model_store(&self) -> &ModelStore {
        &self.model_store
    }

    pub fn iso_cache(&self) -> &IsoInterpCache {
        &self.iso_cache
    }

    /// Register a survey, replacing any survey with the same key.
    pub fn register_survey(&mut self, survey: SurveyConfig) -> Arc<SurveyConfig> {
        self.registry.register(survey)
    }

    pub fn survey(&self, key: &str) -> Result<Arc<SurveyConfig>, GapcastError> {
        self.registry.get(key)
    }

    /// Load (or rebuild) the selection model of the registered survey `key`.
    ///
    /// See [`IsoInterpCache::load_iso_interps`] for the `remake` / `save` semantics.
    pub fn load_iso_interps(
        &self,
        key: &str,
        maxlabel: EvolutionaryStage,
        grid: Option<&IsochroneGrid>,
        remake: bool,
        save: bool,
    ) -> Result<Arc<IsochroneSelectionModel>, GapcastError> {
        let survey = self.registry.get(key)?;
        self.iso_cache
            .load_iso_interps(&survey, maxlabel, grid, remake, save)
    }

    /// Load both dynamical models and the background catalog of `stream`.
    ///
    /// With a `generator`, a missing background catalog is generated first.
    pub fn prepare_stream(
        &self,
        stream: &StreamConfig,
        generator: Option<&dyn BackgroundGenerator>,
    ) -> Result<(), GapcastError> {
        stream.load_all(&self.model_store)?;
        if let Some(generator) = generator {
            stream.ensure_background(&self.env, generator)?;
        }
        stream.load_background(&self.env)?;
        info!("Stream {} ready", stream.name);
        Ok(())
    }

    /// Build the dynamical models of `tasks` on a worker pool.
    pub fn build_models(
        &self,
        tasks: &[BuildTask],
        builder: &dyn StreamModelBuilder,
        threads: Option<usize>,
        overwrite: bool,
    ) -> Result<Vec<BuildOutcome>, GapcastError> {
        self.model_store.build_all(tasks, builder, threads, overwrite)
    }

    /// Forecast star counts and confusion counts of every stream in every target survey.
    pub fn forecast(
        &self,
        streams: &[Arc<StreamConfig>],
        targets: &SurveyTargets,
        params: &ForecastParams,
    ) -> ForecastTable {
        ForecastTable::compute(streams, targets, &self.registry, params)
    }
}
