//! # Isochrone interpolation cache
//!
//! Building an [`IsochroneSelectionModel`] is done once per (survey, maxlabel) and reused.
//! [`IsoInterpCache`] keeps built models in memory and on disk under
//! `<local>/iso_interps/<survey>_<maxlabel>.json`, and attaches them to the
//! [`SurveyConfig`] they belong to.
//!
//! The `remake` / `save` flags of [`IsoInterpCache::load_iso_interps`] control refresh and
//! persistence:
//!
//! | remake | save  | behaviour                                                        |
//! |--------|-------|------------------------------------------------------------------|
//! | false  | any   | memory, then disk; [`GapcastError::IsochroneCacheMiss`] if absent |
//! | true   | false | rebuild from the grid, keep in memory only                       |
//! | true   | true  | rebuild from the grid and write the cache file                   |
use std::{collections::HashMap, sync::Arc};

use ahash::RandomState;
use log::{debug, info};
use parking_lot::RwLock;

use crate::{
    constants::SurveyKey,
    env_state::{write_atomically, GapcastEnv},
    gapcast_errors::GapcastError,
    photometry::{
        isochrone::IsochroneGrid, selection::IsochroneSelectionModel, surveys::SurveyConfig,
        EvolutionaryStage,
    },
};

type CacheKey = (SurveyKey, EvolutionaryStage);

#[derive(Debug)]
pub struct IsoInterpCache {
    env: GapcastEnv,
    models: RwLock<HashMap<CacheKey, Arc<IsochroneSelectionModel>, RandomState>>,
}

impl IsoInterpCache {
    pub fn new(env: GapcastEnv) -> Self {
        IsoInterpCache {
            env,
            models: RwLock::new(HashMap::default()),
        }
    }

    /// Load (or rebuild) the selection model of `survey` up to `maxlabel` and attach it.
    ///
    /// Arguments
    /// -----------------
    /// * `survey`: the survey whose bands and error model drive the selection.
    /// * `maxlabel`: last evolutionary phase kept in the model.
    /// * `grid`: isochrone grid to build from; required when `remake` is set.
    /// * `remake`: rebuild instead of reading the cache.
    /// * `save`: write the rebuilt model to disk.
    ///
    /// Return
    /// ----------
    /// * The shared selection model. Two successive calls without `remake` return the
    ///   same contents.
    pub fn load_iso_interps(
        &self,
        survey: &SurveyConfig,
        maxlabel: EvolutionaryStage,
        grid: Option<&IsochroneGrid>,
        remake: bool,
        save: bool,
    ) -> Result<Arc<IsochroneSelectionModel>, GapcastError> {
        let key = (survey.key.clone(), maxlabel);
        let path = self.env.iso_interp_path(&survey.key, maxlabel);

        let in_memory = self.models.read().get(&key).cloned();

        let model = if remake {
            let grid = grid.ok_or_else(|| {
                GapcastError::InvalidParameter(format!(
                    "rebuilding the {} selection model needs an isochrone grid",
                    survey.key
                ))
            })?;
            let model = Arc::new(IsochroneSelectionModel::build(grid, survey, maxlabel)?);
            info!("Built isochrone selection model {}_{maxlabel}", survey.key);
            if save {
                write_atomically(&path, &serde_json::to_vec(model.as_ref())?)?;
                info!("Saved isochrone selection model to {path}");
            }
            self.models.write().insert(key, model.clone());
            model
        } else if let Some(model) = in_memory {
            debug!("Isochrone selection model {}_{maxlabel} found in memory", survey.key);
            model
        } else {
            if !path.exists() {
                return Err(GapcastError::IsochroneCacheMiss(path.to_string()));
            }
            let model: IsochroneSelectionModel = serde_json::from_slice(&std::fs::read(&path)?)?;
            if model.survey != survey.key || model.maxlabel != maxlabel {
                return Err(GapcastError::InvalidParameter(format!(
                    "cache {path} holds {}_{} instead of {}_{maxlabel}",
                    model.survey, model.maxlabel, survey.key
                )));
            }
            info!("Loaded isochrone selection model from {path}");
            let model = Arc::new(model);
            self.models.write().insert(key, model.clone());
            model
        };

        survey.attach_selection_model(model.clone());
        Ok(model)
    }

    /// Drop every in-memory model; cache files are kept.
    pub fn clear(&self) {
        self.models.write().clear();
    }
}

#[cfg(test)]
mod iso_cache_test {
    use super::*;
    use crate::photometry::{isochrone::IsochroneTrack, PhotometricErrorModel};
    use camino::Utf8Path;

    fn grid() -> IsochroneGrid {
        use EvolutionaryStage::*;
        let track = IsochroneTrack::new(
            12.0,
            -1.5,
            vec![0.3, 0.6, 0.8, 0.82],
            vec![MainSequence, MainSequence, SubGiant, Rgb],
        )
        .unwrap()
        .with_band("g", vec![10.0, 6.5, 3.5, 0.5])
        .unwrap()
        .with_band("r", vec![9.0, 6.0, 3.1, -0.2])
        .unwrap();
        IsochroneGrid::new(vec![track]).unwrap()
    }

    #[test]
    fn test_cache_miss_then_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let cache = IsoInterpCache::new(GapcastEnv::new(root, root));
        let errors = PhotometricErrorModel::new(24.0, 0.01, 0.1).unwrap();
        let survey = SurveyConfig::new("TEST", "g", "r", errors, 100.0).unwrap();

        let miss = cache
            .load_iso_interps(&survey, EvolutionaryStage::Rgb, None, false, false)
            .unwrap_err();
        assert!(matches!(miss, GapcastError::IsochroneCacheMiss(_)));
        assert!(cache
            .load_iso_interps(&survey, EvolutionaryStage::Rgb, None, true, false)
            .is_err());

        let built = cache
            .load_iso_interps(&survey, EvolutionaryStage::Rgb, Some(&grid()), true, true)
            .unwrap();
        assert_eq!(survey.loaded_stages(), vec![EvolutionaryStage::Rgb]);

        cache.clear();
        let from_disk = cache
            .load_iso_interps(&survey, EvolutionaryStage::Rgb, None, false, false)
            .unwrap();
        assert_eq!(*built, *from_disk);
    }
}
