//! # Survey forecasts
//!
//! Combines a stream's progenitor population with survey selection models to forecast
//! what each survey sees of the stream:
//!
//! - [`confusion::calc_star_bg`] – background stars indistinguishable from stream stars;
//! - [`counts::calc_nstars`] – stream star counts scaled from a reference survey;
//! - [`table::ForecastTable`] – both, over every (stream, survey) pair, in parallel.
//!
//! Every (stream, survey) pair must agree on the sky frame, and the progenitor population
//! must lie inside the survey's isochrone grid; [`check_compatibility`] turns a mismatch
//! into an error instead of a silently biased number.
pub mod confusion;
pub mod counts;
pub mod table;

use std::sync::Arc;

use crate::{
    constants::{Magnitude, SolarMass},
    gapcast_errors::GapcastError,
    photometry::{
        selection::IsochroneSelectionModel,
        surveys::{SurveyConfig, SurveyRegistry},
        EvolutionaryStage,
    },
    stream::StreamConfig,
};

/// Surveys a forecast runs on.
#[derive(Debug, Clone)]
pub enum SurveyTargets {
    Explicit(Vec<Arc<SurveyConfig>>),
    AllRegistered,
}

impl SurveyTargets {
    pub fn resolve(&self, registry: &SurveyRegistry) -> Vec<Arc<SurveyConfig>> {
        match self {
            SurveyTargets::Explicit(surveys) => surveys.clone(),
            SurveyTargets::AllRegistered => registry.iter().cloned().collect(),
        }
    }
}

/// Population assumptions shared by all forecasts of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastParams {
    /// Slope of the stellar mass function, `dN/dM ∝ M^(-imf_alpha)`
    pub imf_alpha: f64,
    /// Lower mass limit of the stellar population
    pub min_stellar_mass: SolarMass,
    /// Last evolutionary phase counted as a stream star
    pub maxlabel: EvolutionaryStage,
    /// Half-width of the colour window around the isochrone (mag)
    pub color_window: Magnitude,
}

impl ForecastParams {
    pub fn builder() -> ForecastParamsBuilder {
        ForecastParamsBuilder::new()
    }
}

impl Default for ForecastParams {
    fn default() -> Self {
        ForecastParams {
            imf_alpha: 2.35,
            min_stellar_mass: 0.1,
            maxlabel: EvolutionaryStage::Rgb,
            color_window: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForecastParamsBuilder {
    params: ForecastParams,
}

impl ForecastParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: ForecastParams::default(),
        }
    }

    pub fn imf_alpha(mut self, v: f64) -> Self {
        self.params.imf_alpha = v;
        self
    }

    pub fn min_stellar_mass(mut self, v: SolarMass) -> Self {
        self.params.min_stellar_mass = v;
        self
    }

    pub fn maxlabel(mut self, v: EvolutionaryStage) -> Self {
        self.params.maxlabel = v;
        self
    }

    pub fn color_window(mut self, v: Magnitude) -> Self {
        self.params.color_window = v;
        self
    }

    pub fn build(self) -> Result<ForecastParams, GapcastError> {
        let p = &self.params;
        if !p.imf_alpha.is_finite() {
            return Err(GapcastError::InvalidParameter(
                "imf_alpha must be finite".into(),
            ));
        }
        if !(p.min_stellar_mass > 0.0) {
            return Err(GapcastError::InvalidParameter(
                "min_stellar_mass must be > 0".into(),
            ));
        }
        if !(p.color_window > 0.0) {
            return Err(GapcastError::InvalidParameter(
                "color_window must be > 0".into(),
            ));
        }
        Ok(self.params)
    }
}

/// Selection model of `survey` for `stream`, after checking they can be combined.
pub fn check_compatibility(
    stream: &StreamConfig,
    survey: &SurveyConfig,
    maxlabel: EvolutionaryStage,
) -> Result<Arc<IsochroneSelectionModel>, GapcastError> {
    if stream.frame != survey.frame {
        return Err(GapcastError::InvalidParameter(format!(
            "stream {} uses the {:?} frame but survey {} uses {:?}",
            stream.name, stream.frame, survey.key, survey.frame
        )));
    }
    let selection = survey.selection_model(maxlabel)?;
    let (age, feh) = (stream.progenitor.age, stream.progenitor.feh);
    if !selection.covers(age, feh) {
        return Err(GapcastError::InvalidParameter(format!(
            "population of {} (age={age}, feh={feh}) lies outside the isochrone grid of {}",
            stream.name, survey.key
        )));
    }
    Ok(selection)
}

#[cfg(test)]
mod forecast_test {
    use super::*;
    use crate::coordinates::SkyFrame;

    #[test]
    fn test_params_builder() {
        let params = ForecastParams::builder()
            .imf_alpha(2.0)
            .maxlabel(EvolutionaryStage::Agb)
            .build()
            .unwrap();
        assert_eq!(params.imf_alpha, 2.0);
        assert_eq!(params.min_stellar_mass, 0.1);
        assert!(ForecastParams::builder().color_window(0.0).build().is_err());
        assert!(ForecastParams::builder()
            .min_stellar_mass(-1.0)
            .build()
            .is_err());
    }

    #[test]
    fn test_targets_resolution() {
        let registry = SurveyRegistry::presets().unwrap();
        assert_eq!(SurveyTargets::AllRegistered.resolve(&registry).len(), 6);
        let des = registry.get("DES").unwrap();
        let explicit = SurveyTargets::Explicit(vec![des]).resolve(&registry);
        assert_eq!(explicit[0].key, "DES");
    }

    #[test]
    fn test_frame_mismatch() {
        let registry = SurveyRegistry::presets().unwrap();
        let stream = StreamConfig::pal5().with_frame(SkyFrame::Galactic);
        let err = check_compatibility(&stream, &registry.get("SDSS").unwrap(), EvolutionaryStage::Rgb)
            .unwrap_err();
        assert!(matches!(err, GapcastError::InvalidParameter(_)));
    }

    #[test]
    fn test_default_frames_agree() {
        use crate::{
            coordinates::SkyPosition, photometry::PhotometricErrorModel, stream::Progenitor,
        };

        let stream = StreamConfig::new(
            "Toy",
            Progenitor {
                distance: 10.0,
                age: 12.0,
                feh: -1.5,
                sigv: 0.5,
                position: SkyPosition::new(0.0, 0.0),
            },
            1,
            "NEW",
            10,
        )
        .unwrap();
        let errors = PhotometricErrorModel::new(24.0, 0.01, 0.1).unwrap();
        let survey = SurveyConfig::new("NEW", "g", "r", errors, 10.0).unwrap();
        assert_eq!(stream.frame, SkyFrame::default());
        assert_eq!(survey.frame, SkyFrame::default());

        // the frames pass, the missing selection model is what stops the pair
        assert!(matches!(
            check_compatibility(&stream, &survey, EvolutionaryStage::Rgb),
            Err(GapcastError::SelectionModelNotLoaded { .. })
        ));
    }
}
