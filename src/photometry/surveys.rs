//! # Survey definitions
//!
//! A [`SurveyConfig`] identifies a photometric survey (key, detection and colour bands,
//! [`PhotometricErrorModel`], footprint) and owns the isochrone selection models built
//! for it, one per maximum evolutionary stage.
//!
//! The built-in presets (SDSS, CFHT, DES, LSST1, LSST10, WFIRST) are read from an
//! embedded rules file with one survey per line:
//!
//! ```text
//! KEY: <detection band>-<colour band> @ <depth>, <sigma_sys>, <width> ; <footprint deg²> ! comment
//! ```
//!
//! ```rust
//! use gapcast::photometry::surveys::SurveyRegistry;
//!
//! let registry = SurveyRegistry::presets().unwrap();
//! let lsst = registry.get("LSST10").unwrap();
//! assert_eq!(lsst.detection_band, "g");
//! ```
use std::{collections::HashMap, sync::Arc};

use ahash::RandomState;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0},
    number::complete::double,
    sequence::{preceded, separated_pair, terminated},
    IResult, Parser,
};
use parking_lot::RwLock;

use crate::{
    constants::{SquareDegree, SurveyKey},
    coordinates::SkyFrame,
    gapcast_errors::GapcastError,
    photometry::{selection::IsochroneSelectionModel, EvolutionaryStage, PhotometricErrorModel},
};

static SURVEY_RULES: &str = include_str!("data_surveys/surveys.rules");

type SelectionModels = HashMap<EvolutionaryStage, Arc<IsochroneSelectionModel>, RandomState>;

#[derive(Debug)]
pub struct SurveyConfig {
    pub key: SurveyKey,
    pub detection_band: String,
    pub color_band: String,
    pub errors: PhotometricErrorModel,
    /// Solid angle observed around a stream field (deg²)
    pub footprint_area: SquareDegree,
    pub frame: SkyFrame,
    selection: RwLock<SelectionModels>,
}

impl Clone for SurveyConfig {
    fn clone(&self) -> Self {
        SurveyConfig {
            key: self.key.clone(),
            detection_band: self.detection_band.clone(),
            color_band: self.color_band.clone(),
            errors: self.errors,
            footprint_area: self.footprint_area,
            frame: self.frame,
            selection: RwLock::new(self.selection.read().clone()),
        }
    }
}

impl SurveyConfig {
    pub fn new(
        key: impl Into<SurveyKey>,
        detection_band: impl Into<String>,
        color_band: impl Into<String>,
        errors: PhotometricErrorModel,
        footprint_area: SquareDegree,
    ) -> Result<Self, GapcastError> {
        if !(footprint_area > 0.0) || !footprint_area.is_finite() {
            return Err(GapcastError::InvalidParameter(format!(
                "footprint area must be positive, got {footprint_area}"
            )));
        }
        Ok(SurveyConfig {
            key: key.into(),
            detection_band: detection_band.into(),
            color_band: color_band.into(),
            errors,
            footprint_area,
            frame: SkyFrame::default(),
            selection: RwLock::new(HashMap::default()),
        })
    }

    pub fn with_frame(mut self, frame: SkyFrame) -> Self {
        self.frame = frame;
        self
    }

    /// Same survey observing a different solid angle, sharing the loaded selection models.
    pub fn with_footprint_area(&self, footprint_area: SquareDegree) -> Result<Self, GapcastError> {
        if !(footprint_area > 0.0) || !footprint_area.is_finite() {
            return Err(GapcastError::InvalidParameter(format!(
                "footprint area must be positive, got {footprint_area}"
            )));
        }
        let mut survey = self.clone();
        survey.footprint_area = footprint_area;
        Ok(survey)
    }

    /// The selection model loaded for `maxlabel`.
    ///
    /// Return
    /// ----------
    /// * The shared model, or [`GapcastError::SelectionModelNotLoaded`] if
    ///   [`IsoInterpCache::load_iso_interps`](crate::photometry::iso_cache::IsoInterpCache::load_iso_interps)
    ///   was never called for this stage.
    pub fn selection_model(
        &self,
        maxlabel: EvolutionaryStage,
    ) -> Result<Arc<IsochroneSelectionModel>, GapcastError> {
        self.selection
            .read()
            .get(&maxlabel)
            .cloned()
            .ok_or_else(|| GapcastError::SelectionModelNotLoaded {
                survey: self.key.clone(),
                maxlabel: maxlabel.to_string(),
            })
    }

    pub(crate) fn attach_selection_model(&self, model: Arc<IsochroneSelectionModel>) {
        self.selection.write().insert(model.maxlabel, model);
    }

    pub fn loaded_stages(&self) -> Vec<EvolutionaryStage> {
        let mut stages: Vec<_> = self.selection.read().keys().copied().collect();
        stages.sort();
        stages
    }
}

/// Ordered set of the surveys a forecast can target.
#[derive(Debug, Clone, Default)]
pub struct SurveyRegistry {
    surveys: Vec<Arc<SurveyConfig>>,
}

impl SurveyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in survey presets, in order of increasing depth.
    pub fn presets() -> Result<Self, GapcastError> {
        let surveys = parse_survey_rules(SURVEY_RULES)?
            .into_iter()
            .map(Arc::new)
            .collect();
        Ok(SurveyRegistry { surveys })
    }

    /// Add a survey, replacing any survey registered under the same key.
    pub fn register(&mut self, survey: SurveyConfig) -> Arc<SurveyConfig> {
        let survey = Arc::new(survey);
        match self.surveys.iter_mut().find(|s| s.key == survey.key) {
            Some(slot) => *slot = survey.clone(),
            None => self.surveys.push(survey.clone()),
        }
        survey
    }

    pub fn get(&self, key: &str) -> Result<Arc<SurveyConfig>, GapcastError> {
        self.surveys
            .iter()
            .find(|s| s.key == key)
            .cloned()
            .ok_or_else(|| GapcastError::UnknownSurvey(key.to_string()))
    }

    pub fn keys(&self) -> Vec<SurveyKey> {
        self.surveys.iter().map(|s| s.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SurveyConfig>> {
        self.surveys.iter()
    }

    pub fn len(&self) -> usize {
        self.surveys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surveys.is_empty()
    }
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_band_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_key(input: &str) -> IResult<&str, &str> {
    preceded(multispace0, terminated(take_while1(is_key_char), tag(":"))).parse(input)
}

fn parse_bands(input: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        multispace0,
        separated_pair(take_while1(is_band_char), char('-'), take_while1(is_band_char)),
    )
    .parse(input)
}

fn parse_error_values(input: &str) -> IResult<&str, (f64, f64, f64)> {
    preceded(
        (multispace0, char('@')),
        (
            preceded(multispace0, double),
            preceded((multispace0, char(','), multispace0), double),
            preceded((multispace0, char(','), multispace0), double),
        ),
    )
    .parse(input)
}

fn parse_footprint(input: &str) -> IResult<&str, f64> {
    preceded((multispace0, char(';'), multispace0), double).parse(input)
}

fn parse_survey_line(line: &str) -> Result<SurveyConfig, GapcastError> {
    let parsed: IResult<&str, _> = (
        parse_key,
        parse_bands,
        parse_error_values,
        parse_footprint,
    )
        .parse(line);

    let (rest, (key, (det, col), (depth, sigma_sys, width), area)) =
        parsed.map_err(|_| GapcastError::NomParsingError(line.to_string()))?;
    if !rest.trim().is_empty() {
        return Err(GapcastError::NomParsingError(line.to_string()));
    }

    let errors = PhotometricErrorModel::new(depth, sigma_sys, width)?;
    SurveyConfig::new(key, det, col, errors, area)
}

/// Parse a survey rules text, ignoring blank lines and `!` comments.
pub fn parse_survey_rules(rules: &str) -> Result<Vec<SurveyConfig>, GapcastError> {
    rules
        .lines()
        .map(|line| line.split('!').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(parse_survey_line)
        .collect()
}

#[cfg(test)]
mod surveys_test {
    use super::*;

    #[test]
    fn test_parse_survey_line() {
        let survey = parse_survey_line("SDSS:   g-r @ 22.5, 0.020, 0.20 ; 100.0").unwrap();
        assert_eq!(survey.key, "SDSS");
        assert_eq!(survey.detection_band, "g");
        assert_eq!(survey.color_band, "r");
        assert_eq!(survey.errors.depth, 22.5);
        assert_eq!(survey.errors.sigma_sys, 0.02);
        assert_eq!(survey.errors.completeness_width, 0.2);
        assert_eq!(survey.footprint_area, 100.0);

        let survey = parse_survey_line("WFIRST: z087-h158 @ 27.6, 0.005, 0.10 ; 50").unwrap();
        assert_eq!(survey.detection_band, "z087");
        assert_eq!(survey.color_band, "h158");
        assert_eq!(survey.footprint_area, 50.0);
    }

    #[test]
    fn test_parse_invalid_lines() {
        assert_eq!(
            parse_survey_line("SDSS g-r @ 22.5, 0.02, 0.2 ; 100").unwrap_err(),
            GapcastError::NomParsingError("SDSS g-r @ 22.5, 0.02, 0.2 ; 100".into())
        );
        assert!(parse_survey_line("SDSS: g-r @ 22.5, 0.02 ; 100").is_err());
        assert!(parse_survey_line("SDSS: g-r @ 22.5, 0.02, 0.2 ; 100 extra").is_err());
        assert!(matches!(
            parse_survey_line("SDSS: g-r @ 22.5, 0.02, 0.2 ; -4"),
            Err(GapcastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_presets_ordered_by_depth() {
        let registry = SurveyRegistry::presets().unwrap();
        assert_eq!(
            registry.keys(),
            vec!["SDSS", "CFHT", "DES", "LSST1", "LSST10", "WFIRST"]
        );
        let optical: Vec<f64> = registry
            .iter()
            .filter(|s| s.detection_band == "g")
            .map(|s| s.errors.depth)
            .collect();
        assert!(optical.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_register_replaces_same_key() {
        let mut registry = SurveyRegistry::presets().unwrap();
        let errors = PhotometricErrorModel::new(21.0, 0.02, 0.2).unwrap();
        registry.register(SurveyConfig::new("SDSS", "g", "r", errors, 10.0).unwrap());
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.get("SDSS").unwrap().errors.depth, 21.0);
        assert_eq!(
            registry.get("PanSTARRS").unwrap_err(),
            GapcastError::UnknownSurvey("PanSTARRS".into())
        );
    }

    #[test]
    fn test_selection_model_not_loaded() {
        let registry = SurveyRegistry::presets().unwrap();
        let err = registry
            .get("DES")
            .unwrap()
            .selection_model(EvolutionaryStage::Rgb)
            .unwrap_err();
        assert_eq!(
            err,
            GapcastError::SelectionModelNotLoaded {
                survey: "DES".into(),
                maxlabel: "rgb".into()
            }
        );
    }
}
