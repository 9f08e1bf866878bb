use thiserror::Error;

use crate::constants::SurveyKey;

#[derive(Error, Debug)]
pub enum GapcastError {
    #[error("Environment directory is not configured: {0}")]
    MissingEnvDirectory(String),

    #[error("Invalid UTF-8 path: {0}")]
    Utf8PathError(String),

    #[error("No reference star count recorded for stream {stream} in survey {survey}")]
    MissingReferenceCount { stream: String, survey: SurveyKey },

    #[error("Unknown survey: {0}")]
    UnknownSurvey(String),

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dynamical model cache not found, it must be rebuilt: {0}")]
    ModelCacheMiss(String),

    #[error("Isochrone interpolation cache not found, it must be rebuilt: {0}")]
    IsochroneCacheMiss(String),

    #[error("Selection model for survey {survey} up to {maxlabel} is not loaded")]
    SelectionModelNotLoaded { survey: SurveyKey, maxlabel: String },

    #[error("Background field catalog not found: {0}")]
    BackgroundNotFound(String),

    #[error("Error during the nom parsing: {0}")]
    NomParsingError(String),

    #[error("Invalid isochrone grid: {0}")]
    InvalidIsochroneGrid(String),

    #[error("Photometric band {0} is missing from the isochrone grid")]
    MissingBand(String),

    #[error("Forecast for {target} is lower than for the shallower reference {reference}")]
    MonotonicityViolation {
        reference: SurveyKey,
        target: SurveyKey,
    },

    #[error("Unable to invert the survey depth into a minimum mass: {0}")]
    MassInversionFailed(String),

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON (de)serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("ROOTS finding error: {0}")]
    RootFindingError(#[from] roots::SearchError),

    #[error("Invalid Gaussian distribution: {0:?}")]
    NormalDistributionError(rand_distr::NormalError),
}

impl From<rand_distr::NormalError> for GapcastError {
    fn from(err: rand_distr::NormalError) -> Self {
        GapcastError::NormalDistributionError(err)
    }
}

impl PartialEq for GapcastError {
    fn eq(&self, other: &Self) -> bool {
        use GapcastError::*;
        match (self, other) {
            (MissingEnvDirectory(a), MissingEnvDirectory(b)) => a == b,
            (Utf8PathError(a), Utf8PathError(b)) => a == b,
            (
                MissingReferenceCount {
                    stream: s1,
                    survey: k1,
                },
                MissingReferenceCount {
                    stream: s2,
                    survey: k2,
                },
            ) => s1 == s2 && k1 == k2,
            (UnknownSurvey(a), UnknownSurvey(b)) => a == b,
            (UnknownStream(a), UnknownStream(b)) => a == b,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (ModelCacheMiss(a), ModelCacheMiss(b)) => a == b,
            (IsochroneCacheMiss(a), IsochroneCacheMiss(b)) => a == b,
            (
                SelectionModelNotLoaded {
                    survey: s1,
                    maxlabel: m1,
                },
                SelectionModelNotLoaded {
                    survey: s2,
                    maxlabel: m2,
                },
            ) => s1 == s2 && m1 == m2,
            (BackgroundNotFound(a), BackgroundNotFound(b)) => a == b,
            (NomParsingError(a), NomParsingError(b)) => a == b,
            (InvalidIsochroneGrid(a), InvalidIsochroneGrid(b)) => a == b,
            (MissingBand(a), MissingBand(b)) => a == b,
            (
                MonotonicityViolation {
                    reference: r1,
                    target: t1,
                },
                MonotonicityViolation {
                    reference: r2,
                    target: t2,
                },
            ) => r1 == r2 && t1 == t2,
            (MassInversionFailed(a), MassInversionFailed(b)) => a == b,
            (InvalidSample(a), InvalidSample(b)) => a == b,

            // foreign errors are not comparable: same variant means equal
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (RootFindingError(a), RootFindingError(b)) => a == b,
            (NormalDistributionError(a), NormalDistributionError(b)) => a == b,

            _ => false,
        }
    }
}
