//! Stream star counts forecast from a reference survey.
//!
//! The number of stream stars a survey detects is proportional to the fraction of the
//! progenitor's mass function above the survey's minimum detectable mass at the stream's
//! distance. A count measured in a reference survey is therefore carried over to any
//! target survey by the ratio of their completeness fractions:
//!
//! ```text
//! N_t = N_ref · f(m_min,t) / f(m_min,ref)
//! ```
use ahash::RandomState;
use log::{debug, info, warn};
use roots::{find_root_brent, SimpleConvergency};
use std::collections::HashMap;

use crate::{
    constants::{distance_modulus, Kpc, Magnitude, SolarMass, SurveyKey, EPS},
    forecast::{check_compatibility, ForecastParams, SurveyTargets},
    gapcast_errors::GapcastError,
    mass_function::PowerLawMassFunction,
    photometry::{
        selection::Locus,
        surveys::{SurveyConfig, SurveyRegistry},
    },
    stream::StreamConfig,
};

/// Per target survey result of [`calc_nstars`].
pub type CountResults = HashMap<SurveyKey, Result<u64, GapcastError>, RandomState>;

/// Smallest mass on `locus` bright enough to reach `depth` at `distance`.
///
/// Masses below the locus are never detectable, so a survey deep enough to see the whole
/// locus returns its lower end, and one too shallow to see any of it returns its upper end
/// (an empty completeness fraction).
pub fn min_detectable_mass(
    locus: &Locus,
    depth: Magnitude,
    distance: Kpc,
) -> Result<SolarMass, GapcastError> {
    let limit = depth - distance_modulus(distance);
    if !limit.is_finite() {
        return Err(GapcastError::MassInversionFailed(format!(
            "non-finite absolute magnitude limit at {distance} kpc"
        )));
    }
    if locus.abs_mag[0] <= limit {
        return Ok(locus.min_mass());
    }

    let Some(i) = locus.abs_mag.iter().position(|m| *m <= limit) else {
        return Ok(locus.max_mass());
    };
    let (lo, hi) = (locus.masses[i - 1], locus.masses[i]);
    let f = |mass: f64| locus.at_mass(mass).map_or(f64::NAN, |(mag, _)| mag - limit);

    let mut convergency = SimpleConvergency {
        eps: 1e-12,
        max_iter: 100,
    };
    let mass = find_root_brent(lo, hi, &f, &mut convergency)?;
    if !(lo - EPS..=hi + EPS).contains(&mass) {
        return Err(GapcastError::MassInversionFailed(format!(
            "root {mass} outside the bracketing segment [{lo}, {hi}]"
        )));
    }
    Ok(mass.clamp(lo, hi))
}

/// Fraction of the stellar mass function above `m_det`.
///
/// The population runs from `params.min_stellar_mass` to the most massive star still on
/// the locus.
pub fn completeness_fraction(
    locus: &Locus,
    m_det: SolarMass,
    params: &ForecastParams,
) -> Result<f64, GapcastError> {
    let imf =
        PowerLawMassFunction::new(params.imf_alpha, params.min_stellar_mass, locus.max_mass())?;
    Ok(imf.fraction_above(m_det))
}

/// Minimum detectable mass and completeness fraction of `stream` in one survey.
fn survey_completeness(
    stream: &StreamConfig,
    survey: &SurveyConfig,
    params: &ForecastParams,
) -> Result<(SolarMass, f64), GapcastError> {
    let selection = check_compatibility(stream, survey, params.maxlabel)?;
    let locus = selection.locus(stream.progenitor.age, stream.progenitor.feh)?;
    let m_det = min_detectable_mass(&locus, survey.errors.depth, stream.progenitor.distance)?;
    let fraction = completeness_fraction(&locus, m_det, params)?;
    debug!(
        "{} in {}: m_det = {m_det:.4}, completeness = {fraction:.4}",
        stream.name, survey.key
    );
    Ok((m_det, fraction))
}

/// Forecast the number of stars of `stream` detected by every target survey.
///
/// The count of `stream` in `reference` must already be known (see
/// [`StreamConfig::nstars`]). Each successful forecast is stored back into the stream's
/// `nstars` mapping; a failing target leaves its entry untouched and does not stop the
/// other targets.
///
/// Arguments
/// -----------------
/// * `stream`: the stream, with its reference count.
/// * `reference`: survey in which the count was measured.
/// * `targets`: surveys to forecast.
/// * `registry`: surveys resolved by [`SurveyTargets::AllRegistered`].
/// * `params`: mass function and evolutionary phases.
///
/// Return
/// ----------
/// * A result per target survey key, or an error when the reference itself cannot be used.
pub fn calc_nstars(
    stream: &StreamConfig,
    reference: &SurveyConfig,
    targets: &SurveyTargets,
    registry: &SurveyRegistry,
    params: &ForecastParams,
) -> Result<CountResults, GapcastError> {
    let n_ref = stream
        .nstars(&reference.key)
        .ok_or_else(|| GapcastError::MissingReferenceCount {
            stream: stream.name.clone(),
            survey: reference.key.clone(),
        })?;

    let (m_ref, f_ref) = survey_completeness(stream, reference, params)?;
    if !(f_ref > 0.0) {
        return Err(GapcastError::MassInversionFailed(format!(
            "{} is not detected in its reference survey {} (m_det = {m_ref})",
            stream.name, reference.key
        )));
    }

    let mut results = CountResults::default();
    for target in targets.resolve(registry) {
        let res = survey_completeness(stream, &target, params).and_then(|(m_t, f_t)| {
            if m_t < m_ref - EPS && f_t < f_ref {
                return Err(GapcastError::MonotonicityViolation {
                    reference: reference.key.clone(),
                    target: target.key.clone(),
                });
            }
            let count = (n_ref as f64 * f_t / f_ref).round();
            if !count.is_finite() || count < 0.0 {
                return Err(GapcastError::MassInversionFailed(format!(
                    "invalid forecast {count} for {} in {}",
                    stream.name, target.key
                )));
            }
            Ok(count as u64)
        });

        match &res {
            Ok(count) => stream.set_nstars(target.key.clone(), *count),
            Err(e) => warn!("calc_nstars {} / {} failed: {e}", stream.name, target.key),
        }
        results.insert(target.key.clone(), res);
    }

    info!(
        "Forecast {} counts for {} from {} stars in {}",
        results.len(),
        stream.name,
        n_ref,
        reference.key
    );
    Ok(results)
}
