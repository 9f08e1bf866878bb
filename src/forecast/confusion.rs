//! Background confusion counts.
//!
//! A background star contributes the probability that the survey detects it times the
//! probability that its measured colour falls within `color_window` of the stream's
//! isochrone at its magnitude:
//!
//! ```text
//! p_i = p_det(m_i) · P(|c_i + ε − c_iso(m_i − μ)| < Δc),   ε ~ N(0, σ_c(m_i))
//! N_bg = Σ p_i · footprint / patch area
//! ```
//!
//! where `μ` is the stream's distance modulus and `c_iso` the closest isochrone branch.
use log::{debug, warn};
use statrs::function::erf::erf;

use crate::{
    forecast::{check_compatibility, ForecastParams},
    gapcast_errors::GapcastError,
    photometry::surveys::SurveyConfig,
    stream::StreamConfig,
};

/// Expected number of background stars mistaken for stream stars in `survey`'s footprint.
///
/// Arguments
/// -----------------
/// * `stream`: stream whose background catalog and population are used; the catalog must
///   already be loaded.
/// * `survey`: survey whose selection model up to `params.maxlabel` is loaded.
/// * `params`: population assumptions and colour window.
///
/// Return
/// ----------
/// * A finite, non-negative expectation, at most the catalog size times the ratio of the
///   footprint to the catalog patch.
pub fn calc_star_bg(
    stream: &StreamConfig,
    survey: &SurveyConfig,
    params: &ForecastParams,
) -> Result<f64, GapcastError> {
    let selection = check_compatibility(stream, survey, params.maxlabel)?;
    let bg = stream.background()?;
    let locus = selection.locus(stream.progenitor.age, stream.progenitor.feh)?;
    let dm = stream.distance_modulus();
    let i_det = bg.band_index(&survey.detection_band)?;
    let i_col = bg.band_index(&survey.color_band)?;
    let errors = &survey.errors;
    let window = params.color_window;

    let mut total = 0.0;
    let mut skipped = 0usize;
    for star in &bg.stars {
        let (m_det, m_col) = (star.mags[i_det], star.mags[i_col]);
        let c_obs = m_det - m_col;
        let Some(c_iso) = locus
            .branch_colors(m_det - dm)
            .into_iter()
            .min_by(|a, b| (a - c_obs).abs().total_cmp(&(b - c_obs).abs()))
        else {
            continue;
        };

        let sigma = errors.color_sigma(m_det, m_col) * std::f64::consts::SQRT_2;
        let p_color =
            0.5 * (erf((c_iso + window - c_obs) / sigma) - erf((c_iso - window - c_obs) / sigma));
        let term = errors.detection_probability(m_det) * p_color;
        if !term.is_finite() {
            skipped += 1;
            continue;
        }
        total += term.max(0.0);
    }
    if skipped > 0 {
        warn!(
            "{skipped} background stars of {} gave non-finite contributions in {}",
            stream.name, survey.key
        );
    }

    let scaled = total * survey.footprint_area / bg.area();
    debug!(
        "calc_star_bg {} / {}: {total:.3} in patch, {scaled:.3} in footprint",
        stream.name, survey.key
    );
    Ok(if scaled.is_finite() { scaled.max(0.0) } else { 0.0 })
}
