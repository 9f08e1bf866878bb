//! # Constants and type definitions for gapcast
//!
//! This module centralizes the **physical constants**, **conversion factors**, and **common type
//! definitions** used throughout the `gapcast` library.
//!
//! ## Overview
//!
//! - Galactic and solar-motion constants used to place the observer
//! - Unit conversions (degrees ↔ radians, kpc/Gyr ↔ km/s, mas/yr)
//! - Core type aliases used across the crate
//! - Geometry of the background-field patch
//!
//! These definitions are used by all main modules, including the confusion estimator,
//! the count forecaster and the stream sampler.

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for trigonometric conversions
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-9;

/// Gravitational constant in kpc (km/s)² / M☉
pub const G_KPC_KMS2_MSUN: f64 = 4.300917270e-6;

/// Proper motion conversion: v_t [km/s] = K · μ [mas/yr] · d [kpc]
pub const PM_KMS_PER_MASYR_KPC: f64 = 4.740470463533348;

/// Galactocentric distance of the Sun (kpc)
pub const R_SUN: Kpc = 8.0;

/// Height of the Sun above the Galactic mid-plane (kpc)
pub const Z_SUN: Kpc = 0.025;

/// Solar velocity with respect to the Galactic centre (km/s), in the galactocentric
/// frame whose x axis points from the Sun towards the Galactic centre
pub const V_SUN: [f64; 3] = [11.1, 244.24, 7.25];

/// Radius of the sky patch used to generate background-field catalogs
pub const BACKGROUND_PATCH_RADIUS: Degree = 1.0;

/// Solid angle of the background-field patch (deg²)
pub const BACKGROUND_PATCH_AREA: SquareDegree =
    std::f64::consts::PI * BACKGROUND_PATCH_RADIUS * BACKGROUND_PATCH_RADIUS;

/// Photometric error at the 5σ depth: 2.5 log10(1 + 1/5)
pub const SIGMA_AT_DEPTH: Magnitude = 0.2171;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in radians
pub type Radian = f64;
/// Solid angle in square degrees
pub type SquareDegree = f64;
/// Distance in kiloparsecs
pub type Kpc = f64;
/// Time in gigayears
pub type Gyr = f64;
/// Mass in solar masses
pub type SolarMass = f64;
/// Photometric magnitude
pub type Magnitude = f64;
/// Velocity in km/s
pub type KmPerSec = f64;
/// Survey identifier (e.g. `"SDSS"`, `"LSST10"`)
pub type SurveyKey = String;

/// Distance modulus of a source at `distance` kpc.
#[inline]
pub fn distance_modulus(distance: Kpc) -> Magnitude {
    5.0 * (distance * 1.0e3).log10() - 5.0
}
