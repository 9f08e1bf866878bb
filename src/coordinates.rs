//! # Sky frames and stream-aligned coordinates
//!
//! Conversions used to turn galactocentric phase-space points into observables:
//!
//! - [`SkyFrame`] selects the celestial frame of the output (galactic or equatorial J2000).
//! - [`galactocentric_to_observed`] places the observer at the Sun and returns
//!   longitude, latitude, distance, proper motions and line-of-sight velocity.
//! - [`StreamFrame`] is a rotation from a [`SkyFrame`] to a stream-aligned `(φ1, φ2)` system,
//!   and [`CoordinateSystem`] states whether a stream carries one.
//!
//! Galactocentric convention: right-handed, Galactic centre at the origin, Sun at
//! `(-R_SUN, 0, Z_SUN)`, `x` pointing from the Sun towards the centre and `y` along
//! Galactic rotation. Positions are in kpc and velocities in km/s.
use nalgebra::{Matrix3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::constants::{
    Degree, KmPerSec, Kpc, DPI, PM_KMS_PER_MASYR_KPC, RADEG, R_SUN, V_SUN, Z_SUN,
};

/// Rotation from equatorial J2000 unit vectors to galactic unit vectors.
pub fn eq_to_gal() -> Matrix3<f64> {
    Matrix3::new(
        -0.054_875_560_416_215_4,
        -0.873_437_090_234_885,
        -0.483_835_015_548_713_2,
        0.494_109_427_875_583_7,
        -0.444_829_629_960_011_2,
        0.746_982_244_497_218_9,
        -0.867_666_149_019_004_7,
        -0.198_076_373_431_201_5,
        0.455_983_776_175_066_9,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SkyFrame {
    Galactic,
    #[default]
    Equatorial,
}

impl SkyFrame {
    /// Rotation taking heliocentric galactic cartesian vectors into this frame.
    pub fn rotation_from_galactic(&self) -> Matrix3<f64> {
        match self {
            SkyFrame::Galactic => Matrix3::identity(),
            SkyFrame::Equatorial => eq_to_gal().transpose(),
        }
    }
}

/// A direction on the sky, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub lon: Degree,
    pub lat: Degree,
}

impl SkyPosition {
    pub fn new(lon: Degree, lat: Degree) -> Self {
        SkyPosition { lon, lat }
    }

    pub fn to_unit_vector(&self) -> Vector3<f64> {
        lonlat_to_unit(self.lon * RADEG, self.lat * RADEG)
    }

    /// Great-circle distance to `other`, in degrees (haversine form).
    pub fn separation(&self, other: &SkyPosition) -> Degree {
        let (l1, b1) = (self.lon * RADEG, self.lat * RADEG);
        let (l2, b2) = (other.lon * RADEG, other.lat * RADEG);
        let sdb = ((b2 - b1) / 2.0).sin();
        let sdl = ((l2 - l1) / 2.0).sin();
        let h = sdb * sdb + b1.cos() * b2.cos() * sdl * sdl;
        2.0 * h.sqrt().min(1.0).asin() / RADEG
    }
}

/// Unit vector pointing at (lon, lat) given in radians.
pub fn lonlat_to_unit(lon: f64, lat: f64) -> Vector3<f64> {
    Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/// Convert a cartesian vector to longitude, latitude (radians) and norm.
///
/// Returns
/// --------
/// * `(lon, lat, r)` with `lon` in [0, 2π) and `lat` in [−π/2, π/2].
///   A null vector maps to `(0, 0, 0)`.
pub fn cartesian_to_lonlat(v: &Vector3<f64>) -> (f64, f64, f64) {
    let norm = v.norm();
    if norm == 0. {
        return (0.0, 0.0, 0.0);
    }

    let lat = (v.z / norm).clamp(-1.0, 1.0).asin();
    let lon = v.y.atan2(v.x);
    let lon = if lon < 0.0 { lon + DPI } else { lon };
    (lon, lat, norm)
}

/// Observable quantities of a single phase-space point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedPoint {
    /// Longitude in the requested frame (deg)
    pub lon: Degree,
    /// Latitude in the requested frame (deg)
    pub lat: Degree,
    /// Heliocentric distance (kpc)
    pub dist: Kpc,
    /// Proper motion along longitude, including the cos(lat) factor (mas/yr)
    pub pm_lon_coslat: f64,
    /// Proper motion along latitude (mas/yr)
    pub pm_lat: f64,
    /// Line-of-sight velocity (km/s)
    pub vlos: KmPerSec,
}

/// Heliocentric galactic cartesian position and velocity of a galactocentric point.
pub fn galactocentric_to_heliocentric(xv: &Vector6<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let pos = Vector3::new(xv[0] + R_SUN, xv[1], xv[2] - Z_SUN);
    let vel = Vector3::new(xv[3] - V_SUN[0], xv[4] - V_SUN[1], xv[5] - V_SUN[2]);
    (pos, vel)
}

/// Project a galactocentric phase-space point onto the sky of `frame`.
pub fn galactocentric_to_observed(xv: &Vector6<f64>, frame: SkyFrame) -> ObservedPoint {
    let (pos, vel) = galactocentric_to_heliocentric(xv);
    let rot = frame.rotation_from_galactic();
    let pos = rot * pos;
    let vel = rot * vel;

    let (lon, lat, dist) = cartesian_to_lonlat(&pos);
    let e_lon = Vector3::new(-lon.sin(), lon.cos(), 0.0);
    let e_lat = Vector3::new(-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos());
    let e_r = lonlat_to_unit(lon, lat);

    let (pm_lon_coslat, pm_lat) = if dist > 0.0 {
        (
            vel.dot(&e_lon) / (PM_KMS_PER_MASYR_KPC * dist),
            vel.dot(&e_lat) / (PM_KMS_PER_MASYR_KPC * dist),
        )
    } else {
        (0.0, 0.0)
    };

    ObservedPoint {
        lon: lon / RADEG,
        lat: lat / RADEG,
        dist,
        pm_lon_coslat,
        pm_lat,
        vlos: vel.dot(&e_r),
    }
}

/// Rotation from a [`SkyFrame`] into a stream-aligned `(φ1, φ2)` frame.
///
/// `φ1` runs along the stream, `φ2` across it; `φ1` is wrapped into (−180°, 180°].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub base: SkyFrame,
    pub rotation: Matrix3<f64>,
}

impl StreamFrame {
    pub fn new(base: SkyFrame, rotation: Matrix3<f64>) -> Self {
        StreamFrame { base, rotation }
    }

    /// Build the frame whose pole is `pole` and whose `(φ1, φ2) = (0, 0)` lies along `origin`.
    ///
    /// `origin` need not be exactly 90° from the pole; it is projected onto the stream equator.
    pub fn from_pole_and_origin(base: SkyFrame, pole: SkyPosition, origin: SkyPosition) -> Self {
        let z = pole.to_unit_vector();
        let o = origin.to_unit_vector();
        let x = (o - z * z.dot(&o)).normalize();
        let y = z.cross(&x);
        let rotation = Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]);
        StreamFrame { base, rotation }
    }

    /// Convert a position of the base frame into `(φ1, φ2)` degrees.
    pub fn to_stream(&self, position: &SkyPosition) -> (Degree, Degree) {
        let v = self.rotation * position.to_unit_vector();
        let (phi1, phi2, _) = cartesian_to_lonlat(&v);
        let phi1 = phi1 / RADEG;
        let phi1 = if phi1 > 180.0 { phi1 - 360.0 } else { phi1 };
        (phi1, phi2 / RADEG)
    }
}

/// Optional custom coordinate system attached to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum CoordinateSystem {
    #[default]
    Default,
    Custom(StreamFrame),
}

impl CoordinateSystem {
    pub fn stream_frame(&self) -> Option<&StreamFrame> {
        match self {
            CoordinateSystem::Default => None,
            CoordinateSystem::Custom(frame) => Some(frame),
        }
    }
}
