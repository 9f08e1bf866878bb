//! # Background field catalogs
//!
//! A [`BackgroundFieldModel`] is a read-only catalog of field stars (mass, sky position and
//! apparent magnitude per band) covering a patch of radius
//! [`BACKGROUND_PATCH_RADIUS`](crate::constants::BACKGROUND_PATCH_RADIUS) around a stream.
//!
//! Catalogs are produced by an external population-synthesis code, wrapped by the
//! [`BackgroundGenerator`] trait. [`ensure_background`] only invokes the generator when the
//! catalog file `<data>/galaxia_files/<stream>_bg.csv` does not exist yet.
//!
//! CSV layout:
//!
//! ```text
//! lon,lat,mass,<band 1>,<band 2>,...
//! ```
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};

use crate::{
    constants::{Degree, Magnitude, SolarMass, SquareDegree, BACKGROUND_PATCH_AREA},
    coordinates::{SkyFrame, SkyPosition},
    env_state::{write_atomically, GapcastEnv},
    gapcast_errors::GapcastError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundStar {
    pub position: SkyPosition,
    pub mass: SolarMass,
    /// Apparent magnitudes, in the order of [`BackgroundFieldModel::bands`]
    pub mags: Vec<Magnitude>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundFieldModel {
    pub bands: Vec<String>,
    pub stars: Vec<BackgroundStar>,
}

impl BackgroundFieldModel {
    pub fn new(bands: Vec<String>, stars: Vec<BackgroundStar>) -> Result<Self, GapcastError> {
        if let Some(star) = stars.iter().find(|s| s.mags.len() != bands.len()) {
            return Err(GapcastError::InvalidParameter(format!(
                "background star at ({}, {}) has {} magnitudes for {} bands",
                star.position.lon,
                star.position.lat,
                star.mags.len(),
                bands.len()
            )));
        }
        Ok(BackgroundFieldModel { bands, stars })
    }

    pub fn from_csv_path(path: &Utf8Path) -> Result<Self, GapcastError> {
        if !path.exists() {
            return Err(GapcastError::BackgroundNotFound(path.to_string()));
        }
        Self::from_csv_reader(std::fs::File::open(path)?)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, GapcastError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();

        let expected = ["lon", "lat", "mass"];
        if headers.len() < expected.len() || !headers.iter().zip(expected).all(|(h, e)| h == e) {
            return Err(GapcastError::InvalidParameter(
                "background catalog must start with the columns lon,lat,mass".into(),
            ));
        }
        let bands: Vec<String> = headers.iter().skip(3).map(str::to_string).collect();

        let mut stars = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let values = record
                .iter()
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        GapcastError::InvalidParameter(format!(
                            "cannot parse '{v}' in background catalog"
                        ))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            stars.push(BackgroundStar {
                position: SkyPosition::new(values[0], values[1]),
                mass: values[2],
                mags: values[3..].to_vec(),
            });
        }

        Self::new(bands, stars)
    }

    pub fn to_csv_path(&self, path: &Utf8Path) -> Result<(), GapcastError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        let mut header = vec!["lon".to_string(), "lat".to_string(), "mass".to_string()];
        header.extend(self.bands.iter().cloned());
        wtr.write_record(&header)?;
        for star in &self.stars {
            let mut row = vec![
                star.position.lon.to_string(),
                star.position.lat.to_string(),
                star.mass.to_string(),
            ];
            row.extend(star.mags.iter().map(f64::to_string));
            wtr.write_record(&row)?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| GapcastError::IoError(e.into_error()))?;
        write_atomically(path, &bytes)
    }

    pub fn band_index(&self, band: &str) -> Result<usize, GapcastError> {
        self.bands
            .iter()
            .position(|b| b == band)
            .ok_or_else(|| GapcastError::MissingBand(band.to_string()))
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Solid angle the catalog was generated over.
    pub fn area(&self) -> SquareDegree {
        BACKGROUND_PATCH_AREA
    }
}

/// External population-synthesis tool producing a background catalog.
pub trait BackgroundGenerator {
    /// Write the catalog of a `radius`-degree patch centred on `center` to `output`.
    fn generate(
        &self,
        center: &SkyPosition,
        frame: SkyFrame,
        radius: Degree,
        output: &Utf8Path,
    ) -> Result<(), GapcastError>;
}

/// Make sure the background catalog of `stream` exists, generating it if needed.
///
/// Return
/// ----------
/// * The catalog path. The generator is not called when the file is already present.
pub fn ensure_background(
    env: &GapcastEnv,
    stream: &str,
    center: &SkyPosition,
    frame: SkyFrame,
    radius: Degree,
    generator: &dyn BackgroundGenerator,
) -> Result<Utf8PathBuf, GapcastError> {
    let path = env.background_path(stream);
    if path.exists() {
        debug!("Background catalog {path} already exists, skipping generation");
        return Ok(path);
    }

    info!(
        "Generating background catalog for {stream} around ({}, {}), radius {radius} deg",
        center.lon, center.lat
    );
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    generator.generate(center, frame, radius, &path)?;
    if !path.exists() {
        return Err(GapcastError::BackgroundNotFound(path.to_string()));
    }
    Ok(path)
}
