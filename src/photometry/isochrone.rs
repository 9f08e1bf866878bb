//! # Isochrone tables
//!
//! Already-built isochrone tables, one [`IsochroneTrack`] per (age, [Fe/H]) node of a
//! rectangular [`IsochroneGrid`]. Tables are read from CSV with the columns
//!
//! ```text
//! age,feh,mass,label,<band 1>,<band 2>,...
//! ```
//!
//! where `age` is in Gyr, `mass` is the initial mass in M☉, `label` is the integer
//! [`EvolutionaryStage`] and every band column holds absolute magnitudes. Rows of a track
//! must be ordered by strictly increasing mass. Lines starting with `#` are ignored.
use std::{collections::HashMap, io::Read};

use ahash::RandomState;
use camino::Utf8Path;
use itertools::Itertools;

use crate::{
    constants::{Gyr, Magnitude, SolarMass},
    gapcast_errors::GapcastError,
    photometry::EvolutionaryStage,
};

/// One isochrone: a single-age, single-metallicity stellar population.
#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneTrack {
    pub age: Gyr,
    pub feh: f64,
    pub masses: Vec<SolarMass>,
    pub stages: Vec<EvolutionaryStage>,
    bands: HashMap<String, Vec<Magnitude>, RandomState>,
}

impl IsochroneTrack {
    pub fn new(
        age: Gyr,
        feh: f64,
        masses: Vec<SolarMass>,
        stages: Vec<EvolutionaryStage>,
    ) -> Result<Self, GapcastError> {
        if masses.len() != stages.len() {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "track (age={age}, feh={feh}) has {} masses but {} labels",
                masses.len(),
                stages.len()
            )));
        }
        if masses.len() < 2 {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "track (age={age}, feh={feh}) needs at least two points"
            )));
        }
        if !masses.windows(2).all(|w| w[0] < w[1]) {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "track (age={age}, feh={feh}) masses are not strictly increasing"
            )));
        }
        Ok(IsochroneTrack {
            age,
            feh,
            masses,
            stages,
            bands: HashMap::default(),
        })
    }

    /// Attach the absolute magnitudes of one band, one per mass.
    pub fn with_band(
        mut self,
        name: impl Into<String>,
        mags: Vec<Magnitude>,
    ) -> Result<Self, GapcastError> {
        let name = name.into();
        if mags.len() != self.masses.len() {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "band {name} has {} values for {} masses",
                mags.len(),
                self.masses.len()
            )));
        }
        self.bands.insert(name, mags);
        Ok(self)
    }

    pub fn band(&self, name: &str) -> Result<&[Magnitude], GapcastError> {
        self.bands
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| GapcastError::MissingBand(name.to_string()))
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.keys().map(String::as_str).sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }
}

/// Rectangular grid of isochrones over (age, [Fe/H]).
#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneGrid {
    ages: Vec<Gyr>,
    fehs: Vec<f64>,
    /// Row-major over (age, feh)
    tracks: Vec<IsochroneTrack>,
}

impl IsochroneGrid {
    /// Assemble a grid, checking that every (age, feh) node appears exactly once.
    pub fn new(tracks: Vec<IsochroneTrack>) -> Result<Self, GapcastError> {
        if tracks.is_empty() {
            return Err(GapcastError::InvalidIsochroneGrid(
                "the grid holds no isochrone".into(),
            ));
        }

        let ages: Vec<Gyr> = tracks
            .iter()
            .map(|t| t.age)
            .sorted_by(f64::total_cmp)
            .dedup()
            .collect();
        let fehs: Vec<f64> = tracks
            .iter()
            .map(|t| t.feh)
            .sorted_by(f64::total_cmp)
            .dedup()
            .collect();

        if ages.len() * fehs.len() != tracks.len() {
            return Err(GapcastError::InvalidIsochroneGrid(format!(
                "{} tracks do not fill a {}x{} (age, feh) grid",
                tracks.len(),
                ages.len(),
                fehs.len()
            )));
        }

        let tracks: Vec<IsochroneTrack> = tracks
            .into_iter()
            .sorted_by(|a, b| a.age.total_cmp(&b.age).then(a.feh.total_cmp(&b.feh)))
            .collect();

        for (i, track) in tracks.iter().enumerate() {
            let (ia, ifeh) = (i / fehs.len(), i % fehs.len());
            if track.age != ages[ia] || track.feh != fehs[ifeh] {
                return Err(GapcastError::InvalidIsochroneGrid(format!(
                    "duplicated node (age={}, feh={})",
                    track.age, track.feh
                )));
            }
        }

        Ok(IsochroneGrid { ages, fehs, tracks })
    }

    pub fn from_csv_path(path: &Utf8Path) -> Result<Self, GapcastError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, GapcastError> {
        let mut rdr = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                GapcastError::InvalidIsochroneGrid(format!("missing column {name}"))
            })
        };
        let (i_age, i_feh, i_mass, i_label) =
            (column("age")?, column("feh")?, column("mass")?, column("label")?);
        let band_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| ![i_age, i_feh, i_mass, i_label].contains(i))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        // (age, feh) -> (masses, stages, band magnitudes)
        type Rows = (Vec<f64>, Vec<EvolutionaryStage>, Vec<Vec<f64>>);
        let mut groups: Vec<((f64, f64), Rows)> = Vec::new();

        for record in rdr.records() {
            let record = record?;
            let field = |i: usize| -> Result<f64, GapcastError> {
                let raw = record.get(i).unwrap_or("");
                raw.parse::<f64>().map_err(|_| {
                    GapcastError::InvalidIsochroneGrid(format!("cannot parse '{raw}' as a number"))
                })
            };
            let key = (field(i_age)?, field(i_feh)?);
            let label = record.get(i_label).unwrap_or("");
            let stage = label
                .parse::<u8>()
                .map_err(|_| {
                    GapcastError::InvalidIsochroneGrid(format!("invalid stage label '{label}'"))
                })
                .and_then(EvolutionaryStage::try_from)?;

            let pos = match groups.iter().position(|(k, _)| *k == key) {
                Some(pos) => pos,
                None => {
                    groups.push((key, (Vec::new(), Vec::new(), vec![Vec::new(); band_columns.len()])));
                    groups.len() - 1
                }
            };
            let (masses, stages, mags) = &mut groups[pos].1;
            masses.push(field(i_mass)?);
            stages.push(stage);
            for (slot, (i, _)) in mags.iter_mut().zip(&band_columns) {
                slot.push(field(*i)?);
            }
        }

        let tracks = groups
            .into_iter()
            .map(|((age, feh), (masses, stages, mags))| {
                band_columns.iter().zip(mags).try_fold(
                    IsochroneTrack::new(age, feh, masses, stages)?,
                    |track, ((_, name), values)| track.with_band(name.clone(), values),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(tracks)
    }

    pub fn ages(&self) -> &[Gyr] {
        &self.ages
    }

    pub fn fehs(&self) -> &[f64] {
        &self.fehs
    }

    pub fn tracks(&self) -> &[IsochroneTrack] {
        &self.tracks
    }

    /// Track at grid indices `(i_age, i_feh)`.
    pub fn track_at(&self, i_age: usize, i_feh: usize) -> Option<&IsochroneTrack> {
        if i_age >= self.ages.len() || i_feh >= self.fehs.len() {
            return None;
        }
        self.tracks.get(i_age * self.fehs.len() + i_feh)
    }
}

#[cfg(test)]
mod isochrone_test {
    use super::*;

    const TABLE: &str = "\
# synthetic table
age,feh,mass,label,g,r
10.0,-2.0,0.5,1,9.0,8.5
10.0,-2.0,0.8,1,5.0,4.6
10.0,-2.0,0.85,3,1.0,0.3
12.0,-2.0,0.5,1,9.2,8.7
12.0,-2.0,0.8,2,5.3,4.9
12.0,-2.0,0.84,3,1.2,0.5
";

    #[test]
    fn test_read_csv_grid() {
        let grid = IsochroneGrid::from_csv_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(grid.ages(), &[10.0, 12.0]);
        assert_eq!(grid.fehs(), &[-2.0]);

        let track = grid.track_at(1, 0).unwrap();
        assert_eq!(track.age, 12.0);
        assert_eq!(track.masses, vec![0.5, 0.8, 0.84]);
        assert_eq!(
            track.stages,
            vec![
                EvolutionaryStage::MainSequence,
                EvolutionaryStage::SubGiant,
                EvolutionaryStage::Rgb
            ]
        );
        assert_eq!(track.band("r").unwrap(), &[8.7, 4.9, 0.5]);
        assert_eq!(track.band_names(), vec!["g", "r"]);
        assert_eq!(
            track.band("i").unwrap_err(),
            GapcastError::MissingBand("i".into())
        );
        assert!(grid.track_at(2, 0).is_none());
    }

    #[test]
    fn test_non_rectangular_grid() {
        let table = format!("{TABLE}11.0,-1.0,0.5,1,9.0,8.5\n11.0,-1.0,0.8,1,5.0,4.6\n");
        assert!(matches!(
            IsochroneGrid::from_csv_reader(table.as_bytes()),
            Err(GapcastError::InvalidIsochroneGrid(_))
        ));
    }

    #[test]
    fn test_unsorted_masses() {
        let err = IsochroneTrack::new(
            10.0,
            -1.0,
            vec![0.5, 0.4],
            vec![EvolutionaryStage::MainSequence; 2],
        )
        .unwrap_err();
        assert!(matches!(err, GapcastError::InvalidIsochroneGrid(_)));
    }
}
