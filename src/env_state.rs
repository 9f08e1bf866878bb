//! # gapcast environment state
//!
//! This module defines [`crate::env_state::GapcastEnv`], the **process-wide configuration**
//! shared by every file lookup in the library. It carries exactly two directories:
//!
//! - a shared **data directory** holding inputs produced by external tools
//!   (background-field catalogs generated by a population-synthesis code);
//! - a **local working directory** holding caches written by this library and by the
//!   dynamical-model builders (stream models, isochrone interpolation tables).
//!
//! ## Structure
//!
//! ```text
//! GapcastEnv
//! ├── data_dir   (Utf8PathBuf)  <data>/galaxia_files/<stream>_bg.csv
//! └── local_dir  (Utf8PathBuf)  <local>/model_pickles/<stream>_<ntimes>_<tail>.json
//!                               <local>/iso_interps/<survey>_<maxlabel>.json
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gapcast::env_state::GapcastEnv;
//!
//! // Resolve from GAPCAST_DATA_DIR / GAPCAST_LOCAL_DIR, failing if either is unset
//! let env = GapcastEnv::from_env().unwrap();
//! println!("{}", env.background_path("Pal5"));
//! ```
//!
//! ## Notes
//!
//! - A missing directory variable is a fatal configuration error
//!   ([`GapcastError::MissingEnvDirectory`]); no default location is substituted.
//! - The environment is cheap to clone and is meant to be shared by the forecast
//!   façade, the model store and the isochrone cache.
use camino::{Utf8Path, Utf8PathBuf};

use crate::{dynamics::Tail, gapcast_errors::GapcastError, photometry::EvolutionaryStage};

/// Name of the variable holding the shared data directory.
pub const DATA_DIR_VAR: &str = "GAPCAST_DATA_DIR";
/// Name of the variable holding the local working directory.
pub const LOCAL_DIR_VAR: &str = "GAPCAST_LOCAL_DIR";

#[derive(Debug, Clone, PartialEq)]
pub struct GapcastEnv {
    pub data_dir: Utf8PathBuf,
    pub local_dir: Utf8PathBuf,
}

impl GapcastEnv {
    /// Build an environment from explicit directories.
    pub fn new(data_dir: impl Into<Utf8PathBuf>, local_dir: impl Into<Utf8PathBuf>) -> Self {
        GapcastEnv {
            data_dir: data_dir.into(),
            local_dir: local_dir.into(),
        }
    }

    /// Resolve both directories from the process environment.
    ///
    /// Return
    /// ----------
    /// * The environment, or [`GapcastError::MissingEnvDirectory`] naming the first
    ///   variable that is unset or empty.
    pub fn from_env() -> Result<Self, GapcastError> {
        let data_dir = read_dir_var(DATA_DIR_VAR)?;
        let local_dir = read_dir_var(LOCAL_DIR_VAR)?;
        Ok(GapcastEnv {
            data_dir,
            local_dir,
        })
    }

    /// Path of the cached dynamical model of one stream tail.
    pub fn model_path(&self, stream: &str, ntimes: usize, tail: Tail) -> Utf8PathBuf {
        self.local_dir
            .join("model_pickles")
            .join(format!("{stream}_{ntimes}_{tail}.json"))
    }

    /// Path of the background-field catalog of a stream.
    pub fn background_path(&self, stream: &str) -> Utf8PathBuf {
        self.data_dir
            .join("galaxia_files")
            .join(format!("{stream}_bg.csv"))
    }

    /// Path of the isochrone interpolation cache of a survey.
    pub fn iso_interp_path(&self, survey: &str, maxlabel: EvolutionaryStage) -> Utf8PathBuf {
        self.local_dir
            .join("iso_interps")
            .join(format!("{survey}_{maxlabel}.json"))
    }
}

fn read_dir_var(name: &str) -> Result<Utf8PathBuf, GapcastError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(Utf8PathBuf::from(value)),
        Ok(_) => Err(GapcastError::MissingEnvDirectory(format!("{name} is empty"))),
        Err(std::env::VarError::NotPresent) => {
            Err(GapcastError::MissingEnvDirectory(format!("{name} is not set")))
        }
        Err(std::env::VarError::NotUnicode(_)) => Err(GapcastError::Utf8PathError(format!(
            "{name} is not valid unicode"
        ))),
    }
}

/// Write `contents` next to `path` then rename over it, creating parent directories.
///
/// A process killed mid-write leaves at most a stray `.tmp` file, never a truncated cache.
pub(crate) fn write_atomically(path: &Utf8Path, contents: &[u8]) -> Result<(), GapcastError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod env_state_test {
    use super::*;

    #[test]
    fn test_cache_paths() {
        let env = GapcastEnv::new("/data", "/work");
        assert_eq!(
            env.model_path("Pal5", 64, Tail::Leading),
            Utf8PathBuf::from("/work/model_pickles/Pal5_64_leading.json")
        );
        assert_eq!(
            env.model_path("GD1", 1, Tail::Trailing),
            Utf8PathBuf::from("/work/model_pickles/GD1_1_trailing.json")
        );
        assert_eq!(
            env.background_path("Phoenix"),
            Utf8PathBuf::from("/data/galaxia_files/Phoenix_bg.csv")
        );
        assert_eq!(
            env.iso_interp_path("LSST10", EvolutionaryStage::Rgb),
            Utf8PathBuf::from("/work/iso_interps/LSST10_rgb.json")
        );
    }

    #[test]
    fn test_unset_directory_is_fatal() {
        let err = read_dir_var("GAPCAST_TEST_VARIABLE_NEVER_SET").unwrap_err();
        assert_eq!(
            err,
            GapcastError::MissingEnvDirectory(
                "GAPCAST_TEST_VARIABLE_NEVER_SET is not set".to_string()
            )
        );
    }

    #[test]
    fn test_write_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let path = root.join("nested").join("cache.json");
        write_atomically(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("tmp").exists());
    }
}
