//! # Dynamical model cache
//!
//! Built [`DynamicalStreamModel`]s are stored as JSON under
//! `<local>/model_pickles/<stream>_<ntimes>_<tail>.json`. Loading a missing file is a
//! [`GapcastError::ModelCacheMiss`]: the model must be rebuilt, nothing is substituted.
//!
//! Building is delegated to an external [`StreamModelBuilder`]. [`ModelStore::build_all`]
//! runs independent (stream, tail) tasks on a worker pool; each worker writes only its own
//! cache file, and tasks whose file already exists are skipped unless `overwrite` is set,
//! so an interrupted batch restarts cheaply.
#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
use camino::Utf8PathBuf;
use log::{info, warn};
use rayon::prelude::*;

use crate::{
    dynamics::{DynamicalStreamModel, Tail},
    env_state::{write_atomically, GapcastEnv},
    gapcast_errors::GapcastError,
};

/// One independent model to build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildTask {
    pub stream: String,
    pub ntimes: usize,
    pub tail: Tail,
}

/// External model construction (the expensive perturbation integration).
pub trait StreamModelBuilder: Sync {
    fn build(&self, task: &BuildTask) -> Result<DynamicalStreamModel, GapcastError>;
}

/// Result of one build task.
pub type BuildOutcome = (BuildTask, Result<Utf8PathBuf, GapcastError>);

#[derive(Debug, Clone)]
pub struct ModelStore {
    env: GapcastEnv,
}

impl ModelStore {
    pub fn new(env: GapcastEnv) -> Self {
        ModelStore { env }
    }

    pub fn path(&self, stream: &str, ntimes: usize, tail: Tail) -> Utf8PathBuf {
        self.env.model_path(stream, ntimes, tail)
    }

    /// Read the cached model of one stream tail.
    pub fn load(
        &self,
        stream: &str,
        ntimes: usize,
        tail: Tail,
    ) -> Result<DynamicalStreamModel, GapcastError> {
        let path = self.path(stream, ntimes, tail);
        if !path.exists() {
            return Err(GapcastError::ModelCacheMiss(path.to_string()));
        }
        let model: DynamicalStreamModel = serde_json::from_slice(&std::fs::read(&path)?)?;
        if model.name != stream || model.tail != tail || model.ntimes != ntimes {
            return Err(GapcastError::InvalidParameter(format!(
                "cache {path} holds {}_{}_{}",
                model.name, model.ntimes, model.tail
            )));
        }
        model.validate()?;
        info!("Loaded dynamical model {path} ({} impacts)", model.nimpact());
        Ok(model)
    }

    pub fn save(&self, model: &DynamicalStreamModel) -> Result<Utf8PathBuf, GapcastError> {
        model.validate()?;
        let path = self.path(&model.name, model.ntimes, model.tail);
        write_atomically(&path, &serde_json::to_vec(model)?)?;
        Ok(path)
    }

    fn run_task(
        &self,
        task: &BuildTask,
        builder: &dyn StreamModelBuilder,
        overwrite: bool,
    ) -> Result<Utf8PathBuf, GapcastError> {
        let path = self.path(&task.stream, task.ntimes, task.tail);
        if path.exists() && !overwrite {
            info!("Model {path} already built, skipping");
            return Ok(path);
        }
        let model = builder.build(task)?;
        if model.name != task.stream || model.tail != task.tail || model.ntimes != task.ntimes {
            return Err(GapcastError::InvalidParameter(format!(
                "builder returned {}_{}_{} for task {}_{}_{}",
                model.name, model.ntimes, model.tail, task.stream, task.ntimes, task.tail
            )));
        }
        let path = self.save(&model)?;
        info!("Built and saved dynamical model {path}");
        Ok(path)
    }

    /// Build every task on a pool of `threads` workers (rayon's default when `None`).
    ///
    /// Return
    /// ----------
    /// * One outcome per task, in task order. A failing task does not stop the others.
    pub fn build_all(
        &self,
        tasks: &[BuildTask],
        builder: &dyn StreamModelBuilder,
        threads: Option<usize>,
        overwrite: bool,
    ) -> Result<Vec<BuildOutcome>, GapcastError> {
        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            pool = pool.num_threads(n);
        }
        let pool = pool
            .build()
            .map_err(|e| GapcastError::InvalidParameter(format!("worker pool: {e}")))?;

        #[cfg(feature = "progress")]
        let pb = {
            let pb = ProgressBar::new(tasks.len() as u64);
            if let Ok(style) = ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | ETA {eta_precise} | {msg}",
            ) {
                pb.set_style(style);
            }
            pb
        };

        let outcomes: Vec<BuildOutcome> = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    let res = self.run_task(task, builder, overwrite);
                    if let Err(e) = &res {
                        warn!(
                            "Building {}_{}_{} failed: {e}",
                            task.stream, task.ntimes, task.tail
                        );
                    }
                    #[cfg(feature = "progress")]
                    pb.inc(1);
                    (task.clone(), res)
                })
                .collect()
        });

        #[cfg(feature = "progress")]
        pb.finish_and_clear();

        Ok(outcomes)
    }
}

#[cfg(test)]
mod model_store_test {
    use super::*;
    use crate::dynamics::{ImpactHistory, TrackPoint};
    use camino::Utf8Path;
    use nalgebra::{Matrix6, Vector6};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ToyBuilder {
        calls: AtomicUsize,
    }

    impl StreamModelBuilder for ToyBuilder {
        fn build(&self, task: &BuildTask) -> Result<DynamicalStreamModel, GapcastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if task.stream == "Broken" {
                return Err(GapcastError::InvalidParameter("cannot integrate".into()));
            }
            let track = [-0.5, 0.5]
                .iter()
                .map(|&dangle| TrackPoint {
                    dangle,
                    xv: Vector6::new(10.0, dangle, 0.0, 0.0, 200.0, 0.0),
                    jacobian: Matrix6::identity(),
                })
                .collect();
            Ok(DynamicalStreamModel {
                name: task.stream.clone(),
                tail: task.tail,
                ntimes: task.ntimes,
                mean_dfreq: 0.1,
                sig_dfreq: 0.01,
                sig_dfreq_perp: 0.01,
                sig_angle: 0.01,
                t_disrupt: 4.0,
                kpc_per_rad: 10.0,
                dfreq_per_kms: [0.01, 0.01],
                track,
                track_width: 0.1,
                impacts: ImpactHistory::Unperturbed,
            })
        }
    }

    #[test]
    fn test_build_all_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let store = ModelStore::new(GapcastEnv::new(root, root));
        let builder = ToyBuilder {
            calls: AtomicUsize::new(0),
        };

        assert!(matches!(
            store.load("Toy", 1, Tail::Leading),
            Err(GapcastError::ModelCacheMiss(_))
        ));

        let tasks: Vec<BuildTask> = ["Toy", "Broken"]
            .iter()
            .flat_map(|s| {
                Tail::ALL.map(|tail| BuildTask {
                    stream: s.to_string(),
                    ntimes: 1,
                    tail,
                })
            })
            .collect();
        let outcomes = store.build_all(&tasks, &builder, Some(2), false).unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].1.is_ok() && outcomes[1].1.is_ok());
        assert!(outcomes[2].1.is_err() && outcomes[3].1.is_err());

        let model = store.load("Toy", 1, Tail::Trailing).unwrap();
        assert_eq!(model.tail, Tail::Trailing);
        assert_eq!(model.nimpact(), 0);

        // existing cache files are not rebuilt
        store.build_all(&tasks[..2], &builder, Some(2), false).unwrap();
        assert_eq!(builder.calls.load(Ordering::SeqCst), 4);
    }
}
