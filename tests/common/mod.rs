#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::{Matrix6, Vector6};

use gapcast::{
    background::{BackgroundFieldModel, BackgroundStar},
    coordinates::SkyPosition,
    dynamics::{DynamicalStreamModel, ImpactGeometry, ImpactHistory, Tail, TrackPoint},
    env_state::GapcastEnv,
    gapcast::Gapcast,
    photometry::{isochrone::IsochroneGrid, EvolutionaryStage},
};

pub fn data_path(file: &str) -> Utf8PathBuf {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(file)
}

/// 2 ages x 2 metallicities, bands g, r, z087 and h158.
pub fn synthetic_grid() -> IsochroneGrid {
    IsochroneGrid::from_csv_path(&data_path("synthetic_isochrones.csv")).unwrap()
}

pub fn temp_env(dir: &tempfile::TempDir) -> GapcastEnv {
    let root = Utf8Path::from_path(dir.path()).unwrap();
    GapcastEnv::new(root.join("data"), root.join("local"))
}

/// A [`Gapcast`] whose built-in surveys all have a selection model up to the RGB.
pub fn gapcast_with_selection(env: GapcastEnv, save: bool) -> Gapcast {
    let gapcast = Gapcast::new(env).unwrap();
    let grid = synthetic_grid();
    for key in gapcast.registry().keys() {
        gapcast
            .load_iso_interps(&key, EvolutionaryStage::Rgb, Some(&grid), true, save)
            .unwrap();
    }
    gapcast
}

/// A handful of field stars around the stream isochrones.
pub fn background() -> BackgroundFieldModel {
    let bands = ["g", "r", "z087", "h158"].map(String::from).to_vec();
    let stars = [
        // on the Phoenix isochrone
        (22.215, 21.724, 21.517, 21.117),
        (22.0, 21.25, 21.25, 20.85),
        (23.0, 22.1, 22.2, 21.8),
        (21.5, 20.0, 20.6, 20.2),
        (24.5, 23.3, 23.6, 23.2),
        (18.0, 17.5, 17.3, 16.9),
        (26.0, 24.8, 25.1, 24.7),
    ]
    .iter()
    .enumerate()
    .map(|(i, &(g, r, z, h))| BackgroundStar {
        position: SkyPosition::new(0.1 * i as f64, -0.05 * i as f64),
        mass: 0.7,
        mags: vec![g, r, z, h],
    })
    .collect();
    BackgroundFieldModel::new(bands, stars).unwrap()
}

/// Stream track on a 15 kpc circle around the Galactic centre.
pub fn toy_model(
    name: &str,
    ntimes: usize,
    tail: Tail,
    impacts: ImpactHistory,
) -> DynamicalStreamModel {
    let track = (0..=20)
        .map(|k| {
            let dangle = -1.0 + 0.1 * k as f64;
            TrackPoint {
                dangle,
                xv: Vector6::new(
                    15.0 * dangle.cos(),
                    15.0 * dangle.sin(),
                    4.0,
                    -200.0 * dangle.sin(),
                    200.0 * dangle.cos(),
                    0.0,
                ),
                jacobian: Matrix6::identity(),
            }
        })
        .collect();
    DynamicalStreamModel {
        name: name.to_string(),
        tail,
        ntimes,
        mean_dfreq: 0.08,
        sig_dfreq: 0.015,
        sig_dfreq_perp: 0.008,
        sig_angle: 0.01,
        t_disrupt: 5.0,
        kpc_per_rad: 15.0,
        dfreq_per_kms: [0.006, 0.006],
        track,
        track_width: 0.25,
        impacts,
    }
}

pub fn two_impacts() -> ImpactHistory {
    ImpactHistory::from_impacts(vec![
        ImpactGeometry {
            time: 0.8,
            dangle: 0.15,
            impact_b: 0.05,
            w_par: 60.0,
            w_perp: 140.0,
        },
        ImpactGeometry {
            time: 2.5,
            dangle: 0.05,
            impact_b: 0.0,
            w_par: -30.0,
            w_perp: 180.0,
        },
    ])
    .unwrap()
}
