//! Benchmarks for StreamSampler::sample (single call, no worker pool)
//!
//! Examples:
//!   cargo bench --bench sample_stream
//!   cargo bench sample_stream -- sample_stream/unperturbed_10k
//!   cargo bench sample_stream -- sample_stream/perturbed_10k

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nalgebra::{Matrix6, Vector6};
use rand::{rngs::StdRng, SeedableRng};

use gapcast::dynamics::{DynamicalStreamModel, ImpactGeometry, ImpactHistory, Tail, TrackPoint};
use gapcast::sampler::{SampleParams, StreamSampler};
use gapcast::stream::StreamConfig;

/// Pal5-like leading tail on a 13 kpc circle, with `nimpact` evenly spread impacts.
fn make_fixture_model(nimpact: usize) -> DynamicalStreamModel {
    let track = (0..=40)
        .map(|k| {
            let dangle = -1.0 + 0.05 * k as f64;
            TrackPoint {
                dangle,
                xv: Vector6::new(
                    13.0 * dangle.cos(),
                    13.0 * dangle.sin(),
                    15.0,
                    -180.0 * dangle.sin(),
                    180.0 * dangle.cos(),
                    -40.0,
                ),
                jacobian: Matrix6::identity(),
            }
        })
        .collect();

    let impacts = (0..nimpact)
        .map(|i| ImpactGeometry {
            time: 0.5 + 0.4 * i as f64,
            dangle: 0.02 * i as f64,
            impact_b: 0.1,
            w_par: 50.0,
            w_perp: 150.0,
        })
        .collect();

    DynamicalStreamModel {
        name: "Pal5".into(),
        tail: Tail::Leading,
        ntimes: 64,
        mean_dfreq: 0.09,
        sig_dfreq: 0.02,
        sig_dfreq_perp: 0.01,
        sig_angle: 0.01,
        t_disrupt: 5.0,
        kpc_per_rad: 13.0,
        dfreq_per_kms: [0.007, 0.007],
        track,
        track_width: 0.2,
        impacts: ImpactHistory::from_impacts(impacts).expect("impact fixture"),
    }
}

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_stream");

    let unperturbed = StreamConfig::pal5()
        .with_model(make_fixture_model(0))
        .expect("valid model");
    let perturbed = StreamConfig::pal5()
        .with_model(make_fixture_model(8))
        .expect("valid model");
    let params = SampleParams::builder()
        .n(10_000)
        .tail(Tail::Leading)
        .build()
        .expect("sample params");

    // 1) No impacts: base draws and sky projection only
    group.bench_function("unperturbed_10k", |b| {
        let sampler = StreamSampler::new(&unperturbed);
        b.iter_batched(
            || StdRng::seed_from_u64(42),
            |mut rng| black_box(sampler.sample(&params, &mut rng)),
            BatchSize::SmallInput,
        )
    });

    // 2) Eight impacts replayed on every draw
    group.bench_function("perturbed_10k", |b| {
        let sampler = StreamSampler::new(&perturbed);
        b.iter_batched(
            || StdRng::seed_from_u64(42),
            |mut rng| black_box(sampler.sample(&params, &mut rng)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(sampler_benches, bench_sample);
criterion_main!(sampler_benches);
