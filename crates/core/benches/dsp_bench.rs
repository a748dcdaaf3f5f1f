// Performance benchmarks for the DSP kernels
//
// Run with: cargo bench -p gape-core --bench dsp_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gape_core::domain::config::{EffectConfig, GapeConfig};
use gape_core::domain::dsp::*;
use gape_core::domain::BuiltinPreset;
use std::hint::black_box;

const BLOCK: usize = 100;

fn test_block() -> Vec<f32> {
    (0..BLOCK)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin())
        .collect()
}

fn bench_fir(c: &mut Criterion) {
    let mut group = c.benchmark_group("fir_block_100");
    let input = test_block();
    let mut output = vec![0.0; BLOCK];

    for taps in [15usize, 63, 201] {
        let coefficients = design::lowpass(taps, 10000.0, 48000).unwrap();
        let mut fir = FirFilter::new(&coefficients, BLOCK).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(taps), &taps, |b, _| {
            b.iter(|| fir.process(black_box(&input), black_box(&mut output)));
        });
    }

    group.finish();
}

fn bench_delay(c: &mut Criterion) {
    let input = test_block();
    let mut output = vec![0.0; BLOCK];
    let mut line = DelayLine::from_seconds(0.5, 0.5, 48000, BLOCK).unwrap();

    c.bench_function("delay_additive_block_100", |b| {
        b.iter(|| line.process(DelayMode::Additive, black_box(&input), black_box(&mut output)));
    });
}

fn bench_rms_compressor(c: &mut Criterion) {
    let input = test_block();
    let mut output = vec![0.0; BLOCK];
    let rms = RmsEstimator::new(100 * BLOCK, BLOCK).unwrap();
    let compressor = Compressor::new(-12.0, 2.0, BLOCK).unwrap();
    let mut dynamics = Dynamics::new(rms, compressor).unwrap();

    c.bench_function("dynamics_block_100", |b| {
        b.iter(|| dynamics.process(black_box(&input), black_box(&mut output)).unwrap());
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_block_100");
    let input = test_block();
    let mut output = vec![0.0; BLOCK];

    for preset in [
        BuiltinPreset::LargeRoom,
        BuiltinPreset::CoffeeShop,
        BuiltinPreset::BassBoost,
    ] {
        let config = GapeConfig::with_effect(preset.effect_config());
        let mut pipeline = EffectPipeline::new(&config).unwrap();
        let label = match config.effect {
            EffectConfig::Delay(_) => "delay",
            EffectConfig::Compressor(_) => "compressor",
            EffectConfig::Equalizer(_) => "equalizer",
        };
        group.bench_function(label, |b| {
            b.iter(|| pipeline.process(black_box(&input), black_box(&mut output)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fir, bench_delay, bench_rms_compressor, bench_pipeline);
criterion_main!(benches);
