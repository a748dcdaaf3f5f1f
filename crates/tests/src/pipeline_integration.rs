//! Integration tests for the effect pipeline
//!
//! These tests drive complete pipelines through the I/O layer: WAV files in
//! and out, the threaded block loop, and spectral checks on the equalizer.

use crossbeam::channel::unbounded;
use gape_core::domain::audio::{BlockSink, BlockSource, OutputLayout, StreamConfig};
use gape_core::domain::config::{
    CompressorConfig, DelayConfig, EffectConfig, EqualizerConfig, GapeConfig, PrefilterConfig,
};
use gape_core::domain::dsp::{DelayMode, EffectPipeline};
use gape_core::domain::{BuiltinPreset, ControlFrame};
use gape_infra::audio::{
    block_channel, ChannelSink, ChannelSource, OverflowPolicy, ProcessingEngine, Reblocker,
    WavSink, WavSource,
};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::thread;
use tempfile::TempDir;

fn config(sample_rate: u32, block_size: usize, layout: OutputLayout, effect: EffectConfig) -> GapeConfig {
    GapeConfig {
        stream: StreamConfig {
            sample_rate,
            block_size,
            layout,
        },
        prefilter: PrefilterConfig {
            enabled: false,
            ..Default::default()
        },
        effect,
    }
}

fn generate_sine_wave(frequency: f32, sample_rate: u32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| 2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32)
        .map(|phase| 0.5 * phase.sin())
        .collect()
}

/// Run `input` through a fresh pipeline one block at a time
fn process_direct(config: &GapeConfig, input: &[f32]) -> Vec<f32> {
    let mut pipeline = EffectPipeline::new(config).unwrap();
    let mut out = vec![0.0; pipeline.output_len()];
    let mut result = Vec::new();
    for block in input.chunks_exact(pipeline.block_size()) {
        pipeline.process(block, &mut out).unwrap();
        result.extend_from_slice(&out);
    }
    result
}

// ============================================================================
// WAV FILES
// ============================================================================

#[test]
fn test_wav_echo_dry_wet() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("in.wav");
    let output_path = dir.path().join("out.wav");

    let spec = WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&input_path, spec).unwrap();
    for sample in [16384i16, 0, 0, 0, 0, 0, 0, 8192, 0, 0] {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    let config = config(
        8000,
        4,
        OutputLayout::DryWet,
        EffectConfig::Delay(DelayConfig {
            time_s: 2.0 / 8000.0,
            gain: 0.5,
            mode: DelayMode::Additive,
        }),
    );
    let pipeline = EffectPipeline::new(&config).unwrap();
    let source = WavSource::open(&input_path, 4).unwrap();
    let sink = WavSink::create(&output_path, 8000, 2, pipeline.output_len()).unwrap();

    let mut engine = ProcessingEngine::new(pipeline, Box::new(source), Box::new(sink)).unwrap();
    let stats = engine.run().unwrap();
    assert_eq!(stats.blocks, 3);

    let mut reader = WavReader::open(&output_path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 8000);
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 24);

    let dry: Vec<f32> = samples.iter().step_by(2).copied().collect();
    let wet: Vec<f32> = samples.iter().skip(1).step_by(2).copied().collect();

    let expected_dry = [0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.25, 0.0, 0.0, 0.0, 0.0];
    let expected_wet = [0.5, 0.0, 0.25, 0.0, 0.0, 0.0, 0.0, 0.25, 0.0, 0.125, 0.0, 0.0];
    for (got, want) in dry.iter().zip(expected_dry) {
        assert!((got - want).abs() < 1e-6, "dry {} != {}", got, want);
    }
    for (got, want) in wet.iter().zip(expected_wet) {
        assert!((got - want).abs() < 1e-6, "wet {} != {}", got, want);
    }
}

#[test]
fn test_wav_sample_rate_drives_delay_length() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("impulse.wav");

    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&input_path, spec).unwrap();
    writer.write_sample(1.0f32).unwrap();
    for _ in 0..199 {
        writer.write_sample(0.0f32).unwrap();
    }
    writer.finalize().unwrap();

    let mut source = WavSource::open(&input_path, 50).unwrap();
    let config = config(
        source.sample_rate(),
        50,
        OutputLayout::Wet,
        EffectConfig::Delay(DelayConfig {
            time_s: 0.005,
            gain: 1.0,
            mode: DelayMode::PassThrough,
        }),
    );
    let mut pipeline = EffectPipeline::new(&config).unwrap();

    let mut block = vec![0.0; 50];
    let mut out = vec![0.0; 50];
    let mut output = Vec::new();
    while source.next_block(&mut block).unwrap() {
        pipeline.process(&block, &mut out).unwrap();
        output.extend_from_slice(&out);
    }

    assert_eq!(output.len(), 200);
    let peak = output
        .iter()
        .position(|&s| s != 0.0)
        .unwrap();
    assert_eq!(peak, 80);
    assert_eq!(pipeline.latency(), 80);
}

#[test]
fn test_factory_default_processes_low_rate_wav() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("lab.wav");
    let output_path = dir.path().join("lab_out.wav");

    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&input_path, spec).unwrap();
    for sample in generate_sine_wave(440.0, 16000, 1000) {
        writer.write_sample((sample * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let mut config = GapeConfig::factory_default();
    let source = WavSource::open(&input_path, config.stream.block_size).unwrap();
    assert!(config.retarget_sample_rate(source.sample_rate()));
    config.validate().unwrap();

    let pipeline = EffectPipeline::new(&config).unwrap();
    let sink = WavSink::create(&output_path, 16000, 1, pipeline.output_len()).unwrap();
    let mut engine = ProcessingEngine::new(pipeline, Box::new(source), Box::new(sink)).unwrap();
    let stats = engine.run().unwrap();
    assert_eq!(stats.blocks, 10);

    let reader = WavReader::open(&output_path).unwrap();
    assert_eq!(reader.spec().sample_rate, 16000);
    assert_eq!(reader.duration(), 1000);
}

// ============================================================================
// THREADED LOOP
// ============================================================================

#[test]
fn test_engine_matches_direct_processing() {
    let config = config(
        48000,
        64,
        OutputLayout::Wet,
        EffectConfig::Compressor(CompressorConfig {
            threshold_db: -20.0,
            ratio: 4.0,
            window_size: Some(256),
        }),
    );
    let input = generate_sine_wave(220.0, 48000, 64 * 40);
    let expected = process_direct(&config, &input);

    let (in_tx, in_rx) = block_channel(4);
    let (out_tx, out_rx) = block_channel(4);

    // Producer delivers uneven chunks, as a device callback would
    let producer_input = input.clone();
    let producer = thread::spawn(move || {
        let mut reblocker = Reblocker::new(64).unwrap();
        for chunk in producer_input.chunks(37) {
            reblocker.push(chunk, |block| in_tx.send(block.to_vec()).unwrap());
        }
    });

    let pipeline = EffectPipeline::new(&config).unwrap();
    let mut engine = ProcessingEngine::new(
        pipeline,
        Box::new(ChannelSource::new(in_rx, 64)),
        Box::new(ChannelSink::new(out_tx, 64, OverflowPolicy::Block)),
    )
    .unwrap();
    let worker = thread::spawn(move || engine.run().unwrap());

    let output: Vec<f32> = out_rx.iter().flatten().collect();
    producer.join().unwrap();
    let stats = worker.join().unwrap();

    assert_eq!(stats.blocks, 40);
    assert_eq!(output, expected);
}

#[test]
fn test_engine_reload_from_control_frame() {
    let base = config(
        48000,
        100,
        OutputLayout::Wet,
        BuiltinPreset::Flat.effect_config(),
    );

    let (reload_tx, reload_rx) = unbounded();
    let (in_tx, in_rx) = block_channel(8);
    let (out_tx, out_rx) = block_channel(8);

    let mut engine = ProcessingEngine::new(
        EffectPipeline::new(&base).unwrap(),
        Box::new(ChannelSource::new(in_rx, 100)),
        Box::new(ChannelSink::new(out_tx, 100, OverflowPolicy::Block)),
    )
    .unwrap()
    .with_reload(reload_rx);

    in_tx.send(vec![0.5; 100]).unwrap();
    assert!(engine.step().unwrap());
    assert_eq!(engine.pipeline().effect_name(), "Equalizer");

    let frame: ControlFrame = "1,255,128,0".parse().unwrap();
    let mut next = base;
    next.effect = frame.decode().unwrap();
    reload_tx.send(EffectPipeline::new(&next).unwrap()).unwrap();

    in_tx.send(vec![0.5; 100]).unwrap();
    assert!(engine.step().unwrap());
    assert_eq!(engine.pipeline().effect_name(), "Echo");
    assert_eq!(engine.stats().reloads, 1);

    drop(in_tx);
    assert!(!engine.step().unwrap());
    assert_eq!(out_rx.try_iter().count(), 2);
}

// ============================================================================
// EQUALIZER SPECTRUM
// ============================================================================

#[test]
fn test_flat_equalizer_spectrum() {
    let config = config(
        48000,
        100,
        OutputLayout::Wet,
        EffectConfig::Equalizer(EqualizerConfig::default()),
    );

    let mut impulse = vec![0.0; 1100];
    impulse[0] = 1.0;
    let response = process_direct(&config, &impulse);

    let mut buffer: Vec<Complex<f32>> = response[..1024]
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .collect();
    FftPlanner::new().plan_fft_forward(1024).process(&mut buffer);

    for (bin, value) in buffer.iter().enumerate().take(513) {
        let magnitude = value.norm();
        assert!(
            (magnitude - 0.5).abs() < 1e-3,
            "bin {} magnitude {}",
            bin,
            magnitude
        );
    }
}

#[test]
fn test_bass_boost_spectrum() {
    let gains = EqualizerConfig::with_gains(12.0, 0.0, 0.0);
    let config = config(48000, 100, OutputLayout::Wet, EffectConfig::Equalizer(gains));

    let mut impulse = vec![0.0; 2100];
    impulse[0] = 1.0;
    let response = process_direct(&config, &impulse);

    let mut buffer: Vec<Complex<f32>> = response[..2048]
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .collect();
    FftPlanner::new().plan_fft_forward(2048).process(&mut buffer);

    let bin_hz = 48000.0 / 2048.0;
    let at = |hz: f32| buffer[(hz / bin_hz).round() as usize].norm();

    // 12 dB on the low band, unity elsewhere, all scaled by one half
    let boost = 0.5 * 10f32.powf(12.0 / 20.0);
    assert!((at(100.0) - boost).abs() / boost < 0.1, "low {}", at(100.0));
    assert!((at(8000.0) - 0.5).abs() < 0.05, "high {}", at(8000.0));
}

// ============================================================================
// PRESETS
// ============================================================================

#[test]
fn test_every_builtin_preset_runs() {
    let input = generate_sine_wave(440.0, 48000, 100 * 50);

    for preset in BuiltinPreset::ALL {
        assert_eq!(preset.pins().decode().unwrap(), preset);

        let config = GapeConfig::with_effect(preset.effect_config());
        let output = process_direct(&config, &input);

        assert_eq!(output.len(), input.len(), "{}", preset);
        assert!(
            output.iter().all(|s| s.is_finite() && s.abs() < 4.0),
            "{} produced an unbounded sample",
            preset
        );
    }
}

#[test]
fn test_compressor_halves_loud_constant() {
    let config = config(
        48000,
        4,
        OutputLayout::Wet,
        EffectConfig::Compressor(CompressorConfig {
            threshold_db: -20.0,
            ratio: 2.0,
            window_size: Some(4),
        }),
    );

    let output = process_direct(&config, &[0.5; 16]);
    for sample in output {
        assert!((sample - 0.25).abs() < 1e-6);
    }
}

#[test]
fn test_wav_sink_rejects_mismatched_layout() {
    let dir = TempDir::new().unwrap();
    let mut sink = WavSink::create(dir.path().join("o.wav"), 48000, 2, 200).unwrap();
    assert!(sink.write_block(&[0.0; 100]).is_err());
    sink.finish().unwrap();
}
