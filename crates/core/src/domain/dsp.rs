//! Block-streaming DSP kernels and the effect pipeline
//!
//! Kernels (leaves first):
//! - [`CircularHistory`]: fixed-capacity ring buffer shared by every kernel
//! - [`FirFilter`]: block FIR convolution
//! - [`DelayLine`]: single-tap delay, additive or pass-through
//! - [`RmsEstimator`]: sliding-window RMS with an incremental running sum
//! - [`Compressor`]: instantaneous RMS-gated attenuation
//! - [`Equalizer`]: three-band crossover with perfect reconstruction
//!
//! Every kernel is sized once at construction. Processing never allocates
//! and cannot fail except on a block length mismatch.

pub mod compressor;
pub mod delay;
pub mod design;
pub mod equalizer;
pub mod fir;
pub mod history;
pub mod rms;

pub use compressor::Compressor;
pub use delay::{DelayLine, DelayMode};
pub use equalizer::{BandGains, Equalizer};
pub use fir::FirFilter;
pub use history::CircularHistory;
pub use rms::RmsEstimator;

use crate::domain::audio::{zeroed_buffer, AudioError, OutputLayout, Result};
use crate::domain::config::{EffectConfig, GapeConfig};
use tracing::{info, trace};

/// Core trait for the effects a pipeline can run
///
/// `input` and `output` are distinct buffers of exactly one block.
pub trait Effect: Send {
    /// Process one block
    ///
    /// # Requirements
    /// - No allocations
    /// - `StreamError` when either slice is not one block long
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()>;

    /// Return every history to silence
    fn reset(&mut self);

    /// Delay in samples between an input and its aligned output
    fn latency(&self) -> usize;

    /// Effect name for logging and display
    fn name(&self) -> &str;
}

/// Parameter bounds and fixed constants
pub mod params {
    /// Longest echo delay in seconds
    pub const MAX_DELAY_S: f32 = 0.5;

    /// Echo gain range is [0, MAX_DELAY_GAIN]
    pub const MAX_DELAY_GAIN: f32 = 1.0;

    /// Highest compressor threshold in dB
    pub const MAX_THRESHOLD_DB: f32 = 6.0;

    /// Equalizer band gains are limited to +/- this many dB
    pub const BAND_GAIN_DB_LIMIT: f32 = 15.0;

    /// Scale applied to the summed equalizer bands
    pub const EQ_OUTPUT_SCALE: f32 = 0.5;

    /// Default RMS window, in blocks
    pub const DEFAULT_RMS_WINDOW_BLOCKS: usize = 100;

    /// Equalizer crossover defaults (Hz)
    pub const DEFAULT_LOW_CUTOFF_HZ: f32 = 350.0;
    pub const DEFAULT_MID_CUTOFF_HZ: f32 = 1050.0;
    pub const DEFAULT_EQ_TAPS: usize = 201;

    /// Input conditioning lowpass defaults
    pub const DEFAULT_PREFILTER_CUTOFF_HZ: f32 = 10000.0;
    pub const DEFAULT_PREFILTER_TAPS: usize = 63;

    /// Prefilter cutoff, as a fraction of Nyquist, when the stream rate is
    /// too low for the configured one
    pub const PREFILTER_NYQUIST_FRACTION: f32 = 0.9;
}

/// Convert decibels to a linear amplitude factor, `10^(dB/20)`
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

fn check_block(name: &str, block_size: usize, input: &[f32], output: &[f32]) -> Result<()> {
    if input.len() != block_size || output.len() != block_size {
        return Err(AudioError::StreamError(format!(
            "{} expects {} samples, got input {} output {}",
            name,
            block_size,
            input.len(),
            output.len()
        )));
    }
    Ok(())
}

// ============================================================================
// ECHO
// ============================================================================

/// Stand-alone delay effect
pub struct Echo {
    line: DelayLine,
    mode: DelayMode,
}

impl Echo {
    pub fn new(line: DelayLine, mode: DelayMode) -> Self {
        Self { line, mode }
    }

    pub fn mode(&self) -> DelayMode {
        self.mode
    }

    pub fn delay_samples(&self) -> usize {
        self.line.delay_samples()
    }
}

impl Effect for Echo {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        check_block(self.name(), self.line.block_size(), input, output)?;
        self.line.process(self.mode, input, output);
        Ok(())
    }

    fn reset(&mut self) {
        self.line.reset();
    }

    fn latency(&self) -> usize {
        match self.mode {
            DelayMode::Additive => 0,
            DelayMode::PassThrough => self.line.delay_samples(),
        }
    }

    fn name(&self) -> &str {
        "Echo"
    }
}

// ============================================================================
// DYNAMICS
// ============================================================================

/// RMS estimator feeding the compressor
pub struct Dynamics {
    rms: RmsEstimator,
    compressor: Compressor,
    /// RMS of the current block, sized once
    levels: Vec<f32>,
}

impl Dynamics {
    pub fn new(rms: RmsEstimator, compressor: Compressor) -> Result<Self> {
        if rms.block_size() != compressor.block_size() {
            return Err(AudioError::InvalidConfiguration(format!(
                "RMS block size {} differs from compressor block size {}",
                rms.block_size(),
                compressor.block_size()
            )));
        }

        let levels = zeroed_buffer(rms.block_size())?;
        Ok(Self {
            rms,
            compressor,
            levels,
        })
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    pub fn window_size(&self) -> usize {
        self.rms.window_size()
    }
}

impl Effect for Dynamics {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        check_block(self.name(), self.levels.len(), input, output)?;
        self.rms.process(input, &mut self.levels);
        self.compressor.process(&self.levels, input, output);
        Ok(())
    }

    fn reset(&mut self) {
        self.rms.reset();
        self.levels.fill(0.0);
    }

    fn latency(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "Compressor"
    }
}

// ============================================================================
// EFFECT PIPELINE
// ============================================================================

/// Build the runtime effect described by `effect`
pub fn build_effect(
    effect: &EffectConfig,
    sample_rate: u32,
    block_size: usize,
) -> Result<Box<dyn Effect>> {
    let built: Box<dyn Effect> = match effect {
        EffectConfig::Delay(delay) => {
            let line = DelayLine::from_seconds(delay.time_s, delay.gain, sample_rate, block_size)?;
            Box::new(Echo::new(line, delay.mode))
        }
        EffectConfig::Compressor(comp) => {
            let window = comp
                .window_size_for(block_size)
                .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
            let rms = RmsEstimator::new(window, block_size)?;
            let compressor = Compressor::new(comp.threshold_db, comp.ratio, block_size)?;
            Box::new(Dynamics::new(rms, compressor)?)
        }
        EffectConfig::Equalizer(eq) => Box::new(Equalizer::with_crossover(
            eq.low_cutoff_hz,
            eq.mid_cutoff_hz,
            eq.taps,
            eq.gains(),
            sample_rate,
            block_size,
        )?),
    };
    Ok(built)
}

/// Optional prefilter followed by exactly one effect
///
/// Owns every piece of state it touches, so one processing thread drives it
/// with no locking.
pub struct EffectPipeline {
    prefilter: Option<FirFilter>,
    effect: Box<dyn Effect>,
    layout: OutputLayout,
    block_size: usize,
    /// Prefiltered input block
    conditioned: Vec<f32>,
    /// Effect output before interleaving, empty unless the layout is dry/wet
    wet: Vec<f32>,
}

impl EffectPipeline {
    /// Validate `config` and construct every kernel it names
    pub fn new(config: &GapeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        let stream = config.stream;
        let prefilter = if config.prefilter.enabled {
            let coefficients = design::lowpass(
                config.prefilter.taps,
                config.prefilter.cutoff_hz,
                stream.sample_rate,
            )?;
            Some(FirFilter::new(&coefficients, stream.block_size)?)
        } else {
            None
        };

        let effect = build_effect(&config.effect, stream.sample_rate, stream.block_size)?;
        let wet = match stream.layout {
            OutputLayout::Wet => Vec::new(),
            OutputLayout::DryWet => zeroed_buffer(stream.block_size)?,
        };

        info!(
            effect = effect.name(),
            sample_rate = stream.sample_rate,
            block_size = stream.block_size,
            layout = ?stream.layout,
            prefilter = prefilter.is_some(),
            "Effect pipeline created"
        );

        Ok(Self {
            prefilter,
            effect,
            layout: stream.layout,
            block_size: stream.block_size,
            conditioned: zeroed_buffer(stream.block_size)?,
            wet,
        })
    }

    /// Process one block
    ///
    /// `input` holds `block_size` samples, `output` holds
    /// `block_size * layout.channels()`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        let expected_out = self.block_size * self.layout.channels();
        if input.len() != self.block_size || output.len() != expected_out {
            return Err(AudioError::StreamError(format!(
                "pipeline expects {} in / {} out, got {} / {}",
                self.block_size,
                expected_out,
                input.len(),
                output.len()
            )));
        }

        self.conditioned.copy_from_slice(input);
        if let Some(prefilter) = &mut self.prefilter {
            prefilter.process_in_place(&mut self.conditioned);
        }

        match self.layout {
            OutputLayout::Wet => self.effect.process(&self.conditioned, output)?,
            OutputLayout::DryWet => {
                self.effect.process(&self.conditioned, &mut self.wet)?;
                for ((frame, &dry), &wet) in output
                    .chunks_exact_mut(2)
                    .zip(self.conditioned.iter())
                    .zip(self.wet.iter())
                {
                    frame[0] = dry;
                    frame[1] = wet;
                }
            }
        }

        trace!(effect = self.effect.name(), "block processed");
        Ok(())
    }

    /// Zero every history in the pipeline
    pub fn reset(&mut self) {
        if let Some(prefilter) = &mut self.prefilter {
            prefilter.reset();
        }
        self.effect.reset();
        self.conditioned.fill(0.0);
        self.wet.fill(0.0);
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    /// Samples per output block
    pub fn output_len(&self) -> usize {
        self.block_size * self.layout.channels()
    }

    pub fn effect_name(&self) -> &str {
        self.effect.name()
    }

    /// Prefilter group delay plus effect latency
    pub fn latency(&self) -> usize {
        self.prefilter.as_ref().map_or(0, FirFilter::group_delay) + self.effect.latency()
    }
}

// ============================================================================
// TESTS
// ============================================================================
