//! Single-tap delay line
//!
//! One kernel serves two roles: the stand-alone echo adds the delayed tap to
//! the input, while the equalizer uses the bare tap to keep its bands aligned.

use crate::domain::audio::{AudioError, Result};
use crate::domain::dsp::history::CircularHistory;
use crate::domain::dsp::params;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How the delayed tap is combined with the current input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    /// `input + gain * tap`
    #[default]
    Additive,
    /// `gain * tap`
    PassThrough,
}

#[derive(Debug, Clone)]
pub struct DelayLine {
    history: CircularHistory,
    gain: f32,
    block_size: usize,
}

impl DelayLine {
    /// Create a delay of `delay_samples` (at least 1) with a zeroed history
    pub fn new(delay_samples: usize, gain: f32, block_size: usize) -> Result<Self> {
        if delay_samples == 0 {
            return Err(AudioError::InvalidConfiguration(
                "delay length must be at least one sample".to_string(),
            ));
        }
        if block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }
        if !gain.is_finite() {
            return Err(AudioError::InvalidConfiguration(format!(
                "delay gain {} is not finite",
                gain
            )));
        }

        debug!(delay_samples, gain, block_size, "delay line created");

        Ok(Self {
            history: CircularHistory::new(delay_samples)?,
            gain,
            block_size,
        })
    }

    /// Create an echo delay from a time in seconds, enforcing the echo bounds
    ///
    /// `time_s` must lie in `(0, 0.5]` and `gain` in `[0, 1]`. The length is
    /// rounded to the nearest sample and never drops below one.
    pub fn from_seconds(
        time_s: f32,
        gain: f32,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self> {
        if !(time_s > 0.0 && time_s <= params::MAX_DELAY_S) {
            return Err(AudioError::InvalidConfiguration(format!(
                "delay time {} s outside (0, {}] s",
                time_s,
                params::MAX_DELAY_S
            )));
        }
        if !(0.0..=params::MAX_DELAY_GAIN).contains(&gain) {
            return Err(AudioError::InvalidConfiguration(format!(
                "delay gain {} outside [0, {}]",
                gain,
                params::MAX_DELAY_GAIN
            )));
        }

        let delay_samples = ((time_s * sample_rate as f32).round() as usize).max(1);
        Self::new(delay_samples, gain, block_size)
    }

    /// Process one sample
    #[inline]
    pub fn process_sample(&mut self, mode: DelayMode, x: f32) -> f32 {
        let tap = self.history.replace_oldest(x);
        match mode {
            DelayMode::Additive => x + self.gain * tap,
            DelayMode::PassThrough => self.gain * tap,
        }
    }

    /// Process a block; `input` and `output` hold `block_size` samples
    pub fn process(&mut self, mode: DelayMode, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(output.len(), self.block_size);

        for (y, &x) in output.iter_mut().zip(input.iter()) {
            *y = self.process_sample(mode, x);
        }
    }

    pub fn process_in_place(&mut self, mode: DelayMode, block: &mut [f32]) {
        debug_assert_eq!(block.len(), self.block_size);

        for sample in block.iter_mut() {
            *sample = self.process_sample(mode, *sample);
        }
    }

    /// Delay in samples
    pub fn delay_samples(&self) -> usize {
        self.history.capacity()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
