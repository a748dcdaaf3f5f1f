//! Three-band FIR crossover equalizer
//!
//! Two lowpass stages split the signal into low, mid and high bands. The
//! high band is formed by subtraction and the alignment delays match the
//! filters' group delays, so with unity band gains the output is the input
//! delayed by `gd(low) + gd(mid)` samples and scaled by 0.5, whatever the
//! filter coefficients are.

use crate::domain::audio::{AudioError, Result};
use crate::domain::dsp::delay::{DelayLine, DelayMode};
use crate::domain::dsp::fir::FirFilter;
use crate::domain::dsp::{db_to_gain, design, params, Effect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Per-band gains in dB
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BandGains {
    pub low_db: f32,
    pub mid_db: f32,
    pub high_db: f32,
}

impl BandGains {
    pub fn new(low_db: f32, mid_db: f32, high_db: f32) -> Self {
        Self {
            low_db,
            mid_db,
            high_db,
        }
    }

    /// Every band within +/- 15 dB
    pub fn validate(&self) -> Result<()> {
        for (band, db) in [
            ("low", self.low_db),
            ("mid", self.mid_db),
            ("high", self.high_db),
        ] {
            if !(db.is_finite() && db.abs() <= params::BAND_GAIN_DB_LIMIT) {
                return Err(AudioError::InvalidConfiguration(format!(
                    "{} band gain {} dB outside +/-{} dB",
                    band,
                    db,
                    params::BAND_GAIN_DB_LIMIT
                )));
            }
        }
        Ok(())
    }
}

pub struct Equalizer {
    low_filter: FirFilter,
    mid_filter: FirFilter,
    /// Aligns the low band with the mid and high bands (mid group delay)
    low_delay: DelayLine,
    /// Aligns the input with the low band before subtraction (low group delay)
    mid_input_delay: DelayLine,
    /// Aligns the mid-band input with the mid band before subtraction (mid group delay)
    high_delay: DelayLine,
    low_gain: f32,
    mid_gain: f32,
    high_gain: f32,
    gains: BandGains,
    block_size: usize,
}

impl Equalizer {
    /// Build from explicit lowpass coefficient sets
    ///
    /// Both filters need at least 3 taps so that each alignment delay is at
    /// least one sample.
    pub fn new(
        low_coefficients: &[f32],
        mid_coefficients: &[f32],
        gains: BandGains,
        block_size: usize,
    ) -> Result<Self> {
        gains.validate()?;
        for (name, coefficients) in [("low", low_coefficients), ("mid", mid_coefficients)] {
            if coefficients.len() < 3 {
                return Err(AudioError::InvalidConfiguration(format!(
                    "{} band filter needs at least 3 taps, got {}",
                    name,
                    coefficients.len()
                )));
            }
        }

        let low_filter = FirFilter::new(low_coefficients, block_size)?;
        let mid_filter = FirFilter::new(mid_coefficients, block_size)?;

        let low_gd = low_filter.group_delay();
        let mid_gd = mid_filter.group_delay();

        debug!(low_gd, mid_gd, ?gains, "equalizer alignment");

        Ok(Self {
            low_delay: DelayLine::new(mid_gd, 1.0, block_size)?,
            mid_input_delay: DelayLine::new(low_gd, 1.0, block_size)?,
            high_delay: DelayLine::new(mid_gd, 1.0, block_size)?,
            low_filter,
            mid_filter,
            low_gain: db_to_gain(gains.low_db),
            mid_gain: db_to_gain(gains.mid_db),
            high_gain: db_to_gain(gains.high_db),
            gains,
            block_size,
        })
    }

    /// Build with designed lowpass crossovers at `low_cutoff_hz` and `mid_cutoff_hz`
    pub fn with_crossover(
        low_cutoff_hz: f32,
        mid_cutoff_hz: f32,
        taps: usize,
        gains: BandGains,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self> {
        if !(low_cutoff_hz < mid_cutoff_hz) {
            return Err(AudioError::InvalidConfiguration(format!(
                "low crossover {} Hz must be below mid crossover {} Hz",
                low_cutoff_hz, mid_cutoff_hz
            )));
        }

        let low = design::lowpass(taps, low_cutoff_hz, sample_rate)?;
        let mid = design::lowpass(taps, mid_cutoff_hz, sample_rate)?;

        info!(
            low_cutoff_hz,
            mid_cutoff_hz, taps, sample_rate, "equalizer crossovers designed"
        );

        Self::new(&low, &mid, gains, block_size)
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let low = self.low_filter.process_sample(x);
        let mid_input = self.mid_input_delay.process_sample(DelayMode::PassThrough, x) - low;
        let mid = self.mid_filter.process_sample(mid_input);
        let high = self
            .high_delay
            .process_sample(DelayMode::PassThrough, mid_input)
            - mid;
        let low_aligned = self.low_delay.process_sample(DelayMode::PassThrough, low);

        params::EQ_OUTPUT_SCALE
            * (self.low_gain * low_aligned + self.mid_gain * mid + self.high_gain * high)
    }

    pub fn gains(&self) -> BandGains {
        self.gains
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total alignment delay in samples
    pub fn latency_samples(&self) -> usize {
        self.low_filter.group_delay() + self.mid_filter.group_delay()
    }
}

impl Effect for Equalizer {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != self.block_size || output.len() != self.block_size {
            return Err(AudioError::StreamError(format!(
                "equalizer expects {} samples, got input {} output {}",
                self.block_size,
                input.len(),
                output.len()
            )));
        }

        for (y, &x) in output.iter_mut().zip(input.iter()) {
            *y = self.process_sample(x);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.low_filter.reset();
        self.mid_filter.reset();
        self.low_delay.reset();
        self.mid_input_delay.reset();
        self.high_delay.reset();
    }

    fn latency(&self) -> usize {
        self.latency_samples()
    }

    fn name(&self) -> &str {
        "Equalizer"
    }
}
