//! Instantaneous RMS-gated compressor
//!
//! No attack or release: each sample is attenuated by `1 / ratio` exactly
//! when its RMS estimate is above the threshold.

use crate::domain::audio::{AudioError, Result};
use crate::domain::dsp::{db_to_gain, params};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compressor {
    threshold: f32,
    scale: f32,
    block_size: usize,
}

impl Compressor {
    /// `threshold_db` must be at most 6 dB and `ratio` strictly positive
    pub fn new(threshold_db: f32, ratio: f32, block_size: usize) -> Result<Self> {
        if !(threshold_db.is_finite() && threshold_db <= params::MAX_THRESHOLD_DB) {
            return Err(AudioError::InvalidConfiguration(format!(
                "compressor threshold {} dB above {} dB",
                threshold_db,
                params::MAX_THRESHOLD_DB
            )));
        }
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(AudioError::InvalidConfiguration(format!(
                "compressor ratio {} must be positive",
                ratio
            )));
        }
        if block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }

        let threshold = db_to_gain(threshold_db);
        debug!(threshold_db, threshold, ratio, "compressor created");

        Ok(Self {
            threshold,
            scale: 1.0 / ratio,
            block_size,
        })
    }

    #[inline]
    pub fn process_sample(&self, rms: f32, x: f32) -> f32 {
        if rms > self.threshold {
            x * self.scale
        } else {
            x
        }
    }

    /// Gate each `input` sample on the matching `rms` sample
    pub fn process(&self, rms: &[f32], input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(rms.len(), self.block_size);
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(output.len(), self.block_size);

        for ((y, &x), &level) in output.iter_mut().zip(input.iter()).zip(rms.iter()) {
            *y = self.process_sample(level, x);
        }
    }

    /// Linear RMS threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Gain applied above the threshold, `1 / ratio`
    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parameter_bounds() {
        assert!(Compressor::new(6.0, 2.0, 4).is_ok());
        assert!(Compressor::new(6.1, 2.0, 4).is_err());
        assert!(Compressor::new(-12.0, 0.0, 4).is_err());
        assert!(Compressor::new(-12.0, -1.0, 4).is_err());
        assert!(Compressor::new(f32::NAN, 2.0, 4).is_err());
    }

    #[test]
    fn test_threshold_conversion() {
        let comp = Compressor::new(-20.0, 4.0, 1).unwrap();
        assert!((comp.threshold() - 0.1).abs() < 1e-6);
        assert!((comp.scale() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_attenuates_above_threshold() {
        let comp = Compressor::new(-6.0, 2.0, 4).unwrap();
        let rms = [0.1, 0.9, 0.2, 1.0];
        let input = [0.4, -0.8, 0.3, 1.0];
        let mut output = [0.0; 4];

        comp.process(&rms, &input, &mut output);
        assert_eq!(output, [0.4, -0.4, 0.3, 0.5]);
    }

    #[test]
    fn test_equal_to_threshold_passes() {
        let comp = Compressor::new(0.0, 3.0, 1).unwrap();
        assert_eq!(comp.process_sample(1.0, 0.7), 0.7);
    }

    proptest! {
        #[test]
        fn prop_identity_below_threshold(
            threshold_db in -60.0f32..6.0,
            ratio in 0.1f32..20.0,
            x in -1.0f32..1.0,
            fraction in 0.0f32..1.0,
        ) {
            let comp = Compressor::new(threshold_db, ratio, 1).unwrap();
            let rms = comp.threshold() * fraction;
            prop_assert_eq!(comp.process_sample(rms, x), x);
        }
    }
}
