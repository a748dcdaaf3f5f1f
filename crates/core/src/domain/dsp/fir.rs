//! Block FIR convolution over a circular history
//!
//! The history holds the last N inputs, so input and output may alias: each
//! input sample is copied into the history before its output is written.

use crate::domain::audio::{AudioError, Result};
use crate::domain::dsp::history::CircularHistory;
use num_complex::Complex;
use tracing::debug;

/// Finite impulse response filter with immutable coefficients
#[derive(Debug, Clone)]
pub struct FirFilter {
    coefficients: Box<[f32]>,
    history: CircularHistory,
    block_size: usize,
}

impl FirFilter {
    /// Create a filter from a copy of `coefficients`
    ///
    /// The history starts at zero, so the first outputs are the filter's
    /// response to a signal preceded by silence.
    pub fn new(coefficients: &[f32], block_size: usize) -> Result<Self> {
        if coefficients.is_empty() {
            return Err(AudioError::InvalidConfiguration(
                "FIR filter needs at least one coefficient".to_string(),
            ));
        }
        if block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(AudioError::InvalidConfiguration(
                "FIR coefficients must be finite".to_string(),
            ));
        }

        let history = CircularHistory::new(coefficients.len())?;

        debug!(taps = coefficients.len(), block_size, "FIR filter created");

        Ok(Self {
            coefficients: coefficients.into(),
            history,
            block_size,
        })
    }

    /// Filter one sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        self.history.write(x);
        self.history.dot_recent(&self.coefficients)
    }

    /// Filter a block from `input` into `output`
    ///
    /// Both slices are expected to hold `block_size` samples; extra samples
    /// in the longer slice are left alone.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(output.len(), self.block_size);

        for (y, &x) in output.iter_mut().zip(input.iter()) {
            *y = self.process_sample(x);
        }
    }

    /// Filter a block in place
    pub fn process_in_place(&mut self, block: &mut [f32]) {
        debug_assert_eq!(block.len(), self.block_size);

        for sample in block.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Number of taps
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// Group delay in whole samples for a symmetric (linear-phase) filter
    pub fn group_delay(&self) -> usize {
        (self.coefficients.len() - 1) / 2
    }

    /// Complex response H(e^jw) at `freq_hz`
    pub fn frequency_response(&self, freq_hz: f32, sample_rate: f32) -> Complex<f32> {
        let w = 2.0 * std::f32::consts::PI * freq_hz / sample_rate;
        self.coefficients
            .iter()
            .enumerate()
            .map(|(k, &c)| Complex::from_polar(c, -w * k as f32))
            .sum()
    }

    /// Clear the history back to silence
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_empty_coefficients() {
        assert!(matches!(
            FirFilter::new(&[], 4),
            Err(AudioError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_zero_block() {
        assert!(FirFilter::new(&[1.0], 0).is_err());
    }

    #[test]
    fn test_two_tap_average() {
        let mut fir = FirFilter::new(&[0.5, 0.5], 4).unwrap();

        let mut output = [0.0; 4];
        fir.process(&[1.0, 0.0, 0.0, 0.0], &mut output);
        assert_eq!(output, [0.5, 0.5, 0.0, 0.0]);

        fir.process(&[0.0, 0.0, 0.0, 0.0], &mut output);
        assert_eq!(output, [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_impulse_response_spans_blocks() {
        let coefficients = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let mut fir = FirFilter::new(&coefficients, 4).unwrap();

        let mut first = [1.0, 0.0, 0.0, 0.0];
        let mut second = [0.0; 4];
        fir.process_in_place(&mut first);
        fir.process_in_place(&mut second);

        let response: Vec<f32> = first.iter().chain(second.iter()).copied().collect();
        for (k, &c) in coefficients.iter().enumerate() {
            assert!((response[k] - c).abs() < 1e-6);
        }
        assert!(response[6].abs() < 1e-6);
        assert!(response[7].abs() < 1e-6);
    }

    #[test]
    fn test_in_place_matches_separate_buffers() {
        let coefficients = [0.25, -0.5, 0.75];
        let input = [0.3, -0.1, 0.8, 0.0, 1.0];

        let mut a = FirFilter::new(&coefficients, 5).unwrap();
        let mut b = FirFilter::new(&coefficients, 5).unwrap();

        let mut out = [0.0; 5];
        a.process(&input, &mut out);

        let mut in_place = input;
        b.process_in_place(&mut in_place);

        assert_eq!(out, in_place);
    }

    #[test]
    fn test_reset() {
        let mut fir = FirFilter::new(&[0.5, 0.5], 2).unwrap();
        let mut block = [1.0, 1.0];
        fir.process_in_place(&mut block);

        fir.reset();
        let mut silence = [0.0, 0.0];
        fir.process_in_place(&mut silence);
        assert_eq!(silence, [0.0, 0.0]);
    }

    #[test]
    fn test_group_delay() {
        let fir = FirFilter::new(&[0.0; 63], 8).unwrap();
        assert_eq!(fir.group_delay(), 31);
        assert_eq!(fir.len(), 63);
    }

    #[test]
    fn test_frequency_response_dc_and_nyquist() {
        let fir = FirFilter::new(&[0.5, 0.5], 1).unwrap();
        let dc = fir.frequency_response(0.0, 48000.0);
        let nyquist = fir.frequency_response(24000.0, 48000.0);

        assert!((dc.norm() - 1.0).abs() < 1e-6);
        assert!(nyquist.norm() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_linear_and_time_invariant(
            coefficients in prop::collection::vec(-1.0f32..1.0, 1..16),
            x1 in prop::collection::vec(-1.0f32..1.0, 32),
            x2 in prop::collection::vec(-1.0f32..1.0, 32),
            a in -2.0f32..2.0,
            b in -2.0f32..2.0,
        ) {
            let block = 8;
            let mut f1 = FirFilter::new(&coefficients, block).unwrap();
            let mut f2 = FirFilter::new(&coefficients, block).unwrap();
            let mut f3 = FirFilter::new(&coefficients, block).unwrap();

            let combined: Vec<f32> = x1.iter().zip(x2.iter()).map(|(p, q)| a * p + b * q).collect();

            let mut y1 = vec![0.0; 32];
            let mut y2 = vec![0.0; 32];
            let mut y3 = vec![0.0; 32];
            for start in (0..32).step_by(block) {
                let range = start..start + block;
                f1.process(&x1[range.clone()], &mut y1[range.clone()]);
                f2.process(&x2[range.clone()], &mut y2[range.clone()]);
                f3.process(&combined[range.clone()], &mut y3[range]);
            }

            for n in 0..32 {
                let expected = a * y1[n] + b * y2[n];
                prop_assert!((y3[n] - expected).abs() < 1e-3);
            }
        }
    }
}
