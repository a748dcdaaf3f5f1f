//! Sliding-window RMS estimator
//!
//! The history stores `window_size - 1` past squares. Each output combines
//! them with the current square, so exactly `window_size` terms contribute.

use crate::domain::audio::{AudioError, Result};
use crate::domain::dsp::history::CircularHistory;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RmsEstimator {
    squares: CircularHistory,
    /// Sum of the squares currently held in `squares`
    running_sum: f64,
    window_size: usize,
    block_size: usize,
}

impl RmsEstimator {
    pub fn new(window_size: usize, block_size: usize) -> Result<Self> {
        if window_size < 2 {
            return Err(AudioError::InvalidConfiguration(format!(
                "RMS window of {} samples is too short (minimum 2)",
                window_size
            )));
        }
        if block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }

        debug!(window_size, block_size, "RMS estimator created");

        Ok(Self {
            squares: CircularHistory::new(window_size - 1)?,
            running_sum: 0.0,
            window_size,
            block_size,
        })
    }

    /// Estimate the RMS including sample `x`
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let square = x * x;
        let total = (self.running_sum + f64::from(square)).max(0.0);
        let rms = (total / self.window_size as f64).sqrt() as f32;

        let evicted = self.squares.replace_oldest(square);
        self.running_sum += f64::from(square) - f64::from(evicted);

        rms
    }

    /// Write the RMS estimate for each input sample into `output`
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(output.len(), self.block_size);

        for (y, &x) in output.iter_mut().zip(input.iter()) {
            *y = self.process_sample(x);
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sum of the `window_size - 1` most recent squares
    pub fn running_sum(&self) -> f64 {
        self.running_sum
    }

    pub fn reset(&mut self) {
        self.squares.clear();
        self.running_sum = 0.0;
    }
}
