//! Linear-phase FIR coefficient design

use crate::domain::audio::{AudioError, Result};
use std::f64::consts::PI;

/// Hamming-windowed sinc lowpass with unity gain at DC
///
/// The result is symmetric, so a filter built from it has a group delay of
/// `(taps - 1) / 2` samples. Odd tap counts keep that delay an integer.
pub fn lowpass(taps: usize, cutoff_hz: f32, sample_rate: u32) -> Result<Vec<f32>> {
    if taps == 0 {
        return Err(AudioError::InvalidConfiguration(
            "lowpass needs at least one tap".to_string(),
        ));
    }
    let nyquist = sample_rate as f32 / 2.0;
    if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(AudioError::InvalidConfiguration(format!(
            "lowpass cutoff {} Hz outside (0, {}) Hz",
            cutoff_hz, nyquist
        )));
    }

    if taps == 1 {
        return Ok(vec![1.0]);
    }

    let fc = f64::from(cutoff_hz) / f64::from(sample_rate);
    let centre = (taps - 1) as f64 / 2.0;
    let span = (taps - 1) as f64;

    let raw: Vec<f64> = (0..taps)
        .map(|i| {
            let n = i as f64 - centre;
            let sinc = if n == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * n).sin() / (PI * n)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / span).cos();
            sinc * window
        })
        .collect();

    let dc: f64 = raw.iter().sum();
    if dc.abs() < f64::EPSILON {
        return Err(AudioError::InvalidConfiguration(format!(
            "lowpass with {} taps at {} Hz has no DC response",
            taps, cutoff_hz
        )));
    }

    Ok(raw.iter().map(|c| (c / dc) as f32).collect())
}
