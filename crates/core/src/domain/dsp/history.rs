//! Fixed-capacity circular sample history
//!
//! Shared state for the FIR, delay and RMS kernels. The write index always
//! points at the next slot to overwrite, which is also the oldest sample
//! still held.

use crate::domain::audio::{zeroed_buffer, AudioError, Result};

/// Ring buffer of the `capacity` most recently written samples
#[derive(Debug, Clone, PartialEq)]
pub struct CircularHistory {
    storage: Vec<f32>,
    index: usize,
}

impl CircularHistory {
    /// Create a zero-initialized history
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AudioError::InvalidConfiguration(
                "history capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            storage: zeroed_buffer(capacity)?,
            index: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Slot that the next write will overwrite
    pub fn write_index(&self) -> usize {
        self.index
    }

    /// Overwrite the current slot and advance the write index
    #[inline]
    pub fn write(&mut self, value: f32) {
        self.storage[self.index] = value;
        self.advance();
    }

    /// Sample written `offset_back` writes ago (0 = most recent)
    ///
    /// Returns `None` when `offset_back >= capacity`.
    pub fn read(&self, offset_back: usize) -> Option<f32> {
        let capacity = self.capacity();
        if offset_back >= capacity {
            return None;
        }
        let idx = (self.index + capacity - 1 - offset_back) % capacity;
        Some(self.storage[idx])
    }

    /// Oldest held sample, i.e. the one written `capacity` writes ago
    #[inline]
    pub fn oldest(&self) -> f32 {
        self.storage[self.index]
    }

    /// Replace the oldest sample with `value`, advance, and return what was evicted
    #[inline]
    pub fn replace_oldest(&mut self, value: f32) -> f32 {
        let evicted = std::mem::replace(&mut self.storage[self.index], value);
        self.advance();
        evicted
    }

    /// Inner product of `coefficients` with the history, newest sample first
    ///
    /// `coefficients[k]` multiplies the sample written `k` writes ago.
    /// Coefficients beyond the capacity are ignored.
    #[inline]
    pub fn dot_recent(&self, coefficients: &[f32]) -> f32 {
        let capacity = self.capacity();
        let newest = (self.index + capacity - 1) % capacity;

        // storage[..=newest] reversed covers offsets 0..=newest,
        // storage[newest + 1..] reversed covers the wrapped remainder
        let (head, tail) = self.storage.split_at(newest + 1);
        let (near, far) = coefficients.split_at(coefficients.len().min(head.len()));

        let near_sum: f32 = near
            .iter()
            .zip(head.iter().rev())
            .map(|(c, s)| c * s)
            .sum();
        let far_sum: f32 = far
            .iter()
            .zip(tail.iter().rev())
            .map(|(c, s)| c * s)
            .sum();

        near_sum + far_sum
    }

    /// Zero every slot and rewind the write index
    pub fn clear(&mut self) {
        self.storage.fill(0.0);
        self.index = 0;
    }

    #[inline]
    fn advance(&mut self) {
        self.index += 1;
        if self.index == self.storage.len() {
            self.index = 0;
        }
    }
}
