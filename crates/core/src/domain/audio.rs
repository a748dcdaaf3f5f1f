//! Audio stream abstractions and domain models
//!
//! This module defines the block-level contract between the DSP pipeline and
//! whatever produces and consumes samples. Implementations for WAV files,
//! bounded queues and live devices live in the `infra` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Storage for a filter or buffer could not be reserved
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// A parameter is outside its documented range
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Error in stream handoff or block contract
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Reserve a zero-filled buffer, reporting allocation failure instead of aborting.
pub fn zeroed_buffer(len: usize) -> Result<Vec<f32>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|e| {
        AudioError::AllocationFailed(format!("{} samples: {}", len, e))
    })?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

/// How the pipeline lays out each output block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// Mono effect output, one sample per input sample
    #[default]
    Wet,
    /// Interleaved stereo: left is the conditioned dry signal, right the effect
    DryWet,
}

impl OutputLayout {
    pub fn channels(&self) -> usize {
        match self {
            OutputLayout::Wet => 1,
            OutputLayout::DryWet => 2,
        }
    }
}

/// Configuration for an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per block, constant for the life of the stream
    pub block_size: usize,
    #[serde(default)]
    pub layout: OutputLayout,
}

impl StreamConfig {
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
    pub const DEFAULT_BLOCK_SIZE: usize = 100;
    /// Largest accepted block, in samples
    pub const MAX_BLOCK_SIZE: usize = 1 << 16;

    /// Number of samples in one output block
    pub fn output_len(&self) -> usize {
        self.block_size * self.layout.channels()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidConfiguration(
                "sample rate must be positive".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }
        if self.block_size > Self::MAX_BLOCK_SIZE {
            return Err(AudioError::InvalidConfiguration(format!(
                "block size {} exceeds {} samples",
                self.block_size,
                Self::MAX_BLOCK_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            block_size: Self::DEFAULT_BLOCK_SIZE,
            layout: OutputLayout::Wet,
        }
    }
}

/// Producer side of the block contract
///
/// Every call fills exactly one block. Partial blocks are never delivered:
/// a source that runs dry mid-block pads with silence.
pub trait BlockSource: Send {
    /// Fill `block` with the next input block.
    ///
    /// Returns `Ok(false)` once the stream has ended, in which case `block`
    /// is left untouched.
    fn next_block(&mut self, block: &mut [f32]) -> Result<bool>;
}

/// Consumer side of the block contract
pub trait BlockSink: Send {
    /// Accept exactly one output block.
    fn write_block(&mut self, block: &[f32]) -> Result<()>;

    /// Flush buffered output, called once when the stream ends.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
