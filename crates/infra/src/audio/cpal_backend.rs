//! Live audio devices through CPAL
//!
//! The device callbacks never touch DSP state. Input is mixed to mono,
//! reblocked and pushed onto a bounded queue; output pulls processed blocks
//! off another queue and plays silence when none is ready.

use super::stream::{block_channel, AudioBuffer, ChannelSink, ChannelSource, OverflowPolicy, Reblocker};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use crossbeam::channel::TrySendError;
use gape_core::domain::audio::{AudioError, Result, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Queue depth, in blocks, between the device callbacks and the processing loop
pub const DEFAULT_QUEUE_BLOCKS: usize = 8;

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string())
}

fn default_host() -> cpal::Host {
    let host = cpal::default_host();
    debug!("Using audio host: {:?}", host.id());
    host
}

/// Running capture from the default input device
pub struct LiveInput {
    _stream: Stream,
    device: String,
    overruns: Arc<AtomicU64>,
}

impl LiveInput {
    /// Start capturing; the returned source yields mono blocks of `config.block_size`
    pub fn open(config: &StreamConfig, queue_blocks: usize) -> Result<(Self, ChannelSource)> {
        let host = default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))?;
        let name = device_name(&device);

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
        let channels = supported.channels().max(1);

        let cpal_config = CpalStreamConfig {
            channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = %name,
            channels,
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            "Creating input stream"
        );

        let (sender, receiver) = block_channel(queue_blocks);
        let mut reblocker = Reblocker::new(config.block_size)?;
        let mut mono: Vec<f32> = Vec::with_capacity(4096);
        let overruns = Arc::new(AtomicU64::new(0));
        let overruns_cb = Arc::clone(&overruns);
        let frame_len = channels as usize;

        let stream = device
            .build_input_stream(
                &cpal_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    mono.clear();
                    mono.extend(
                        data.chunks_exact(frame_len)
                            .map(|frame| frame.iter().sum::<f32>() / frame_len as f32),
                    );
                    reblocker.push(&mono, |block| {
                        if let Err(TrySendError::Full(_)) = sender.try_send(block.to_vec()) {
                            overruns_cb.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                },
                |err| error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        let source = ChannelSource::new(receiver, config.block_size);
        Ok((
            Self {
                _stream: stream,
                device: name,
                overruns,
            },
            source,
        ))
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Input blocks discarded because the processing loop fell behind
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Running playback on the default output device
pub struct LiveOutput {
    _stream: Stream,
    device: String,
    underruns: Arc<AtomicU64>,
}

impl LiveOutput {
    /// Start playback of blocks with `channels` interleaved channels (1 or 2)
    ///
    /// Mono blocks are copied to every device channel; stereo blocks fill the
    /// first two device channels and silence the rest, or play only the
    /// effect channel on a mono device.
    pub fn open(
        config: &StreamConfig,
        channels: usize,
        queue_blocks: usize,
    ) -> Result<(Self, ChannelSink)> {
        if !(1..=2).contains(&channels) {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported output layout with {} channels",
                channels
            )));
        }

        let host = default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;
        let name = device_name(&device);

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
        let device_channels = supported.channels().max(1);

        let cpal_config = CpalStreamConfig {
            channels: device_channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = %name,
            device_channels,
            channels,
            sample_rate = config.sample_rate,
            "Creating output stream"
        );

        let (sender, receiver) = block_channel(queue_blocks);
        let underruns = Arc::new(AtomicU64::new(0));
        let underruns_cb = Arc::clone(&underruns);
        let frame_len = device_channels as usize;

        let mut current: AudioBuffer = Vec::new();
        let mut position = 0usize;

        let stream = device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_exact_mut(frame_len) {
                        if position >= current.len() {
                            match receiver.try_recv() {
                                Ok(block) => {
                                    current = block;
                                    position = 0;
                                }
                                Err(_) => {
                                    underruns_cb.fetch_add(1, Ordering::Relaxed);
                                    frame.fill(0.0);
                                    continue;
                                }
                            }
                        }

                        let source = &current[position..position + channels];
                        position += channels;
                        for (ch, out) in frame.iter_mut().enumerate() {
                            *out = if channels == 1 {
                                source[0]
                            } else if frame_len == 1 {
                                // mono device gets the effect channel
                                source[1]
                            } else {
                                source.get(ch).copied().unwrap_or(0.0)
                            };
                        }
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        let sink = ChannelSink::new(sender, config.block_size * channels, OverflowPolicy::Drop);
        Ok((
            Self {
                _stream: stream,
                device: name,
                underruns,
            },
            sink,
        ))
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Output frames played as silence because no block was ready
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for LiveOutput {
    fn drop(&mut self) {
        let underruns = self.underruns();
        if underruns > 0 {
            warn!(device = %self.device, underruns, "Output stream closed with underruns");
        } else {
            info!(device = %self.device, "Output stream closed");
        }
    }
}

impl Drop for LiveInput {
    fn drop(&mut self) {
        let overruns = self.overruns();
        if overruns > 0 {
            warn!(device = %self.device, overruns, "Input stream closed with dropped blocks");
        } else {
            info!(device = %self.device, "Input stream closed");
        }
    }
}
