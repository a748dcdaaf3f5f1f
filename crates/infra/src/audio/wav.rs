//! WAV file block source and sink
//!
//! Input files of any channel count are mixed down to mono; the last partial
//! block is padded with silence. Output is 32-bit float.

use gape_core::domain::audio::{AudioError, BlockSink, BlockSource, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

fn wav_error(context: &str, err: hound::Error) -> AudioError {
    match err {
        hound::Error::IoError(e) => AudioError::OsError(format!("{}: {}", context, e)),
        other => AudioError::StreamError(format!("{}: {}", context, other)),
    }
}

/// Mono block source reading a WAV file
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    block_size: usize,
    /// Interleaved frame scratch, one slot per file channel
    frame: Vec<f32>,
    finished: bool,
}

impl WavSource {
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }

        let reader = WavReader::open(path)
            .map_err(|e| wav_error(&format!("opening {}", path.display()), e))?;
        let spec = reader.spec();

        if spec.channels == 0 {
            return Err(AudioError::StreamError(format!(
                "{} declares zero channels",
                path.display()
            )));
        }

        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            frames = reader.duration(),
            "WAV input opened"
        );

        Ok(Self {
            reader,
            spec,
            block_size,
            frame: vec![0.0; spec.channels as usize],
            finished: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.spec.channels
    }

    /// Total frames in the file
    pub fn duration(&self) -> u32 {
        self.reader.duration()
    }

    /// Read one frame and mix it to mono; `None` at end of data
    fn read_frame(&mut self) -> Result<Option<f32>> {
        let channels = self.frame.len();
        let mut filled = 0;

        match self.spec.sample_format {
            SampleFormat::Float => {
                let mut samples = self.reader.samples::<f32>();
                while filled < channels {
                    match samples.next() {
                        Some(s) => {
                            self.frame[filled] = s.map_err(|e| wav_error("reading", e))?;
                            filled += 1;
                        }
                        None => break,
                    }
                }
            }
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (self.spec.bits_per_sample - 1)) as f32;
                let mut samples = self.reader.samples::<i32>();
                while filled < channels {
                    match samples.next() {
                        Some(s) => {
                            self.frame[filled] =
                                s.map_err(|e| wav_error("reading", e))? as f32 * scale;
                            filled += 1;
                        }
                        None => break,
                    }
                }
            }
        }

        if filled < channels {
            return Ok(None);
        }
        let sum: f32 = self.frame.iter().sum();
        Ok(Some(sum / channels as f32))
    }
}

impl BlockSource for WavSource {
    fn next_block(&mut self, block: &mut [f32]) -> Result<bool> {
        if block.len() != self.block_size {
            return Err(AudioError::StreamError(format!(
                "WAV source produces {} samples, caller asked for {}",
                self.block_size,
                block.len()
            )));
        }
        if self.finished {
            return Ok(false);
        }

        let mut written = 0;
        while written < self.block_size {
            match self.read_frame()? {
                Some(sample) => {
                    block[written] = sample;
                    written += 1;
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if written == 0 {
            debug!("WAV input exhausted");
            return Ok(false);
        }
        block[written..].fill(0.0);
        Ok(true)
    }
}

/// Float WAV writer with one or two interleaved channels
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    block_len: usize,
    frames: u64,
    channels: u16,
}

impl WavSink {
    /// `block_len` is the output block size in samples across all channels
    pub fn create<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        channels: u16,
        block_len: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if channels == 0 || block_len % channels as usize != 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "{} samples per block cannot hold whole {}-channel frames",
                block_len, channels
            )));
        }

        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)
            .map_err(|e| wav_error(&format!("creating {}", path.display()), e))?;

        info!(path = %path.display(), sample_rate, channels, "WAV output created");

        Ok(Self {
            writer: Some(writer),
            block_len,
            frames: 0,
            channels,
        })
    }

    /// Frames written so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl BlockSink for WavSink {
    fn write_block(&mut self, block: &[f32]) -> Result<()> {
        if block.len() != self.block_len {
            return Err(AudioError::StreamError(format!(
                "WAV sink accepts {} samples, got {}",
                self.block_len,
                block.len()
            )));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AudioError::StreamError("WAV sink already finished".to_string()))?;

        for &sample in block {
            writer
                .write_sample(sample)
                .map_err(|e| wav_error("writing", e))?;
        }
        self.frames += (block.len() / self.channels as usize) as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| wav_error("finalizing", e))?;
            debug!(frames = self.frames, "WAV output finalized");
        }
        Ok(())
    }
}
