//! Block handoff between producers and the processing loop
//!
//! Device callbacks deliver arbitrarily sized chunks; the processing loop
//! wants exact blocks. [`Reblocker`] bridges the two, and the channel
//! endpoints carry whole blocks over bounded `crossbeam` queues.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use gape_core::domain::audio::{AudioError, BlockSink, BlockSource, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// One block of samples in flight
pub type AudioBuffer = Vec<f32>;

/// How often a waiting [`ChannelSource`] rechecks its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Bounded block queue
pub fn block_channel(capacity: usize) -> (Sender<AudioBuffer>, Receiver<AudioBuffer>) {
    bounded(capacity)
}

// ============================================================================
// REBLOCKER
// ============================================================================

/// Accumulates chunks of any length into blocks of exactly `block_size`
#[derive(Debug)]
pub struct Reblocker {
    block_size: usize,
    pending: Vec<f32>,
}

impl Reblocker {
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "block size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Samples waiting for the next complete block
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append `samples`, calling `emit` once per completed block
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            if self.pending.is_empty() && samples.len() >= self.block_size {
                let (block, rest) = samples.split_at(self.block_size);
                emit(block);
                samples = rest;
                continue;
            }

            let take = (self.block_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Emit any partial block padded with silence
    pub fn flush_padded(&mut self, mut emit: impl FnMut(&[f32])) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.resize(self.block_size, 0.0);
        emit(&self.pending);
        self.pending.clear();
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ============================================================================
// CHANNEL ENDPOINTS
// ============================================================================

/// Block source fed by a bounded queue
///
/// Ends when every sender is dropped, or when the optional stop flag is
/// raised while waiting.
pub struct ChannelSource {
    receiver: Receiver<AudioBuffer>,
    block_size: usize,
    stop: Option<Arc<AtomicBool>>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<AudioBuffer>, block_size: usize) -> Self {
        Self {
            receiver,
            block_size,
            stop: None,
        }
    }

    /// Stop waiting for blocks once `stop` is set
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn recv(&self) -> Option<AudioBuffer> {
        match &self.stop {
            None => self.receiver.recv().ok(),
            Some(stop) => loop {
                if stop.load(Ordering::Relaxed) {
                    return None;
                }
                match self.receiver.recv_timeout(STOP_POLL_INTERVAL) {
                    Ok(block) => return Some(block),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return None,
                }
            },
        }
    }
}

impl BlockSource for ChannelSource {
    fn next_block(&mut self, block: &mut [f32]) -> Result<bool> {
        if block.len() != self.block_size {
            return Err(AudioError::StreamError(format!(
                "channel source produces {} samples, caller asked for {}",
                self.block_size,
                block.len()
            )));
        }

        let Some(received) = self.recv() else {
            debug!("Channel source finished");
            return Ok(false);
        };

        if received.len() != self.block_size {
            return Err(AudioError::StreamError(format!(
                "received block of {} samples, expected {}",
                received.len(),
                self.block_size
            )));
        }

        block.copy_from_slice(&received);
        Ok(true)
    }
}

/// What a [`ChannelSink`] does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for room
    Block,
    /// Drop the block and count it
    Drop,
}

/// Block sink draining into a bounded queue
pub struct ChannelSink {
    sender: Sender<AudioBuffer>,
    block_len: usize,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(sender: Sender<AudioBuffer>, block_len: usize, policy: OverflowPolicy) -> Self {
        Self {
            sender,
            block_len,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of blocks dropped on a full queue
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl BlockSink for ChannelSink {
    fn write_block(&mut self, block: &[f32]) -> Result<()> {
        if block.len() != self.block_len {
            return Err(AudioError::StreamError(format!(
                "channel sink accepts {} samples, got {}",
                self.block_len,
                block.len()
            )));
        }

        let disconnected =
            || AudioError::StreamError("block consumer disconnected".to_string());

        match self.policy {
            OverflowPolicy::Block => self
                .sender
                .send(block.to_vec())
                .map_err(|_| disconnected()),
            OverflowPolicy::Drop => match self.sender.try_send(block.to_vec()) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 100 == 0 {
                        warn!(dropped, "Output queue full, dropping block");
                    } else {
                        trace!(dropped, "Output block dropped");
                    }
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(disconnected()),
            },
        }
    }
}
