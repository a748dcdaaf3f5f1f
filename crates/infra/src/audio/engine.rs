//! Single-threaded block processing loop
//!
//! The engine pulls one block from its source, runs it through the effect
//! pipeline and pushes the result to its sink, until the source ends or the
//! stop flag is raised. The pipeline is owned by the loop; a replacement can
//! be handed over between blocks through the reload channel.

use crossbeam::channel::{Receiver, TryRecvError};
use gape_core::domain::audio::{zeroed_buffer, BlockSink, BlockSource, Result};
use gape_core::domain::dsp::EffectPipeline;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Blocks processed
    pub blocks: u64,
    /// Input samples processed
    pub samples: u64,
    /// Pipelines swapped in while running
    pub reloads: u64,
}

pub struct ProcessingEngine {
    pipeline: EffectPipeline,
    source: Box<dyn BlockSource>,
    sink: Box<dyn BlockSink>,
    stop: Arc<AtomicBool>,
    reload: Option<Receiver<EffectPipeline>>,
    input: Vec<f32>,
    output: Vec<f32>,
    stats: EngineStats,
}

impl ProcessingEngine {
    pub fn new(
        pipeline: EffectPipeline,
        source: Box<dyn BlockSource>,
        sink: Box<dyn BlockSink>,
    ) -> Result<Self> {
        let input = zeroed_buffer(pipeline.block_size())?;
        let output = zeroed_buffer(pipeline.output_len())?;

        Ok(Self {
            pipeline,
            source,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            reload: None,
            input,
            output,
            stats: EngineStats::default(),
        })
    }

    /// Accept replacement pipelines between blocks
    ///
    /// A replacement must keep the block size and output layout.
    pub fn with_reload(mut self, reload: Receiver<EffectPipeline>) -> Self {
        self.reload = Some(reload);
        self
    }

    /// Share an existing stop flag instead of the engine's own
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that ends the loop before the next block
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn pipeline(&self) -> &EffectPipeline {
        &self.pipeline
    }

    fn apply_reload(&mut self) {
        let Some(reload) = &self.reload else {
            return;
        };

        let mut latest = None;
        loop {
            match reload.try_recv() {
                Ok(pipeline) => latest = Some(pipeline),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.reload = None;
                    break;
                }
            }
        }

        if let Some(pipeline) = latest {
            if pipeline.block_size() != self.pipeline.block_size()
                || pipeline.layout() != self.pipeline.layout()
            {
                warn!(
                    block_size = pipeline.block_size(),
                    layout = ?pipeline.layout(),
                    "Ignoring replacement pipeline with a different block shape"
                );
                return;
            }
            info!(effect = pipeline.effect_name(), "Pipeline replaced");
            self.pipeline = pipeline;
            self.stats.reloads += 1;
        }
    }

    /// Process one block; `Ok(false)` once the source has ended
    pub fn step(&mut self) -> Result<bool> {
        self.apply_reload();

        if !self.source.next_block(&mut self.input)? {
            return Ok(false);
        }
        self.pipeline.process(&self.input, &mut self.output)?;
        self.sink.write_block(&self.output)?;

        self.stats.blocks += 1;
        self.stats.samples += self.input.len() as u64;
        Ok(true)
    }

    /// Run until the source ends or the stop flag is raised, then finish the sink
    pub fn run(&mut self) -> Result<EngineStats> {
        info!(
            effect = self.pipeline.effect_name(),
            block_size = self.pipeline.block_size(),
            latency = self.pipeline.latency(),
            "Processing started"
        );

        let outcome = loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("Stop requested");
                break Ok(());
            }
            match self.step() {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let finished = self.sink.finish();
        outcome?;
        finished?;

        info!(
            blocks = self.stats.blocks,
            samples = self.stats.samples,
            reloads = self.stats.reloads,
            "Processing finished"
        );
        Ok(self.stats)
    }
}

impl std::fmt::Debug for ProcessingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingEngine")
            .field("effect", &self.pipeline.effect_name())
            .field("stats", &self.stats)
            .finish()
    }
}
