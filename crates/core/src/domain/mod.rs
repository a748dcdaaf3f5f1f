//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod control;
pub mod dsp;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioError, BlockSink, BlockSource, OutputLayout, StreamConfig};
pub use config::{
    CompressorConfig, ConfigError, DelayConfig, EffectConfig, EffectKind, EqualizerConfig,
    GapeConfig, PrefilterConfig,
};
pub use control::{BuiltinPreset, ControlError, ControlFrame, PinState};
pub use dsp::*;
