//! Audio I/O around the DSP pipeline
//!
//! Live devices go through CPAL (WASAPI, ALSA/PulseAudio or CoreAudio
//! depending on the platform); offline runs read and write WAV files.
//! Both sides meet the pipeline through the block source and sink traits.

pub mod cpal_backend;
pub mod engine;
pub mod stream;
pub mod wav;

pub use cpal_backend::*;
pub use engine::*;
pub use stream::*;
pub use wav::*;
