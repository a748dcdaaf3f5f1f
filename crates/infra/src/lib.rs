//! GAPE infrastructure: audio devices, WAV files and the processing loop

pub mod audio;
