//! Block-streaming DSP kernels and effect pipeline for the GAPE effect suite

pub mod domain;
