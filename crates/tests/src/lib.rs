//! Integration tests across the DSP pipeline and the I/O layer

#[cfg(test)]
mod pipeline_integration;
