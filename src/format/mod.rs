//! Audio format conversion utilities.
//!
//! This module provides utilities for converting between audio formats:
//! - Byte/sample conversion (S16LE ↔ i16)
//! - Layout conversion (interleaved ↔ planar)
//! - Channel remapping (mono ↔ stereo and beyond)
//! - Streaming sample rate conversion

pub(crate) mod convert;
mod converter;
mod resample;

pub use convert::{bytes_to_samples, deinterleave, interleave, remap_channels, samples_to_bytes};
pub use converter::FormatConverter;
pub use resample::LinearResampler;
