//! Conversion of PCM frames into a fixed planar target format.

use crate::format::{remap_channels, LinearResampler};
use crate::frame::{Frame, StreamFormat};

/// Converts frames of one source format to planar samples of a target format.
///
/// Channel remapping happens before resampling, so the resampler count always
/// equals the target channel count. Resampler history is carried between
/// frames; build a new converter when the source format changes.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    source: StreamFormat,
    target_rate: u32,
    target_channels: u16,
    resamplers: Vec<LinearResampler>,
}

impl FormatConverter {
    /// Creates a converter from `source` to `target_rate` / `target_channels`.
    pub fn new(source: StreamFormat, target_rate: u32, target_channels: u16) -> Self {
        let resamplers = (0..target_channels)
            .map(|_| LinearResampler::new(source.sample_rate, target_rate))
            .collect();
        Self {
            source,
            target_rate,
            target_channels,
            resamplers,
        }
    }

    /// Format this converter was built for.
    pub fn source_format(&self) -> StreamFormat {
        self.source
    }

    /// Returns `true` if `format` has the same rate and channel count as the source.
    ///
    /// Interleaved and planar layouts of the same shape share a converter.
    pub fn accepts(&self, format: &StreamFormat) -> bool {
        format.is_pcm() && self.source.same_shape(format)
    }

    /// Converts one PCM frame. Returns `None` for compressed frames.
    pub fn convert(&mut self, frame: &Frame) -> Option<Vec<Vec<i16>>> {
        let planes = frame.to_planar_samples()?;
        Some(self.convert_planes(planes))
    }

    /// Converts per-channel samples already split by channel.
    pub fn convert_planes(&mut self, planes: Vec<Vec<i16>>) -> Vec<Vec<i16>> {
        let planes = remap_channels(planes, self.target_channels);
        if self.source.sample_rate == self.target_rate {
            return planes;
        }
        planes
            .iter()
            .zip(self.resamplers.iter_mut())
            .map(|(plane, resampler)| resampler.process(plane))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_passthrough_planar() {
        let mut conv = FormatConverter::new(StreamFormat::planar(48000, 2), 48000, 2);
        let frame = Frame::from_planar_samples(&[vec![1, 2], vec![3, 4]], Duration::ZERO, 48000);
        assert_eq!(conv.convert(&frame), Some(vec![vec![1, 2], vec![3, 4]]));
    }

    #[test]
    fn test_interleaved_mono_to_stereo_upsampled() {
        let mut conv = FormatConverter::new(StreamFormat::interleaved(8000, 1), 48000, 2);
        let frame = Frame::from_samples(&[600i16; 160], Duration::ZERO, 8000, 1);
        let planes = conv.convert(&frame).unwrap_or_default();
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[0], planes[1]);
        assert_eq!(planes[0].len(), 159 * 6);
        assert!(planes[0].iter().all(|&s| s == 600));
    }

    #[test]
    fn test_accepts_same_shape_other_layout() {
        let conv = FormatConverter::new(StreamFormat::interleaved(16000, 1), 48000, 2);
        assert!(conv.accepts(&StreamFormat::planar(16000, 1)));
        assert!(!conv.accepts(&StreamFormat::planar(8000, 1)));
    }

    #[test]
    fn test_compressed_frame_rejected() {
        let mut conv = FormatConverter::new(StreamFormat::interleaved(8000, 1), 8000, 1);
        let frame = Frame::new(
            vec![0; 160],
            Duration::ZERO,
            StreamFormat::compressed(crate::codec::CodecId::Pcmu, 8000, 1),
        );
        assert!(conv.convert(&frame).is_none());
    }
}
