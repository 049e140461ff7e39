//! Uncompressed S16LE "codec".

use super::{compressed_input, pcm_input, CodecId, FrameDecoder, FrameEncoder};
use crate::error::CodecError;
use crate::format::samples_to_bytes;
use crate::frame::{Frame, StreamFormat};

/// Re-tags S16LE payloads as interleaved PCM.
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    sample_rate: u32,
    channels: u16,
}

impl PcmDecoder {
    /// Creates a decoder for the given shape.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl FrameDecoder for PcmDecoder {
    fn codec(&self) -> CodecId {
        CodecId::Pcm
    }

    fn output_format(&self) -> StreamFormat {
        StreamFormat::interleaved(self.sample_rate, self.channels)
    }

    fn decode(&mut self, frame: &Frame) -> Result<Frame, CodecError> {
        compressed_input(CodecId::Pcm, frame)?;
        let bytes_per_frame = 2 * self.channels as usize;
        if frame.data().len() % bytes_per_frame != 0 {
            return Err(CodecError::invalid_frame(
                CodecId::Pcm,
                format!(
                    "{} bytes is not a whole number of {}-channel samples",
                    frame.data().len(),
                    self.channels
                ),
            ));
        }
        Ok(Frame::new(
            frame.data().to_vec(),
            frame.timestamp(),
            self.output_format(),
        ))
    }
}

/// Tags interleaved S16LE samples as the PCM codec.
#[derive(Debug, Clone)]
pub struct PcmEncoder {
    sample_rate: u32,
    channels: u16,
}

impl PcmEncoder {
    /// Creates an encoder for the given shape.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl FrameEncoder for PcmEncoder {
    fn codec(&self) -> CodecId {
        CodecId::Pcm
    }

    fn output_format(&self) -> StreamFormat {
        StreamFormat::compressed(CodecId::Pcm, self.sample_rate, self.channels)
    }

    fn encode(&mut self, frame: &Frame) -> Result<Frame, CodecError> {
        let samples = pcm_input(CodecId::Pcm, frame, self.sample_rate, self.channels)?;
        Ok(Frame::new(
            samples_to_bytes(&samples),
            frame.timestamp(),
            self.output_format(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pcm_decoder_rejects_partial_sample() {
        let mut decoder = PcmDecoder::new(8000, 2);
        let frame = Frame::new(
            vec![0; 6],
            Duration::ZERO,
            StreamFormat::compressed(CodecId::Pcm, 8000, 2),
        );
        assert!(decoder.decode(&frame).is_err());
    }

    #[test]
    fn test_pcm_encoder_interleaves_planar_input() {
        let mut encoder = PcmEncoder::new(8000, 2);
        let frame = Frame::from_planar_samples(&[vec![1, 2], vec![-1, -2]], Duration::ZERO, 8000);
        let coded = encoder.encode(&frame).unwrap();
        assert_eq!(coded.data(), samples_to_bytes(&[1, -1, 2, -2]).as_slice());
        assert_eq!(coded.format().codec(), Some(CodecId::Pcm));
    }

    #[test]
    fn test_pcm_decoder_rejects_other_codec() {
        let mut decoder = PcmDecoder::new(8000, 1);
        let frame = Frame::new(
            vec![0; 4],
            Duration::ZERO,
            StreamFormat::compressed(CodecId::Pcmu, 8000, 1),
        );
        assert!(matches!(
            decoder.decode(&frame),
            Err(CodecError::InvalidFrame { .. })
        ));
    }
}
