//! G.711 µ-law and A-law companding.

use super::{compressed_input, pcm_input, CodecId, FrameDecoder, FrameEncoder};
use crate::error::CodecError;
use crate::format::samples_to_bytes;
use crate::frame::{Frame, StreamFormat};

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Companding law.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Law {
    /// µ-law (PCMU), used in North America and Japan.
    MuLaw,
    /// A-law (PCMA), used elsewhere.
    ALaw,
}

impl G711Law {
    fn codec(self) -> CodecId {
        match self {
            Self::MuLaw => CodecId::Pcmu,
            Self::ALaw => CodecId::Pcma,
        }
    }

    fn compress(self, sample: i16) -> u8 {
        match self {
            Self::MuLaw => linear_to_ulaw(sample),
            Self::ALaw => linear_to_alaw(sample),
        }
    }

    fn expand(self, code: u8) -> i16 {
        match self {
            Self::MuLaw => ulaw_to_linear(code),
            Self::ALaw => alaw_to_linear(code),
        }
    }
}

/// Position of the highest set bit among bits 8..=14, as a segment number 1..=7.
/// Returns 0 when none of them is set.
fn segment(magnitude: i32) -> i32 {
    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    exponent
}

/// Compresses one sample to µ-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(ULAW_CLIP) + ULAW_BIAS;
    let exponent = segment(magnitude);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0f;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// Expands one µ-law code.
pub fn ulaw_to_linear(code: u8) -> i16 {
    let code = !code;
    let exponent = i32::from((code >> 4) & 0x07);
    let mantissa = i32::from(code & 0x0f);
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if code & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compresses one sample to A-law.
pub fn linear_to_alaw(sample: i16) -> u8 {
    let value = i32::from(sample);
    let (sign, magnitude) = if value >= 0 {
        (0x80, value)
    } else {
        (0x00, -value - 1)
    };
    let code = if magnitude < 256 {
        sign | ((magnitude >> 4) & 0x0f)
    } else {
        let exponent = segment(magnitude);
        sign | (exponent << 4) | ((magnitude >> (exponent + 3)) & 0x0f)
    };
    (code ^ 0x55) as u8
}

/// Expands one A-law code.
pub fn alaw_to_linear(code: u8) -> i16 {
    let code = code ^ 0x55;
    let exponent = i32::from((code >> 4) & 0x07);
    let mantissa = i32::from(code & 0x0f);
    let magnitude = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };
    if code & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// G.711 decoder producing interleaved S16 PCM.
#[derive(Debug, Clone)]
pub struct G711Decoder {
    law: G711Law,
    sample_rate: u32,
    channels: u16,
}

impl G711Decoder {
    /// Creates a decoder for the given law and shape.
    pub fn new(law: G711Law, sample_rate: u32, channels: u16) -> Self {
        Self {
            law,
            sample_rate,
            channels,
        }
    }
}

impl FrameDecoder for G711Decoder {
    fn codec(&self) -> CodecId {
        self.law.codec()
    }

    fn output_format(&self) -> StreamFormat {
        StreamFormat::interleaved(self.sample_rate, self.channels)
    }

    fn decode(&mut self, frame: &Frame) -> Result<Frame, CodecError> {
        compressed_input(self.codec(), frame)?;
        if frame.data().len() % self.channels as usize != 0 {
            return Err(CodecError::invalid_frame(
                self.codec(),
                format!(
                    "{} bytes is not a whole number of {}-channel samples",
                    frame.data().len(),
                    self.channels
                ),
            ));
        }
        let samples: Vec<i16> = frame.data().iter().map(|&c| self.law.expand(c)).collect();
        Ok(Frame::new(
            samples_to_bytes(&samples),
            frame.timestamp(),
            self.output_format(),
        ))
    }
}

/// G.711 encoder accepting planar or interleaved S16 PCM.
#[derive(Debug, Clone)]
pub struct G711Encoder {
    law: G711Law,
    sample_rate: u32,
    channels: u16,
}

impl G711Encoder {
    /// Creates an encoder for the given law and shape.
    pub fn new(law: G711Law, sample_rate: u32, channels: u16) -> Self {
        Self {
            law,
            sample_rate,
            channels,
        }
    }
}

impl FrameEncoder for G711Encoder {
    fn codec(&self) -> CodecId {
        self.law.codec()
    }

    fn output_format(&self) -> StreamFormat {
        StreamFormat::compressed(self.codec(), self.sample_rate, self.channels)
    }

    fn encode(&mut self, frame: &Frame) -> Result<Frame, CodecError> {
        let samples = pcm_input(self.codec(), frame, self.sample_rate, self.channels)?;
        let codes = samples.iter().map(|&s| self.law.compress(s)).collect();
        Ok(Frame::new(codes, frame.timestamp(), self.output_format()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ulaw_silence_and_extremes() {
        assert_eq!(linear_to_ulaw(0), 0xff);
        assert_eq!(ulaw_to_linear(0xff), 0);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(linear_to_ulaw(i16::MIN)), -32124);
    }

    #[test]
    fn test_alaw_small_values() {
        assert_eq!(linear_to_alaw(0), 0xd5);
        assert_eq!(alaw_to_linear(0xd5), 8);
        assert_eq!(alaw_to_linear(linear_to_alaw(-1)), -8);
    }

    #[test]
    fn test_companding_error_is_bounded() {
        // Quantization step grows with magnitude: at most 1/16 of the segment base.
        for law in [G711Law::MuLaw, G711Law::ALaw] {
            for sample in (-32000i32..32000).step_by(97) {
                let sample = sample as i16;
                let back = law.expand(law.compress(sample));
                let error = (i32::from(back) - i32::from(sample)).abs();
                let bound = (i32::from(sample).abs() / 16).max(16) + 8;
                assert!(
                    error <= bound,
                    "{law:?}: {sample} -> {back} (error {error}, bound {bound})"
                );
            }
        }
    }

    #[test]
    fn test_companding_is_monotonic() {
        let mut previous = i16::MIN;
        for sample in (-32768i32..=32767).step_by(61) {
            let back = ulaw_to_linear(linear_to_ulaw(sample as i16));
            assert!(back >= previous);
            previous = back;
        }
    }

    #[test]
    fn test_encoder_output_is_one_byte_per_sample() {
        let mut encoder = G711Encoder::new(G711Law::MuLaw, 48000, 2);
        let frame = Frame::from_planar_samples(&[vec![0; 960], vec![0; 960]], Duration::ZERO, 48000);
        let coded = encoder.encode(&frame).unwrap();
        assert_eq!(coded.len(), 1920);
        assert!(coded.data().iter().all(|&b| b == 0xff));
        assert_eq!(coded.format(), StreamFormat::compressed(CodecId::Pcmu, 48000, 2));
    }
}
