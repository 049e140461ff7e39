//! Opus through libopus.

use ::opus::{Application, Bitrate, Channels, Decoder, Encoder};

use super::{compressed_input, pcm_input, CodecConfig, CodecId, FrameDecoder, FrameEncoder};
use crate::error::CodecError;
use crate::format::samples_to_bytes;
use crate::frame::{Frame, StreamFormat};

const MAX_PACKET_SIZE: usize = 4000;
/// 120 ms at 48 kHz, the longest Opus frame.
const MAX_FRAME_SAMPLES: usize = 5760;

fn channels(config: &CodecConfig) -> Result<Channels, CodecError> {
    match config.channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        n => Err(CodecError::unsupported(
            CodecId::Opus,
            format!("1 or 2 channels supported, got {n}"),
        )),
    }
}

fn backend(err: ::opus::Error) -> CodecError {
    CodecError::Backend {
        codec: CodecId::Opus,
        reason: err.to_string(),
    }
}

/// Opus decoder producing interleaved S16 PCM.
pub struct OpusFrameDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    output: Vec<i16>,
}

impl OpusFrameDecoder {
    /// Creates a decoder. Opus accepts 8, 12, 16, 24 and 48 kHz.
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        let decoder = Decoder::new(config.sample_rate, channels(config)?).map_err(backend)?;
        Ok(Self {
            decoder,
            sample_rate: config.sample_rate,
            channels: config.channels,
            output: vec![0; MAX_FRAME_SAMPLES * config.channels as usize],
        })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn codec(&self) -> CodecId {
        CodecId::Opus
    }

    fn output_format(&self) -> StreamFormat {
        StreamFormat::interleaved(self.sample_rate, self.channels)
    }

    fn decode(&mut self, frame: &Frame) -> Result<Frame, CodecError> {
        compressed_input(CodecId::Opus, frame)?;
        let per_channel = self
            .decoder
            .decode(frame.data(), &mut self.output, false)
            .map_err(backend)?;
        let total = per_channel * self.channels as usize;
        Ok(Frame::new(
            samples_to_bytes(&self.output[..total]),
            frame.timestamp(),
            self.output_format(),
        ))
    }
}

/// Opus encoder accepting 2.5 to 60 ms of S16 PCM per frame.
pub struct OpusFrameEncoder {
    encoder: Encoder,
    sample_rate: u32,
    channels: u16,
    packet: Vec<u8>,
}

impl OpusFrameEncoder {
    /// Creates an encoder in VoIP mode.
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        let mut encoder =
            Encoder::new(config.sample_rate, channels(config)?, Application::Voip).map_err(backend)?;
        if let Some(bitrate) = config.bitrate {
            let bits = i32::try_from(bitrate).map_err(|_| {
                CodecError::unsupported(CodecId::Opus, format!("bitrate {bitrate} out of range"))
            })?;
            encoder.set_bitrate(Bitrate::Bits(bits)).map_err(backend)?;
        }
        Ok(Self {
            encoder,
            sample_rate: config.sample_rate,
            channels: config.channels,
            packet: vec![0; MAX_PACKET_SIZE],
        })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn codec(&self) -> CodecId {
        CodecId::Opus
    }

    fn output_format(&self) -> StreamFormat {
        StreamFormat::compressed(CodecId::Opus, self.sample_rate, self.channels)
    }

    fn encode(&mut self, frame: &Frame) -> Result<Frame, CodecError> {
        let samples = pcm_input(CodecId::Opus, frame, self.sample_rate, self.channels)?;
        let len = self
            .encoder
            .encode(&samples, &mut self.packet)
            .map_err(backend)?;
        Ok(Frame::new(
            self.packet[..len].to_vec(),
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
    fn test_opus_round_trip_frame_size() {
        let config = CodecConfig::new(CodecId::Opus, 48000, 2).with_bitrate(64000);
        let mut encoder = OpusFrameEncoder::new(&config).unwrap();
        let mut decoder = OpusFrameDecoder::new(&config).unwrap();

        let pcm = Frame::from_samples(&vec![0i16; 1920], Duration::from_millis(20), 48000, 2);
        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());

        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.frame_count(), 960);
        assert_eq!(decoded.timestamp(), Duration::from_millis(20));
    }

    #[test]
    fn test_opus_rejects_three_channels() {
        let config = CodecConfig::new(CodecId::Opus, 48000, 3);
        assert!(OpusFrameDecoder::new(&config).is_err());
    }

    #[test]
    fn test_opus_rejects_invalid_frame_length() {
        let config = CodecConfig::new(CodecId::Opus, 48000, 1);
        let mut encoder = OpusFrameEncoder::new(&config).unwrap();
        let pcm = Frame::from_samples(&[0i16; 100], Duration::ZERO, 48000, 1);
        assert!(matches!(encoder.encode(&pcm), Err(CodecError::Backend { .. })));
    }
}
