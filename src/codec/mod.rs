//! Codec collaborators for the decoder and encoder stages.
//!
//! The pipeline only relies on the frame-in/frame-out contract of
//! [`FrameDecoder`] and [`FrameEncoder`]. Built-in implementations:
//!
//! | Codec | Notes |
//! |-------|-------|
//! | [`CodecId::Pcm`] | S16LE interleaved passthrough |
//! | [`CodecId::Pcmu`] | G.711 µ-law |
//! | [`CodecId::Pcma`] | G.711 A-law |
//! | [`CodecId::Opus`] | libopus, requires the `opus` feature |

mod g711;
#[cfg(feature = "opus")]
mod opus;
mod pcm;

use std::fmt;

use crate::error::CodecError;
use crate::frame::{Frame, StreamFormat};

pub use g711::{G711Decoder, G711Encoder, G711Law};
#[cfg(feature = "opus")]
pub use self::opus::{OpusFrameDecoder, OpusFrameEncoder};
pub use pcm::{PcmDecoder, PcmEncoder};

/// Identifies a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// Uncompressed S16LE.
    Pcm,
    /// G.711 µ-law.
    Pcmu,
    /// G.711 A-law.
    Pcma,
    /// Opus.
    Opus,
}

impl CodecId {
    /// Lowercase codec name as used in SDP.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Pcmu => "pcmu",
            Self::Pcma => "pcma",
            Self::Opus => "opus",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters a codec is created with. Fixed for the lifetime of the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Codec to use.
    pub codec: CodecId,
    /// Sample rate of the PCM side in Hz.
    pub sample_rate: u32,
    /// Channel count of the PCM side.
    pub channels: u16,
    /// Target bitrate in bits per second, for codecs that support it.
    pub bitrate: Option<u32>,
}

impl CodecConfig {
    /// Creates a configuration without a bitrate.
    pub fn new(codec: CodecId, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            bitrate: None,
        }
    }

    /// Sets the target bitrate.
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    /// Format of the compressed side.
    pub fn compressed_format(&self) -> StreamFormat {
        StreamFormat::compressed(self.codec, self.sample_rate, self.channels)
    }

    /// Format of the PCM side.
    pub fn pcm_format(&self) -> StreamFormat {
        StreamFormat::interleaved(self.sample_rate, self.channels)
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.sample_rate == 0 {
            return Err(CodecError::unsupported(self.codec, "sample rate must be non-zero"));
        }
        if self.channels == 0 {
            return Err(CodecError::unsupported(self.codec, "channel count must be non-zero"));
        }
        Ok(())
    }
}

/// Turns one compressed frame into one PCM frame.
pub trait FrameDecoder: Send {
    /// Codec this decoder handles.
    fn codec(&self) -> CodecId;

    /// Format of the frames produced by [`decode`](Self::decode).
    fn output_format(&self) -> StreamFormat;

    /// Decodes one frame. The output carries the input's timestamp.
    fn decode(&mut self, frame: &Frame) -> Result<Frame, CodecError>;
}

/// Turns one PCM frame into one compressed frame.
pub trait FrameEncoder: Send {
    /// Codec this encoder produces.
    fn codec(&self) -> CodecId;

    /// Format of the frames produced by [`encode`](Self::encode).
    fn output_format(&self) -> StreamFormat;

    /// Encodes one frame. Planar and interleaved input are both accepted.
    /// The output carries the input's timestamp.
    fn encode(&mut self, frame: &Frame) -> Result<Frame, CodecError>;
}

/// Creates a decoder for the configuration.
pub fn create_decoder(config: &CodecConfig) -> Result<Box<dyn FrameDecoder>, CodecError> {
    config.validate()?;
    match config.codec {
        CodecId::Pcm => Ok(Box::new(PcmDecoder::new(config.sample_rate, config.channels))),
        CodecId::Pcmu => Ok(Box::new(G711Decoder::new(
            G711Law::MuLaw,
            config.sample_rate,
            config.channels,
        ))),
        CodecId::Pcma => Ok(Box::new(G711Decoder::new(
            G711Law::ALaw,
            config.sample_rate,
            config.channels,
        ))),
        #[cfg(feature = "opus")]
        CodecId::Opus => Ok(Box::new(OpusFrameDecoder::new(config)?)),
        #[cfg(not(feature = "opus"))]
        CodecId::Opus => Err(CodecError::unsupported(
            CodecId::Opus,
            "built without the `opus` feature",
        )),
    }
}

/// Creates an encoder for the configuration.
pub fn create_encoder(config: &CodecConfig) -> Result<Box<dyn FrameEncoder>, CodecError> {
    config.validate()?;
    match config.codec {
        CodecId::Pcm => Ok(Box::new(PcmEncoder::new(config.sample_rate, config.channels))),
        CodecId::Pcmu => Ok(Box::new(G711Encoder::new(
            G711Law::MuLaw,
            config.sample_rate,
            config.channels,
        ))),
        CodecId::Pcma => Ok(Box::new(G711Encoder::new(
            G711Law::ALaw,
            config.sample_rate,
            config.channels,
        ))),
        #[cfg(feature = "opus")]
        CodecId::Opus => Ok(Box::new(OpusFrameEncoder::new(config)?)),
        #[cfg(not(feature = "opus"))]
        CodecId::Opus => Err(CodecError::unsupported(
            CodecId::Opus,
            "built without the `opus` feature",
        )),
    }
}

/// Checks that a frame handed to an encoder matches its PCM shape and returns
/// interleaved samples.
pub(crate) fn pcm_input(
    codec: CodecId,
    frame: &Frame,
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<i16>, CodecError> {
    let format = frame.format();
    if !format.is_pcm() {
        return Err(CodecError::invalid_frame(codec, format!("expected PCM, got {format}")));
    }
    if format.sample_rate != sample_rate || format.channels != channels {
        return Err(CodecError::invalid_frame(
            codec,
            format!("expected {sample_rate}Hz/{channels}ch, got {format}"),
        ));
    }
    frame
        .to_interleaved_samples()
        .ok_or_else(|| CodecError::invalid_frame(codec, "frame has no samples"))
}

/// Checks that a frame handed to a decoder carries this codec.
pub(crate) fn compressed_input(codec: CodecId, frame: &Frame) -> Result<(), CodecError> {
    match frame.format().codec() {
        Some(c) if c == codec => Ok(()),
        _ => Err(CodecError::invalid_frame(
            codec,
            format!("unexpected input format {}", frame.format()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_create_decoder_for_builtin_codecs() {
        for codec in [CodecId::Pcm, CodecId::Pcmu, CodecId::Pcma] {
            let decoder = create_decoder(&CodecConfig::new(codec, 8000, 1)).unwrap();
            assert_eq!(decoder.codec(), codec);
            assert_eq!(decoder.output_format(), StreamFormat::interleaved(8000, 1));
        }
    }

    #[test]
    fn test_create_encoder_rejects_zero_channels() {
        let err = create_encoder(&CodecConfig::new(CodecId::Pcmu, 8000, 0))
            .err()
            .unwrap();
        assert!(matches!(err, CodecError::Unsupported { .. }));
    }

    #[cfg(not(feature = "opus"))]
    #[test]
    fn test_opus_without_feature_is_unsupported() {
        let err = create_decoder(&CodecConfig::new(CodecId::Opus, 48000, 2))
            .err()
            .unwrap();
        assert!(err.to_string().contains("opus"));
    }

    #[test]
    fn test_encoder_rejects_wrong_rate() {
        let mut encoder = create_encoder(&CodecConfig::new(CodecId::Pcmu, 8000, 1)).unwrap();
        let frame = Frame::from_samples(&[0; 320], Duration::ZERO, 16000, 1);
        assert!(matches!(
            encoder.encode(&frame),
            Err(CodecError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_encode_decode_keeps_timestamp() {
        let config = CodecConfig::new(CodecId::Pcma, 8000, 1);
        let mut encoder = create_encoder(&config).unwrap();
        let mut decoder = create_decoder(&config).unwrap();

        let pcm = Frame::from_samples(&[1000; 160], Duration::from_millis(60), 8000, 1);
        let coded = encoder.encode(&pcm).unwrap();
        assert_eq!(coded.len(), 160);
        let decoded = decoder.decode(&coded).unwrap();
        assert_eq!(decoded.timestamp(), Duration::from_millis(60));
        assert_eq!(decoded.frame_count(), 160);
    }
}
