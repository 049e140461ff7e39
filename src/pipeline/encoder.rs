//! Encoder stage: PCM frames in, compressed frames out.

use std::sync::Arc;
use std::time::Duration;

use super::port::{FormatFilter, PortId, PortTable};
use super::processor::{Processor, StageContext, StepOutcome};
use super::queue::WriteStatus;
use crate::codec::{create_encoder, CodecConfig, FrameEncoder};
use crate::config::QueueConfig;
use crate::error::{CodecError, ProcessError, QueueError};
use crate::event::PipelineEvent;
use crate::stats::PipelineCounters;

/// Input port of an encoder stage.
pub const ENCODER_INPUT: PortId = 0;
/// Output port of an encoder stage.
pub const ENCODER_OUTPUT: PortId = 0;

/// Wraps a [`FrameEncoder`] as a pipeline stage.
///
/// The input port accepts planar or interleaved PCM with the encoder's rate
/// and channel count. Codec parameters are fixed at construction.
pub struct EncoderStage {
    name: String,
    ports: Arc<PortTable>,
    encoder: Box<dyn FrameEncoder>,
    context: StageContext,
}

impl EncoderStage {
    /// Creates a stage with a built-in encoder.
    pub fn new(
        name: impl Into<String>,
        codec: &CodecConfig,
        queue: QueueConfig,
    ) -> Result<Self, CodecError> {
        Ok(Self::with_encoder(name, create_encoder(codec)?, queue))
    }

    /// Creates a stage around any encoder.
    pub fn with_encoder(
        name: impl Into<String>,
        encoder: Box<dyn FrameEncoder>,
        queue: QueueConfig,
    ) -> Self {
        let name = name.into();
        let format = encoder.output_format();
        let ports = PortTable::new(name.clone())
            .with_input(FormatFilter::Pcm {
                sample_rate: format.sample_rate,
                channels: format.channels,
            })
            .with_output(format, queue);
        Self {
            name,
            ports: Arc::new(ports),
            encoder,
            context: StageContext::default(),
        }
    }

    /// Sets where events and counters are reported.
    #[must_use]
    pub fn with_context(mut self, context: StageContext) -> Self {
        self.context = context;
        self
    }
}

impl Processor for EncoderStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    fn step(&mut self) -> Result<StepOutcome, ProcessError> {
        let Some(frame) = self.ports.read_frame(ENCODER_INPUT) else {
            self.ports.release_finished_input(ENCODER_INPUT);
            return Ok(StepOutcome::Idle);
        };
        let encoded = self.encoder.encode(&frame);
        self.ports.remove_frame(ENCODER_INPUT);

        let coded = encoded.map_err(|err| ProcessError::frame(&self.name, err))?;
        PipelineCounters::add(&self.context.counters.frames_encoded, 1);
        tracing::trace!(stage = %self.name, bytes = coded.len(), "encoded frame");

        match self.ports.write_frame(ENCODER_OUTPUT, coded) {
            Ok(WriteStatus::Enqueued) => Ok(StepOutcome::Progress),
            Ok(WriteStatus::DroppedOldest) => {
                PipelineCounters::add(&self.context.counters.queue_overflows, 1);
                self.context.emit(PipelineEvent::QueueOverflow {
                    stage: self.name.clone(),
                    port: ENCODER_OUTPUT,
                });
                Ok(StepOutcome::Progress)
            }
            Err(QueueError::NotConnected) => {
                tracing::trace!(stage = %self.name, "no consumer, encoded frame discarded");
                Ok(StepOutcome::Progress)
            }
            Err(err) => Err(ProcessError::frame(&self.name, err)),
        }
    }

    fn wait_for_input(&self, timeout: Duration) {
        self.ports.wait_frame(ENCODER_INPUT, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::error::ConnectionError;
    use crate::frame::{Frame, StreamFormat};
    use crate::pipeline::port::{connect, connect_reader};

    #[test]
    fn test_encodes_planar_mix_to_pcmu() {
        let codec = CodecConfig::new(CodecId::Pcmu, 48000, 2);
        let mut stage = EncoderStage::new("encoder", &codec, QueueConfig::default()).unwrap();
        let mix = PortTable::new("mixer").with_output(StreamFormat::planar(48000, 2), QueueConfig::default());
        connect(&mix, 0, stage.ports(), ENCODER_INPUT).unwrap();
        let out = connect_reader(stage.ports(), ENCODER_OUTPUT).unwrap();

        let frame = Frame::from_planar_samples(&[vec![0; 960], vec![0; 960]], Duration::from_millis(60), 48000);
        mix.write_frame(0, frame).unwrap();
        assert_eq!(stage.step().unwrap(), StepOutcome::Progress);

        let coded = out.read_frame().unwrap();
        assert_eq!(coded.format(), StreamFormat::compressed(CodecId::Pcmu, 48000, 2));
        assert_eq!(coded.len(), 1920);
        assert_eq!(coded.timestamp(), Duration::from_millis(60));
        assert_eq!(stage.context.stats().frames_encoded, 1);
    }

    #[test]
    fn test_rejects_mismatched_pcm_at_connect() {
        let codec = CodecConfig::new(CodecId::Pcma, 8000, 1);
        let stage = EncoderStage::new("encoder", &codec, QueueConfig::default()).unwrap();
        let mix = PortTable::new("mixer").with_output(StreamFormat::planar(48000, 2), QueueConfig::default());
        assert!(matches!(
            connect(&mix, 0, stage.ports(), ENCODER_INPUT),
            Err(ConnectionError::IncompatibleFormat { .. })
        ));
    }

    #[test]
    fn test_unconnected_output_discards() {
        let codec = CodecConfig::new(CodecId::Pcm, 8000, 1);
        let mut stage = EncoderStage::new("encoder", &codec, QueueConfig::default()).unwrap();
        let mix = PortTable::new("mixer").with_output(StreamFormat::interleaved(8000, 1), QueueConfig::default());
        connect(&mix, 0, stage.ports(), ENCODER_INPUT).unwrap();
        mix.write_frame(0, Frame::from_samples(&[1; 80], Duration::ZERO, 8000, 1)).unwrap();
        assert_eq!(stage.step().unwrap(), StepOutcome::Progress);
        assert_eq!(stage.step().unwrap(), StepOutcome::Idle);
    }
}
