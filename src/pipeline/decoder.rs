//! Decoder stage: compressed frames in, PCM frames out.

use std::sync::Arc;
use std::time::Duration;

use super::port::{FormatFilter, PortId, PortTable};
use super::processor::{Processor, StageContext, StepOutcome};
use super::queue::WriteStatus;
use crate::codec::{create_decoder, CodecConfig, FrameDecoder};
use crate::config::QueueConfig;
use crate::error::{CodecError, ProcessError, QueueError};
use crate::event::PipelineEvent;
use crate::frame::StreamFormat;
use crate::stats::PipelineCounters;

/// Input port of a decoder stage.
pub const DECODER_INPUT: PortId = 0;
/// Output port of a decoder stage.
pub const DECODER_OUTPUT: PortId = 0;

/// Sample layout of decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcmLayout {
    /// One buffer per channel.
    #[default]
    Planar,
    /// Channels interleaved in one buffer.
    Interleaved,
}

/// Wraps a [`FrameDecoder`] as a pipeline stage.
///
/// Each step decodes at most one frame. A frame the codec rejects is removed
/// from the input and reported as [`ProcessError::Frame`].
pub struct DecoderStage {
    name: String,
    ports: Arc<PortTable>,
    decoder: Box<dyn FrameDecoder>,
    layout: PcmLayout,
    context: StageContext,
}

impl DecoderStage {
    /// Creates a stage with a built-in decoder for `codec`.
    pub fn new(
        name: impl Into<String>,
        codec: &CodecConfig,
        layout: PcmLayout,
        queue: QueueConfig,
    ) -> Result<Self, CodecError> {
        Ok(Self::with_decoder(name, create_decoder(codec)?, layout, queue))
    }

    /// Creates a stage around any decoder.
    pub fn with_decoder(
        name: impl Into<String>,
        decoder: Box<dyn FrameDecoder>,
        layout: PcmLayout,
        queue: QueueConfig,
    ) -> Self {
        let name = name.into();
        let pcm = decoder.output_format();
        let output = match layout {
            PcmLayout::Planar => StreamFormat::planar(pcm.sample_rate, pcm.channels),
            PcmLayout::Interleaved => StreamFormat::interleaved(pcm.sample_rate, pcm.channels),
        };
        let ports = PortTable::new(name.clone())
            .with_input(FormatFilter::Codec(decoder.codec()))
            .with_output(output, queue);
        Self {
            name,
            ports: Arc::new(ports),
            decoder,
            layout,
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

impl Processor for DecoderStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    fn step(&mut self) -> Result<StepOutcome, ProcessError> {
        let Some(frame) = self.ports.read_frame(DECODER_INPUT) else {
            self.ports.release_finished_input(DECODER_INPUT);
            return Ok(StepOutcome::Idle);
        };
        let decoded = self.decoder.decode(&frame);
        self.ports.remove_frame(DECODER_INPUT);

        let pcm = decoded.map_err(|err| ProcessError::frame(&self.name, err))?;
        let pcm = match self.layout {
            PcmLayout::Planar => pcm.into_planar(),
            PcmLayout::Interleaved => pcm.into_interleaved(),
        };
        PipelineCounters::add(&self.context.counters.frames_decoded, 1);
        tracing::trace!(stage = %self.name, timestamp = ?pcm.timestamp(), "decoded frame");

        match self.ports.write_frame(DECODER_OUTPUT, pcm) {
            Ok(WriteStatus::Enqueued) => Ok(StepOutcome::Progress),
            Ok(WriteStatus::DroppedOldest) => {
                PipelineCounters::add(&self.context.counters.queue_overflows, 1);
                self.context.emit(PipelineEvent::QueueOverflow {
                    stage: self.name.clone(),
                    port: DECODER_OUTPUT,
                });
                Ok(StepOutcome::Progress)
            }
            Err(QueueError::NotConnected) => {
                tracing::trace!(stage = %self.name, "no consumer, decoded frame discarded");
                Ok(StepOutcome::Progress)
            }
            Err(err) => Err(ProcessError::frame(&self.name, err)),
        }
    }

    fn wait_for_input(&self, timeout: Duration) {
        self.ports.wait_frame(DECODER_INPUT, timeout);
    }
}
