//! Builder pattern for [`Pipeline`].

use std::sync::Arc;

use crate::codec::{CodecConfig, CodecId};
use crate::driver::{spawn_decoder, Pipeline};
use crate::pipeline::{
    connect, connect_reader, AudioMixer, Clock, EncoderStage, PortId, Processor, Router,
    StageContext, Worker, ENCODER_INPUT, ENCODER_OUTPUT, MIXER_OUTPUT,
};
use crate::sink::Sink;
use crate::source::SourceManager;
use crate::stats::PipelineCounters;
use crate::{event_callback, EventCallback, FormatPreset, MixPolicy, PipelineConfig, PipelineError, PipelineEvent};

/// Which source streams get a decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum InputSelection {
    /// Every output port of the source manager.
    #[default]
    AllStreams,
    /// Only these ports, in this order.
    Ports(Vec<PortId>),
}

/// Builder for configuring and starting a mixing pipeline.
///
/// # Example
///
/// ```no_run
/// use stream_mixer::{
///     CodecConfig, CodecId, FileSink, FormatPreset, MockSignal, MockSourceManager, MockStream,
///     PipelineBuilder,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let ulaw = CodecConfig::new(CodecId::Pcmu, 8000, 1);
/// let source = MockSourceManager::builder()
///     .stream(MockStream::new("alice", ulaw, MockSignal::Silence))
///     .stream(MockStream::new("bob", ulaw, MockSignal::Sine { frequency: 440.0, amplitude: 0.5 }))
///     .build()?;
///
/// let pipeline = PipelineBuilder::new()
///     .source_manager(source)
///     .format(FormatPreset::Conference)
///     .encoder(CodecConfig::new(CodecId::Pcmu, 48000, 2))
///     .add_sink(FileSink::wav("mix.wav"))
///     .on_event(|e| tracing::warn!(?e, "pipeline event"))
///     .start()
///     .await?;
///
/// let stop = CancellationToken::new();
/// let trigger = stop.clone();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     trigger.cancel();
/// });
/// let stats = pipeline.run_until(stop).await?;
/// println!("mixed {} ticks", stats.ticks_mixed);
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct PipelineBuilder {
    source: Option<Box<dyn SourceManager>>,
    inputs: InputSelection,
    encoder: Option<CodecConfig>,
    sinks: Vec<Arc<dyn Sink>>,
    event_callback: Option<EventCallback>,
    clock: Option<Arc<dyn Clock>>,
    config: PipelineConfig,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            source: None,
            inputs: InputSelection::default(),
            encoder: None,
            sinks: Vec::new(),
            event_callback: None,
            clock: None,
            config: PipelineConfig::default(),
        }
    }

    /// Sets the session manager providing the encoded streams.
    pub fn source_manager<S: SourceManager + 'static>(self, source: S) -> Self {
        self.boxed_source_manager(Box::new(source))
    }

    /// Sets an already boxed session manager.
    pub fn boxed_source_manager(mut self, source: Box<dyn SourceManager>) -> Self {
        self.source = Some(source);
        self
    }

    /// Decodes and mixes the stream on source port `port`.
    ///
    /// Without any call, every stream of the source manager is mixed.
    pub fn add_input(mut self, port: PortId) -> Self {
        match &mut self.inputs {
            InputSelection::Ports(ports) => ports.push(port),
            InputSelection::AllStreams => self.inputs = InputSelection::Ports(vec![port]),
        }
        self
    }

    /// Set the canonical mixing format.
    ///
    /// Default: [`FormatPreset::Conference`] (48kHz stereo)
    pub fn format(mut self, format: FormatPreset) -> Self {
        self.config.mixer.format = format.format();
        self
    }

    /// Set how active inputs are combined.
    ///
    /// Default: [`MixPolicy::Sum`]
    pub fn mix_policy(mut self, policy: MixPolicy) -> Self {
        self.config.mixer.policy = policy;
        self
    }

    /// Set the output codec. Its rate and channel count must match the
    /// canonical format.
    ///
    /// Default: µ-law in the canonical format.
    pub fn encoder(mut self, codec: CodecConfig) -> Self {
        self.encoder = Some(codec);
        self
    }

    /// Add a sink to receive the encoded mix.
    pub fn add_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add a sink that is shared with other owners.
    pub fn add_shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include input activation changes, overflows, dropped frames
    /// and sink errors.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom pipeline configuration.
    ///
    /// Replaces any format or policy set earlier.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Schedule mixer ticks on a custom clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn encoder_config(&self) -> CodecConfig {
        let format = self.config.mixer.format;
        self.encoder
            .unwrap_or_else(|| CodecConfig::new(CodecId::Pcmu, format.sample_rate, format.channels))
    }

    fn input_ports(&self, source: &dyn SourceManager) -> Vec<PortId> {
        match &self.inputs {
            InputSelection::AllStreams => (0..source.ports().output_count()).collect(),
            InputSelection::Ports(ports) => ports.clone(),
        }
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<(), PipelineError> {
        let source = self.source.as_deref().ok_or(PipelineError::NoSourceManager)?;
        if self.sinks.is_empty() {
            return Err(PipelineError::NoSinksConfigured);
        }
        self.config.validate()?;

        let inputs = self.input_ports(source);
        if inputs.is_empty() {
            return Err(PipelineError::NoInputsConfigured);
        }
        if inputs.len() > self.config.mixer.max_inputs {
            return Err(PipelineError::TooManyInputs {
                requested: inputs.len(),
                max: self.config.mixer.max_inputs,
            });
        }

        let encoder = self.encoder_config();
        let format = self.config.mixer.format;
        if encoder.sample_rate != format.sample_rate || encoder.channels != format.channels {
            return Err(PipelineError::InvalidConfig(format!(
                "encoder {}Hz/{}ch does not match the mixing format {}Hz/{}ch",
                encoder.sample_rate, encoder.channels, format.sample_rate, format.channels
            )));
        }
        Ok(())
    }

    /// Connects every stage, starts the sinks, workers and source manager.
    ///
    /// Returns a [`Pipeline`]; call [`Pipeline::run_until`] to deliver output.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No source manager, input or sink is configured
    /// - The configuration is invalid
    /// - A codec is unavailable or two stages cannot be connected
    /// - Any sink fails to start
    /// - A worker thread cannot be spawned or the source fails to start
    pub async fn start(self) -> Result<Pipeline, PipelineError> {
        self.validate()?;
        let encoder_codec = self.encoder_config();
        let Self {
            source,
            inputs,
            sinks,
            event_callback,
            clock,
            config,
            ..
        } = self;
        let mut source = source.ok_or(PipelineError::NoSourceManager)?;
        let input_ports = match inputs {
            InputSelection::AllStreams => (0..source.ports().output_count()).collect(),
            InputSelection::Ports(ports) => ports,
        };

        let context = StageContext::with_counters(event_callback, Arc::new(PipelineCounters::default()));

        let mut mixer = AudioMixer::new("mixer", config.mixer.clone(), config.queue)?
            .with_context(context.clone());
        if let Some(clock) = clock {
            mixer = mixer.with_clock(clock);
        }
        let encoder = EncoderStage::new("encoder", &encoder_codec, config.queue)?
            .with_context(context.clone());
        connect(mixer.ports(), MIXER_OUTPUT, encoder.ports(), ENCODER_INPUT)?;
        let output = connect_reader(encoder.ports(), ENCODER_OUTPUT)?;

        let router = Router::new(sinks, config.router).with_context(context.clone());
        router.start_sinks().await?;

        let (decoders, mixer, encoder) =
            match start_stages(source.as_mut(), &input_ports, mixer, encoder, &config, &context) {
                Ok(stages) => stages,
                Err(e) => {
                    tracing::error!(error = %e, "pipeline failed to start");
                    source.close();
                    router.stop_sinks().await;
                    return Err(e);
                }
            };
        tracing::info!(
            inputs = decoders.len(),
            format = %config.mixer.format.planar(),
            encoder = %encoder_codec.compressed_format(),
            "pipeline started"
        );

        Ok(Pipeline::new(
            source, decoders, mixer, encoder, router, output, context, config,
        ))
    }
}

/// Starts the encoder and mixer, then one decoder per input, then the source.
///
/// Workers started before a failure are stopped when dropped.
fn start_stages(
    source: &mut dyn SourceManager,
    input_ports: &[PortId],
    mixer: AudioMixer,
    encoder: EncoderStage,
    config: &PipelineConfig,
    context: &StageContext,
) -> Result<(Vec<Worker>, Worker, Worker), PipelineError> {
    // Downstream first, so nothing produced is lost to an unstarted consumer.
    let mut encoder = Worker::new(encoder, config.worker).with_context(context.clone());
    encoder.start()?;
    let mut mixer = Worker::new(mixer, config.worker).with_context(context.clone());
    mixer.start()?;

    let mut decoders = Vec::with_capacity(input_ports.len());
    for (index, &port) in input_ports.iter().enumerate() {
        let (worker, mixer_port) =
            spawn_decoder(index, source.ports(), port, mixer.ports(), config, context)?;
        tracing::debug!(source_port = port, mixer_port, "input connected");
        decoders.push(worker);
    }

    source.start()?;
    Ok((decoders, mixer, encoder))
}
