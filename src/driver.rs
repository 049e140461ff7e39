//! Running pipeline handle: sink loop and shutdown cascade.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::builder::PipelineBuilder;
use crate::codec::CodecConfig;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::frame::Encoding;
use crate::pipeline::{
    connect, connect_next, DecoderStage, PcmLayout, PortId, PortTable, Processor, Reader, Router,
    StageContext, Worker, DECODER_INPUT,
};
use crate::source::{SourceId, SourceManager};
use crate::stats::PipelineStats;

/// A started pipeline.
///
/// Created by [`PipelineBuilder::start()`](crate::PipelineBuilder::start).
/// Every stage already runs on its own thread; [`run_until`](Self::run_until)
/// delivers the encoded output to the sinks and performs the shutdown
/// cascade when its token fires.
///
/// # Shutdown
///
/// 1. The source manager is closed (or has already stopped on its own)
/// 2. Decoder workers drain their queues and stop
/// 3. The mixer emits every remaining full tick and stops
/// 4. The encoder drains and stops, closing the output queue
/// 5. Remaining output frames reach the sinks, then sinks get `on_stop()`
///
/// Dropping a `Pipeline` without running the cascade stops the workers but
/// does not flush sinks.
pub struct Pipeline {
    source: Box<dyn SourceManager>,
    decoders: Vec<Worker>,
    mixer: Worker,
    encoder: Worker,
    router: Router,
    output: Reader,
    context: StageContext,
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates a new builder for configuring a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source: Box<dyn SourceManager>,
        decoders: Vec<Worker>,
        mixer: Worker,
        encoder: Worker,
        router: Router,
        output: Reader,
        context: StageContext,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            decoders,
            mixer,
            encoder,
            router,
            output,
            context,
            config,
        }
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.context.stats()
    }

    /// Context shared by every stage. Its [`stats()`](StageContext::stats)
    /// stays live after the pipeline is moved into `run_until`.
    pub fn context(&self) -> StageContext {
        self.context.clone()
    }

    /// Identifiers of the source manager's streams, indexed by port.
    pub fn stream_ids(&self) -> Vec<SourceId> {
        self.source.stream_ids()
    }

    /// Ports of the running mixer, for connecting extra producers.
    pub fn mixer_ports(&self) -> &Arc<PortTable> {
        self.mixer.ports()
    }

    /// Number of decoder workers.
    pub fn input_count(&self) -> usize {
        self.decoders.len()
    }

    /// Starts decoding another source stream into the running mixer.
    ///
    /// Returns the mixer input port it was connected to.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Connection`] if the source port is taken or the mixer
    /// has no free input, [`PipelineError::Codec`] if the stream's codec is
    /// unavailable.
    pub fn add_input(&mut self, port: PortId) -> Result<PortId, PipelineError> {
        let index = self.decoders.len();
        let (worker, mixer_port) =
            spawn_decoder(index, self.source.ports(), port, self.mixer.ports(), &self.config, &self.context)?;
        self.decoders.push(worker);
        tracing::info!(source_port = port, mixer_port, "input added");
        Ok(mixer_port)
    }

    /// Delivers output frames to the sinks until `stop` fires or the source
    /// manager stops running, then shuts the pipeline down and returns the
    /// final counters. `stop` itself is never cancelled here.
    ///
    /// # Errors
    ///
    /// [`PipelineError::WorkerPanicked`] if a stage panicked. Sinks are
    /// stopped either way.
    pub async fn run_until(self, stop: CancellationToken) -> Result<PipelineStats, PipelineError> {
        let Pipeline {
            source,
            decoders,
            mixer,
            encoder,
            router,
            output,
            context,
            config,
        } = self;

        tracing::info!(inputs = decoders.len(), sinks = router.sink_count(), "pipeline running");

        // Also fired when the source manager stops on its own.
        let stop = stop.child_token();
        let trigger = stop.clone();
        let poll_interval = config.router.poll_interval;
        let cascade = async move {
            loop {
                tokio::select! {
                    () = trigger.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {
                        if !source.is_running() {
                            tracing::info!("source manager stopped");
                            trigger.cancel();
                            break;
                        }
                    }
                }
            }
            tracing::info!("pipeline stopping");
            tokio::task::spawn_blocking(move || shutdown_stages(source, decoders, mixer, encoder))
                .await
                .map_err(|_| PipelineError::WorkerPanicked {
                    stage: "shutdown".to_string(),
                })?
        };

        let ((), result) = tokio::join!(router.run(&output, &stop), cascade);
        // Stages are stopped; route whatever the encoder flushed last.
        router.drain(&output).await;
        router.stop_sinks().await;

        let stats = context.stats();
        tracing::info!(
            ticks = stats.ticks_mixed,
            delivered = stats.frames_delivered,
            dropped = stats.frames_dropped,
            "pipeline stopped"
        );
        result.map(|()| stats)
    }

    /// Runs the shutdown cascade immediately.
    ///
    /// Equivalent to [`run_until`](Self::run_until) with a cancelled token.
    pub async fn stop(self) -> Result<PipelineStats, PipelineError> {
        let stop = CancellationToken::new();
        stop.cancel();
        self.run_until(stop).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("decoders", &self.decoders)
            .field("mixer", &self.mixer)
            .field("encoder", &self.encoder)
            .finish_non_exhaustive()
    }
}

/// Creates, connects and starts the decoder for one source port.
pub(crate) fn spawn_decoder(
    index: usize,
    source: &PortTable,
    source_port: PortId,
    mixer: &PortTable,
    config: &PipelineConfig,
    context: &StageContext,
) -> Result<(Worker, PortId), PipelineError> {
    let codec = stream_codec(source, source_port)?;
    let stage = DecoderStage::new(format!("decoder-{index}"), &codec, PcmLayout::Planar, config.queue)?
        .with_context(context.clone());

    connect(source, source_port, stage.ports(), DECODER_INPUT)?;
    let (_, mixer_port) = connect_next(stage.ports(), mixer)?;

    let mut worker = Worker::new(stage, config.worker).with_context(context.clone());
    worker.start()?;
    Ok((worker, mixer_port))
}

/// Codec configuration of the stream on a source port.
fn stream_codec(source: &PortTable, port: PortId) -> Result<CodecConfig, PipelineError> {
    let format = source.output_format(port).ok_or_else(|| {
        PipelineError::InvalidConfig(format!("source has no output port {port}"))
    })?;
    match format.encoding {
        Encoding::Compressed(codec) => Ok(CodecConfig::new(codec, format.sample_rate, format.channels)),
        _ => Err(PipelineError::InvalidConfig(format!(
            "source port {port} carries {format}, expected a compressed stream"
        ))),
    }
}

/// Stops every stage upstream first, joining each layer before the next.
fn shutdown_stages(
    mut source: Box<dyn SourceManager>,
    mut decoders: Vec<Worker>,
    mut mixer: Worker,
    mut encoder: Worker,
) -> Result<(), PipelineError> {
    source.close();

    let mut first_error = None;
    for decoder in &decoders {
        decoder.stop();
    }
    for decoder in &mut decoders {
        if let Err(e) = decoder.join() {
            tracing::error!(stage = decoder.name(), error = %e, "decoder failed");
            first_error.get_or_insert(e);
        }
    }
    for decoder in &decoders {
        decoder.ports().close_outputs();
    }
    for worker in [&mut mixer, &mut encoder] {
        if let Err(e) = worker.stop_and_join() {
            tracing::error!(stage = worker.name(), error = %e, "worker failed");
            first_error.get_or_insert(e);
        }
        // A panicked stage never closed its outputs.
        worker.ports().close_outputs();
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
