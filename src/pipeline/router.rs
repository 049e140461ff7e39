//! Sink loop that fans encoded frames out to sinks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::processor::StageContext;
use super::queue::Reader;
use crate::config::RouterConfig;
use crate::error::PipelineError;
use crate::event::PipelineEvent;
use crate::frame::Frame;
use crate::sink::Sink;
use crate::stats::PipelineCounters;

/// Pulls frames from the pipeline's output queue and forwards them to every sink.
pub struct Router {
    sinks: Vec<Arc<dyn Sink>>,
    context: StageContext,
    config: RouterConfig,
}

impl Router {
    /// Creates a router for the given sinks.
    pub fn new(sinks: Vec<Arc<dyn Sink>>, config: RouterConfig) -> Self {
        Self {
            sinks,
            context: StageContext::default(),
            config,
        }
    }

    /// Sets where sink errors and delivery counts are reported.
    #[must_use]
    pub fn with_context(mut self, context: StageContext) -> Self {
        self.context = context;
        self
    }

    /// Number of sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    async fn write_to_sink(&self, sink: &Arc<dyn Sink>, frame: &Arc<Frame>) -> bool {
        let mut attempts = 0;
        let mut delay = self.config.sink_retry_delay;

        loop {
            match sink.write(frame.clone()).await {
                Ok(()) => return true,
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(sink = sink.name(), attempt = attempts, error = %e, "sink write failed");
                    self.context.emit(PipelineEvent::SinkError {
                        sink_name: sink.name().to_string(),
                        error: e.to_string(),
                    });

                    if attempts >= self.config.sink_retry_attempts {
                        return false;
                    }

                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Writes a frame to all sinks concurrently.
    pub async fn route(&self, frame: Arc<Frame>) {
        let writes: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| self.write_to_sink(sink, &frame))
            .collect();

        let results = futures::future::join_all(writes).await;
        if results.iter().any(|ok| *ok) {
            PipelineCounters::add(&self.context.counters.frames_delivered, 1);
        }
    }

    /// Starts all sinks.
    ///
    /// # Errors
    ///
    /// [`PipelineError::SinkStartFailed`] for the first sink that fails.
    pub async fn start_sinks(&self) -> Result<(), PipelineError> {
        for sink in &self.sinks {
            sink.on_start()
                .await
                .map_err(|e| PipelineError::SinkStartFailed {
                    sink_name: sink.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Stops all sinks.
    pub async fn stop_sinks(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_stop().await {
                self.context.emit(PipelineEvent::SinkError {
                    sink_name: sink.name().to_string(),
                    error: format!("Error during shutdown: {e}"),
                });
            }
        }
    }

    /// Routes every frame currently queued on `reader`. Returns how many.
    pub async fn drain(&self, reader: &Reader) -> usize {
        let mut routed = 0;
        while let Some(frame) = reader.read_frame() {
            reader.remove_frame();
            self.route(frame).await;
            routed += 1;
        }
        routed
    }

    /// Polls `reader` until its queue is finished, routing each frame.
    ///
    /// Sleeps [`RouterConfig::poll_interval`] whenever the queue is empty. When
    /// `stop` fires the loop keeps going until the producer closes the queue,
    /// so frames still flowing through the pipeline reach the sinks.
    pub async fn run(&self, reader: &Reader, stop: &CancellationToken) {
        loop {
            if self.drain(reader).await > 0 {
                continue;
            }
            if reader.is_finished() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = stop.cancelled(), if !stop.is_cancelled() => {}
            }
        }
        tracing::debug!(queue = reader.name(), "sink loop finished");
    }
}
