//! Runtime events for monitoring pipeline health.
//!
//! Events are non-fatal notifications about pipeline behavior. The pipeline
//! continues running after events are emitted - they're for logging/metrics,
//! not error handling.

use std::sync::Arc;

use crate::frame::StreamFormat;
use crate::pipeline::PortId;

/// Runtime events emitted while the pipeline runs.
///
/// These are informational events, not errors. Use the [`EventCallback`] to
/// log these or update metrics.
///
/// # Example
///
/// ```
/// use stream_mixer::PipelineEvent;
///
/// fn handle_event(event: PipelineEvent) {
///     match event {
///         PipelineEvent::InputDeactivated { input, underruns } => {
///             eprintln!("input {input} went quiet after {underruns} empty ticks");
///         }
///         PipelineEvent::SinkError { sink_name, error } => {
///             eprintln!("sink '{sink_name}' error: {error}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A queue was full and evicted its oldest frame.
    QueueOverflow {
        /// Stage that wrote to the full queue.
        stage: String,
        /// Output port of that stage.
        port: PortId,
    },

    /// A stage dropped a frame it could not process.
    FrameDropped {
        /// Stage that dropped the frame.
        stage: String,
        /// Why it was dropped.
        reason: String,
    },

    /// A mixer input buffered its first tick and joined the mix.
    InputActivated {
        /// Mixer input port.
        input: PortId,
    },

    /// A mixer input underran too many ticks in a row and left the mix.
    ///
    /// It rejoins with [`InputResumed`](PipelineEvent::InputResumed) once a
    /// full tick is buffered again.
    InputDeactivated {
        /// Mixer input port.
        input: PortId,
        /// Consecutive underruns at deactivation.
        underruns: u32,
    },

    /// A deactivated mixer input buffered a full tick again.
    InputResumed {
        /// Mixer input port.
        input: PortId,
    },

    /// A mixer input's jitter buffer was full and dropped its oldest samples.
    InputOverflow {
        /// Mixer input port.
        input: PortId,
        /// Samples per channel dropped.
        dropped_samples: usize,
    },

    /// A mixer input changed format mid-stream; its converter was rebuilt.
    InputFormatChanged {
        /// Mixer input port.
        input: PortId,
        /// Format before the change.
        previous: StreamFormat,
        /// Format after the change.
        current: StreamFormat,
    },

    /// A mixer input's queue closed and drained; its port is free again.
    InputDisconnected {
        /// Mixer input port.
        input: PortId,
    },

    /// A sink encountered an error during write.
    ///
    /// The router will retry according to
    /// [`RouterConfig`](crate::RouterConfig) settings.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// A worker thread finished.
    WorkerStopped {
        /// Stage the worker ran.
        stage: String,
        /// Why it stopped.
        reason: String,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`PipelineBuilder::on_event()`] to receive
/// notifications about input activity, overflow and sink errors.
///
/// [`PipelineBuilder::on_event()`]: crate::PipelineBuilder::on_event
///
/// The callback runs on worker threads and must return quickly.
pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_mixer::{event_callback, PipelineEvent};
///
/// let callback = event_callback(|event: PipelineEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(PipelineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_event_debug() {
        let event = PipelineEvent::InputOverflow {
            input: 2,
            dropped_samples: 480,
        };
        let debug = format!("{:?}", event);
        assert!(debug.contains("InputOverflow"));
        assert!(debug.contains("480"));
    }

    #[test]
    fn test_pipeline_event_clone() {
        let event = PipelineEvent::SinkError {
            sink_name: "file".to_string(),
            error: "disk full".to_string(),
        };
        let cloned = event.clone();
        if let PipelineEvent::SinkError { sink_name, error } = cloned {
            assert_eq!(sink_name, "file");
            assert_eq!(error, "disk full");
        } else {
            panic!("Expected SinkError variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(PipelineEvent::InputActivated { input: 0 });
        assert!(called.load(Ordering::SeqCst));
    }
}
