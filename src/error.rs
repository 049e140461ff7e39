//! Error types for stream-mixer.
//!
//! Errors are split into three categories:
//! - **Setup errors** ([`PipelineError`], [`ConnectionError`]): the pipeline
//!   cannot be assembled or started
//! - **Per-frame errors** ([`CodecError`], [`ProcessError::Frame`]): one frame
//!   is dropped, processing continues
//! - **Recoverable events**: underruns, overflows and sink failures surfaced via
//!   [`EventCallback`](crate::EventCallback)

use std::fmt;
use std::path::PathBuf;

use crate::codec::CodecId;
use crate::pipeline::PortId;

/// Direction of a stage port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// A port the stage reads frames from.
    Input,
    /// A port the stage writes frames to.
    Output,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Failure to bind two stage ports with a queue.
///
/// Returned from [`connect`](crate::pipeline::connect) and friends. Never
/// fatal on its own: the caller decides whether to retry or abort setup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The stage has no port with that index.
    #[error("stage '{stage}' has no {kind} port {port}")]
    NoSuchPort {
        /// Name of the stage.
        stage: String,
        /// Direction of the missing port.
        kind: PortKind,
        /// Requested port index.
        port: PortId,
    },

    /// The port already has a queue attached.
    #[error("{kind} port {port} of stage '{stage}' is already bound")]
    PortAlreadyBound {
        /// Name of the stage.
        stage: String,
        /// Direction of the bound port.
        kind: PortKind,
        /// Port index.
        port: PortId,
    },

    /// The producer's output format is not accepted by the consumer's input.
    #[error("incompatible formats: '{producer}' emits {format}, '{consumer}' accepts {accepts}")]
    IncompatibleFormat {
        /// Producing stage.
        producer: String,
        /// Consuming stage.
        consumer: String,
        /// Format emitted by the producer port.
        format: String,
        /// Formats accepted by the consumer port.
        accepts: String,
    },

    /// Every port of the requested kind is already in use.
    #[error("stage '{stage}' has no free {kind} port")]
    NoFreePort {
        /// Name of the stage.
        stage: String,
        /// Direction that was requested.
        kind: PortKind,
    },
}

/// Failure of a codec collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The codec cannot be configured with the requested parameters.
    #[error("{codec} unsupported: {reason}")]
    Unsupported {
        /// Codec that rejected the configuration.
        codec: CodecId,
        /// Why it was rejected.
        reason: String,
    },

    /// The frame handed to the codec is not valid input for it.
    #[error("invalid frame for {codec}: {reason}")]
    InvalidFrame {
        /// Codec that received the frame.
        codec: CodecId,
        /// What was wrong with the frame.
        reason: String,
    },

    /// The codec library reported an error.
    #[error("{codec} backend error: {reason}")]
    Backend {
        /// Codec that failed.
        codec: CodecId,
        /// Library error message.
        reason: String,
    },
}

impl CodecError {
    /// Creates an invalid frame error.
    pub fn invalid_frame(codec: CodecId, reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            codec,
            reason: reason.into(),
        }
    }

    /// Creates an unsupported configuration error.
    pub fn unsupported(codec: CodecId, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            codec,
            reason: reason.into(),
        }
    }
}

/// Failure to move a frame through a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue was closed by its writer or torn down.
    #[error("queue closed")]
    Closed,

    /// Every reader of the queue has gone away.
    #[error("queue has no readers")]
    Disconnected,

    /// The port has no queue attached.
    #[error("port not connected")]
    NotConnected,

    /// A blocking write did not find room before its deadline.
    #[error("timed out waiting for queue space")]
    Timeout,
}

/// Error returned from a single [`Processor::step`](crate::pipeline::Processor::step).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// One frame could not be processed and was dropped. The worker continues.
    #[error("{stage}: frame dropped: {reason}")]
    Frame {
        /// Stage that dropped the frame.
        stage: String,
        /// Why it was dropped.
        reason: String,
    },

    /// The stage cannot continue. The owning worker terminates.
    #[error("{stage}: fatal: {reason}")]
    Fatal {
        /// Stage that failed.
        stage: String,
        /// What failed.
        reason: String,
    },
}

impl ProcessError {
    /// Creates a recoverable per-frame error.
    pub fn frame(stage: impl Into<String>, reason: impl ToString) -> Self {
        Self::Frame {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(stage: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fatal {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the worker must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Fatal errors that prevent a pipeline from being built, started or run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No session manager was supplied to the builder.
    #[error("no source manager configured - call source_manager() before start()")]
    NoSourceManager,

    /// No decoder inputs were configured.
    #[error("no inputs configured - add at least one input")]
    NoInputsConfigured,

    /// No sinks were configured before starting.
    #[error("no sinks configured - add at least one sink")]
    NoSinksConfigured,

    /// More inputs than the mixer has ports.
    #[error("{requested} inputs requested but the mixer accepts at most {max}")]
    TooManyInputs {
        /// Number of inputs configured.
        requested: usize,
        /// Mixer capacity.
        max: usize,
    },

    /// Two stages could not be connected.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A codec could not be created.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A worker was asked to start from a state other than idle.
    #[error("worker '{stage}' cannot start from state {state}")]
    WorkerState {
        /// Worker name.
        stage: String,
        /// State the worker was in.
        state: String,
    },

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker '{stage}': {source}")]
    WorkerSpawn {
        /// Worker name.
        stage: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked.
    #[error("worker '{stage}' panicked")]
    WorkerPanicked {
        /// Worker name.
        stage: String,
    },

    /// A sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },

    /// The session manager failed to start.
    #[error("source manager error: {0}")]
    Source(String),
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// Sink errors are recoverable - the router will emit a
/// [`PipelineEvent::SinkError`](crate::PipelineEvent::SinkError) and may retry
/// the operation.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The sink cannot store frames of this format.
    #[error("unsupported frame format: {format}")]
    UnsupportedFormat {
        /// Format of the rejected frame.
        format: String,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}
