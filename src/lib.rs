//! # stream-mixer
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Decode several live encoded audio streams, mix them into one, and
//! re-encode the result.
//!
//! `stream-mixer` runs every stage of the pipeline on its own thread and
//! connects them with bounded frame queues. The mixer aligns its inputs with
//! per-input jitter buffers, substitutes silence for late inputs, and emits
//! one mixed frame per tick whether or not anyone is talking.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stream_mixer::{CodecConfig, CodecId, FileSink, FormatPreset, PipelineBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = PipelineBuilder::new()
//!     .source_manager(session)                        // any SourceManager
//!     .format(FormatPreset::Conference)               // 48kHz stereo
//!     .encoder(CodecConfig::new(CodecId::Pcmu, 48000, 2))
//!     .add_sink(FileSink::raw("coded.ulaw"))
//!     .on_event(|e| tracing::warn!(?e, "pipeline event"))
//!     .start()
//!     .await?;
//!
//! let stop = CancellationToken::new();
//! // Cancel `stop` from a signal handler or another task...
//! let stats = pipeline.run_until(stop).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SourceManager ─► Decoder (×N) ─► AudioMixer ─► Encoder ─► Router ─► Sinks
//!   OS threads: one per decoder, mixer and encoder    tokio: router and sinks
//! ```
//!
//! - **Queues** never block a producer by default: a full queue evicts its
//!   oldest frame and reports an overflow
//! - **Mixer** ticks on a clock; an input that runs dry contributes silence
//!   and leaves the mix after too many consecutive empty ticks
//! - **Shutdown** stops stages upstream first so every buffered frame that
//!   can still be mixed reaches the sinks

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
pub mod codec;
mod config;
mod driver;
mod error;
mod event;
pub mod format;
mod frame;
pub mod pipeline;
mod sink;
pub mod source;
mod stats;

pub use builder::PipelineBuilder;
pub use codec::{CodecConfig, CodecId, FrameDecoder, FrameEncoder};
pub use config::{
    CanonicalFormat, FormatPreset, MixPolicy, MixerConfig, OverflowPolicy, PipelineConfig,
    QueueConfig, RouterConfig, WorkerConfig,
};
pub use driver::Pipeline;
pub use error::{
    CodecError, ConnectionError, PipelineError, PortKind, ProcessError, QueueError, SinkError,
};
pub use event::{event_callback, EventCallback, PipelineEvent};
pub use frame::{Encoding, Frame, StreamFormat};
pub use sink::{ChannelSink, FileSink, Sink};
pub use source::{MockSignal, MockSourceManager, MockStream, SourceId, SourceManager};
pub use stats::PipelineStats;
