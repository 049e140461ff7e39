//! Pipeline stages and the plumbing between them.
//!
//! ```text
//! Source ─► Decoder Worker (×N) ─► Mixer Worker ─► Encoder Worker ─► Router ─► Sinks
//!        queue                  queue            queue             queue
//! ```
//!
//! - **Queues**: bounded, drop-oldest by default, one cursor per reader
//! - **Ports**: every stage exposes a [`PortTable`]; [`connect`] binds an
//!   output to an input with exactly one queue
//! - **Workers**: one OS thread per [`Processor`], stepping until stopped
//! - **Mixer**: per-input jitter buffers drained once per tick
//! - **Router**: async loop fanning encoded frames out to sinks with retry

mod circular_buffer;
mod clock;
mod decoder;
mod encoder;
mod mixer;
mod port;
mod processor;
pub mod queue;
mod router;
mod worker;

pub use circular_buffer::{AudioCircularBuffer, WriteReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decoder::{DecoderStage, PcmLayout, DECODER_INPUT, DECODER_OUTPUT};
pub use encoder::{EncoderStage, ENCODER_INPUT, ENCODER_OUTPUT};
pub use mixer::{AudioMixer, InputState, MIXER_OUTPUT};
pub use port::{connect, connect_next, connect_reader, disconnect, FormatFilter, PortId, PortTable};
pub use processor::{Processor, StageContext, StepOutcome};
pub use queue::{Reader, WriteStatus, Writer};
pub use router::Router;
pub use worker::{Worker, WorkerState};
