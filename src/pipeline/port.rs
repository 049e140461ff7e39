//! Stage ports and the `connect` operations that bind them with queues.
//!
//! Every stage owns a shared [`PortTable`]: a fixed set of input ports, each
//! with a [`FormatFilter`], and output ports, each with a declared
//! [`StreamFormat`]. Connecting an output to an input creates exactly one
//! [`queue`](super::queue) between them. Tables are shared through `Arc`, so
//! ports of a running stage can be connected and disconnected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::queue::{self, Reader, WriteStatus, Writer};
use crate::codec::CodecId;
use crate::config::QueueConfig;
use crate::error::{ConnectionError, PortKind, QueueError};
use crate::frame::{Frame, StreamFormat};

/// Index of a port within its stage.
pub type PortId = usize;

/// Formats an input port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFilter {
    /// Anything.
    Any,
    /// PCM in either layout, any rate or channel count.
    AnyPcm,
    /// PCM in either layout with this exact shape.
    Pcm {
        /// Required sample rate.
        sample_rate: u32,
        /// Required channel count.
        channels: u16,
    },
    /// Frames compressed with this codec.
    Codec(CodecId),
}

impl FormatFilter {
    /// Returns `true` if frames of `format` may flow into this port.
    pub fn accepts(&self, format: &StreamFormat) -> bool {
        match *self {
            Self::Any => true,
            Self::AnyPcm => format.is_pcm(),
            Self::Pcm {
                sample_rate,
                channels,
            } => format.is_pcm() && format.sample_rate == sample_rate && format.channels == channels,
            Self::Codec(codec) => format.codec() == Some(codec),
        }
    }
}

impl fmt::Display for FormatFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::AnyPcm => f.write_str("pcm"),
            Self::Pcm {
                sample_rate,
                channels,
            } => write!(f, "pcm/{sample_rate}Hz/{channels}ch"),
            Self::Codec(codec) => write!(f, "{codec}"),
        }
    }
}

#[derive(Debug)]
struct InputPort {
    filter: FormatFilter,
    reader: RwLock<Option<Reader>>,
}

#[derive(Debug)]
struct OutputPort {
    format: StreamFormat,
    queue: QueueConfig,
    writer: RwLock<Option<Writer>>,
}

/// The ports of one stage.
///
/// Built once with [`with_input`](Self::with_input) /
/// [`with_output`](Self::with_output); the port set is fixed afterwards, only
/// bindings change.
#[derive(Debug)]
pub struct PortTable {
    name: String,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
}

impl PortTable {
    /// Creates a table with no ports.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, filter: FormatFilter) -> Self {
        self.inputs.push(InputPort {
            filter,
            reader: RwLock::new(None),
        });
        self
    }

    /// Adds `count` input ports sharing one filter.
    #[must_use]
    pub fn with_inputs(mut self, count: usize, filter: FormatFilter) -> Self {
        for _ in 0..count {
            self = self.with_input(filter);
        }
        self
    }

    /// Adds an output port. Queues created on it use `queue`.
    #[must_use]
    pub fn with_output(mut self, format: StreamFormat, queue: QueueConfig) -> Self {
        self.outputs.push(OutputPort {
            format,
            queue,
            writer: RwLock::new(None),
        });
        self
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of input ports.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output ports.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Filter of an input port.
    pub fn input_filter(&self, port: PortId) -> Option<FormatFilter> {
        self.inputs.get(port).map(|p| p.filter)
    }

    /// Declared format of an output port.
    pub fn output_format(&self, port: PortId) -> Option<StreamFormat> {
        self.outputs.get(port).map(|p| p.format)
    }

    /// Unbound input ports, lowest first.
    pub fn available_readers(&self) -> Vec<PortId> {
        (0..self.inputs.len())
            .filter(|&p| !self.is_input_bound(p))
            .collect()
    }

    /// Unbound output ports, lowest first.
    pub fn available_writers(&self) -> Vec<PortId> {
        (0..self.outputs.len())
            .filter(|&p| !self.is_output_bound(p))
            .collect()
    }

    /// Returns `true` if the input port has a queue.
    pub fn is_input_bound(&self, port: PortId) -> bool {
        self.inputs
            .get(port)
            .is_some_and(|p| p.reader.read().is_some())
    }

    /// Returns `true` if the output port has a queue.
    pub fn is_output_bound(&self, port: PortId) -> bool {
        self.outputs
            .get(port)
            .is_some_and(|p| p.writer.read().is_some())
    }

    /// Runs `f` with the reader bound to an input port, if any.
    pub fn with_reader<R>(&self, port: PortId, f: impl FnOnce(&Reader) -> R) -> Option<R> {
        let input = self.inputs.get(port)?;
        let guard = input.reader.read();
        guard.as_ref().map(f)
    }

    /// Oldest frame not yet removed from an input port.
    pub fn read_frame(&self, port: PortId) -> Option<Arc<Frame>> {
        self.with_reader(port, Reader::read_frame).flatten()
    }

    /// Advances an input port past the frame last read.
    pub fn remove_frame(&self, port: PortId) -> bool {
        self.with_reader(port, Reader::remove_frame).unwrap_or(false)
    }

    /// Waits up to `timeout` for a frame on an input port.
    ///
    /// Sleeps for the timeout when the port is unbound, so idle stages do not spin.
    pub fn wait_frame(&self, port: PortId, timeout: Duration) -> Option<Arc<Frame>> {
        match self.with_reader(port, |r| r.wait_frame(timeout)) {
            Some(frame) => frame,
            None => {
                std::thread::sleep(timeout);
                None
            }
        }
    }

    /// Returns `true` if the input port's queue is closed and drained.
    pub fn input_finished(&self, port: PortId) -> bool {
        self.with_reader(port, Reader::is_finished).unwrap_or(false)
    }

    /// Unbinds an input port whose queue is finished. Returns `true` if it was freed.
    pub fn release_finished_input(&self, port: PortId) -> bool {
        let Some(input) = self.inputs.get(port) else {
            return false;
        };
        let mut slot = input.reader.write();
        if slot.as_ref().is_some_and(Reader::is_finished) {
            *slot = None;
            tracing::debug!(stage = %self.name, port, "input released");
            return true;
        }
        false
    }

    /// Writes a frame to an output port.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotConnected`] when the port has no queue, otherwise the
    /// queue's own error. A closed or reader-less queue is unbound from the port.
    pub fn write_frame(&self, port: PortId, frame: Frame) -> Result<WriteStatus, QueueError> {
        let output = self.outputs.get(port).ok_or(QueueError::NotConnected)?;
        let result = match output.writer.read().as_ref() {
            Some(writer) => writer.write_frame(frame),
            None => return Err(QueueError::NotConnected),
        };
        if matches!(result, Err(QueueError::Closed | QueueError::Disconnected)) {
            let mut slot = output.writer.write();
            if slot
                .as_ref()
                .is_some_and(|w| w.is_closed() || !w.has_readers())
            {
                *slot = None;
                tracing::debug!(stage = %self.name, port, "output released, consumer gone");
            }
        }
        result
    }

    /// Closes and unbinds every output port.
    pub fn close_outputs(&self) {
        for output in &self.outputs {
            if let Some(writer) = output.writer.write().take() {
                writer.close();
            }
        }
    }

    fn output(&self, port: PortId) -> Result<&OutputPort, ConnectionError> {
        self.outputs.get(port).ok_or_else(|| ConnectionError::NoSuchPort {
            stage: self.name.clone(),
            kind: PortKind::Output,
            port,
        })
    }

    fn input(&self, port: PortId) -> Result<&InputPort, ConnectionError> {
        self.inputs.get(port).ok_or_else(|| ConnectionError::NoSuchPort {
            stage: self.name.clone(),
            kind: PortKind::Input,
            port,
        })
    }

    fn already_bound(&self, kind: PortKind, port: PortId) -> ConnectionError {
        ConnectionError::PortAlreadyBound {
            stage: self.name.clone(),
            kind,
            port,
        }
    }
}

/// Binds a producer's output port to a consumer's input port with a new queue.
///
/// On success exactly one queue exists between the two ports. On failure
/// neither table changes.
///
/// # Errors
///
/// - [`ConnectionError::NoSuchPort`] if either index is out of range
/// - [`ConnectionError::PortAlreadyBound`] if either port already has a queue
/// - [`ConnectionError::IncompatibleFormat`] if the input filter rejects the
///   output format
pub fn connect(
    producer: &PortTable,
    writer_port: PortId,
    consumer: &PortTable,
    reader_port: PortId,
) -> Result<(), ConnectionError> {
    let output = producer.output(writer_port)?;
    let input = consumer.input(reader_port)?;

    // Lock order: output before input.
    let mut writer_slot = output.writer.write();
    if writer_slot.is_some() {
        return Err(producer.already_bound(PortKind::Output, writer_port));
    }
    let mut reader_slot = input.reader.write();
    if reader_slot.is_some() {
        return Err(consumer.already_bound(PortKind::Input, reader_port));
    }
    if !input.filter.accepts(&output.format) {
        return Err(ConnectionError::IncompatibleFormat {
            producer: producer.name.clone(),
            consumer: consumer.name.clone(),
            format: output.format.to_string(),
            accepts: input.filter.to_string(),
        });
    }

    let name = format!(
        "{}:{} -> {}:{}",
        producer.name, writer_port, consumer.name, reader_port
    );
    let (writer, reader) = queue::channel(name, output.queue);
    tracing::debug!(queue = %writer.name(), format = %output.format, "connected");
    *writer_slot = Some(writer);
    *reader_slot = Some(reader);
    Ok(())
}

/// Connects the first free output of `producer` to the first free input of
/// `consumer` and returns the chosen ports.
///
/// # Errors
///
/// [`ConnectionError::NoFreePort`] when either side is full, otherwise as
/// [`connect`].
pub fn connect_next(
    producer: &PortTable,
    consumer: &PortTable,
) -> Result<(PortId, PortId), ConnectionError> {
    let writer_port = producer
        .available_writers()
        .first()
        .copied()
        .ok_or_else(|| ConnectionError::NoFreePort {
            stage: producer.name.clone(),
            kind: PortKind::Output,
        })?;
    let reader_port = consumer
        .available_readers()
        .first()
        .copied()
        .ok_or_else(|| ConnectionError::NoFreePort {
            stage: consumer.name.clone(),
            kind: PortKind::Input,
        })?;
    connect(producer, writer_port, consumer, reader_port)?;
    Ok((writer_port, reader_port))
}

/// Binds a producer's output port to a free-standing [`Reader`].
///
/// Used for endpoints that are not stages, like the sink loop.
///
/// # Errors
///
/// [`ConnectionError::NoSuchPort`] or [`ConnectionError::PortAlreadyBound`].
pub fn connect_reader(producer: &PortTable, writer_port: PortId) -> Result<Reader, ConnectionError> {
    let output = producer.output(writer_port)?;
    let mut writer_slot = output.writer.write();
    if writer_slot.is_some() {
        return Err(producer.already_bound(PortKind::Output, writer_port));
    }
    let name = format!("{}:{} -> reader", producer.name, writer_port);
    let (writer, reader) = queue::channel(name, output.queue);
    *writer_slot = Some(writer);
    Ok(reader)
}

/// Closes the queue on a producer's output port and frees the port.
///
/// The consumer frees its input port once it has drained the queue. Returns
/// `false` if the port was not bound.
pub fn disconnect(producer: &PortTable, writer_port: PortId) -> bool {
    let Some(output) = producer.outputs.get(writer_port) else {
        return false;
    };
    match output.writer.write().take() {
        Some(writer) => {
            writer.close();
            tracing::debug!(queue = %writer.name(), "disconnected");
            true
        }
        None => false,
    }
}
