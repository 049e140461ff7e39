//! Mock session manager producing synthetic encoded streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{SourceId, SourceManager};
use crate::codec::{create_encoder, CodecConfig, FrameEncoder};
use crate::config::QueueConfig;
use crate::error::{CodecError, PipelineError, QueueError};
use crate::frame::Frame;
use crate::pipeline::{PortId, PortTable, WriteStatus};

/// Waveform generated for a mock stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockSignal {
    /// All zeros.
    Silence,
    /// Sine wave; `amplitude` is a fraction of full scale.
    Sine {
        /// Frequency in Hz.
        frequency: f64,
        /// Peak level, `0.0..=1.0`.
        amplitude: f64,
    },
    /// Deterministic white noise; `amplitude` is a fraction of full scale.
    Noise {
        /// Peak level, `0.0..=1.0`.
        amplitude: f64,
    },
    /// Every sample has this value.
    Constant(i16),
}

/// One synthetic stream offered by a [`MockSourceManager`].
#[derive(Debug, Clone)]
pub struct MockStream {
    /// Stream identifier.
    pub id: SourceId,
    /// Codec and shape of the produced frames.
    pub codec: CodecConfig,
    /// Generated waveform.
    pub signal: MockSignal,
}

impl MockStream {
    /// Creates a stream description.
    pub fn new(id: impl Into<SourceId>, codec: CodecConfig, signal: MockSignal) -> Self {
        Self {
            id: id.into(),
            codec,
            signal,
        }
    }
}

struct Generator {
    signal: MockSignal,
    channels: u16,
    frames_per_packet: usize,
    encoder: Box<dyn FrameEncoder>,
    position: u64,
    seed: u32,
}

impl Generator {
    fn new(stream: &MockStream, frame_duration: Duration) -> Result<Self, CodecError> {
        let frames_per_packet =
            (u128::from(stream.codec.sample_rate) * frame_duration.as_nanos() / 1_000_000_000) as usize;
        Ok(Self {
            signal: stream.signal,
            channels: stream.codec.channels,
            frames_per_packet,
            encoder: create_encoder(&stream.codec)?,
            position: 0,
            seed: 12345,
        })
    }

    fn sample(&mut self) -> i16 {
        let n = self.position;
        self.position += 1;
        match self.signal {
            MockSignal::Silence => 0,
            MockSignal::Constant(value) => value,
            MockSignal::Sine {
                frequency,
                amplitude,
            } => {
                let rate = self.encoder.output_format().sample_rate.max(1);
                let t = n as f64 / f64::from(rate);
                let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
                (value * amplitude * 32767.0) as i16
            }
            MockSignal::Noise { amplitude } => {
                // LCG keeps runs reproducible.
                self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                let random = ((self.seed >> 16) as i32 - 32768) as i16;
                (f64::from(random) * amplitude) as i16
            }
        }
    }

    fn next_frame(&mut self, timestamp: Duration) -> Result<Frame, CodecError> {
        let channels = usize::from(self.channels);
        let mut samples = Vec::with_capacity(self.frames_per_packet * channels);
        for _ in 0..self.frames_per_packet {
            let sample = self.sample();
            samples.extend(std::iter::repeat(sample).take(channels));
        }
        let format = self.encoder.output_format();
        let pcm = Frame::from_samples(&samples, timestamp, format.sample_rate, format.channels);
        self.encoder.encode(&pcm)
    }
}

/// Builder for [`MockSourceManager`].
#[derive(Debug, Clone)]
pub struct MockSourceManagerBuilder {
    streams: Vec<MockStream>,
    frame_duration: Duration,
    frame_limit: Option<u64>,
    queue: QueueConfig,
}

impl MockSourceManagerBuilder {
    /// Adds a stream. Streams get output ports in the order they are added.
    #[must_use]
    pub fn stream(mut self, stream: MockStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Sets the packet duration (default 20 ms).
    #[must_use]
    pub fn frame_duration(mut self, duration: Duration) -> Self {
        self.frame_duration = duration;
        self
    }

    /// Ends every stream after `frames` packets; the output queues are then closed.
    #[must_use]
    pub fn frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Sets the queue configuration of the output ports.
    #[must_use]
    pub fn queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Creates the manager and its encoders.
    ///
    /// # Errors
    ///
    /// [`CodecError`] if a stream's codec cannot be created.
    pub fn build(self) -> Result<MockSourceManager, CodecError> {
        let mut ports = PortTable::new("source");
        let mut generators = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            ports = ports.with_output(stream.codec.compressed_format(), self.queue);
            generators.push(Generator::new(stream, self.frame_duration)?);
        }
        Ok(MockSourceManager {
            ids: self.streams.into_iter().map(|s| s.id).collect(),
            ports: Arc::new(ports),
            generators,
            frame_duration: self.frame_duration,
            frame_limit: self.frame_limit,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }
}

/// A [`SourceManager`] that generates paced synthetic streams.
///
/// After [`start`](SourceManager::start), a thread produces one encoded
/// packet per stream every frame duration, timestamped from zero. Tests can
/// also push frames directly with [`inject`](Self::inject), with or without
/// starting the thread.
///
/// # Example
///
/// ```
/// use stream_mixer::{CodecConfig, CodecId, MockSignal, MockSourceManager, MockStream, SourceManager};
///
/// let source = MockSourceManager::builder()
///     .stream(MockStream::new("alice", CodecConfig::new(CodecId::Pcmu, 8000, 1), MockSignal::Silence))
///     .build()
///     .unwrap();
/// assert_eq!(source.ports().output_count(), 1);
/// ```
pub struct MockSourceManager {
    ids: Vec<SourceId>,
    ports: Arc<PortTable>,
    generators: Vec<Generator>,
    frame_duration: Duration,
    frame_limit: Option<u64>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockSourceManager {
    /// Starts building a manager with 20 ms packets and no frame limit.
    pub fn builder() -> MockSourceManagerBuilder {
        MockSourceManagerBuilder {
            streams: Vec::new(),
            frame_duration: Duration::from_millis(20),
            frame_limit: None,
            queue: QueueConfig::default(),
        }
    }

    /// Writes a frame to an output port as if it arrived from the network.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotConnected`] if nothing consumes the port, or the
    /// queue's own error.
    pub fn inject(&self, port: PortId, frame: Frame) -> Result<WriteStatus, QueueError> {
        self.ports.write_frame(port, frame)
    }

    /// Generates the next packet of every stream without the pacing thread.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] after `start`, or if encoding fails.
    pub fn generate(&mut self, timestamp: Duration) -> Result<Vec<Frame>, PipelineError> {
        if self.handle.is_some() {
            return Err(PipelineError::Source("generator owned by the running thread".into()));
        }
        self.generators
            .iter_mut()
            .map(|g| g.next_frame(timestamp))
            .collect::<Result<_, _>>()
            .map_err(PipelineError::from)
    }
}

impl SourceManager for MockSourceManager {
    fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    fn stream_ids(&self) -> Vec<SourceId> {
        self.ids.clone()
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        if self.handle.is_some() || self.stop.load(Ordering::Acquire) {
            return Err(PipelineError::Source("mock source already started".into()));
        }
        let generators = std::mem::take(&mut self.generators);
        let ports = self.ports.clone();
        let stop = self.stop.clone();
        let frame_duration = self.frame_duration;
        let frame_limit = self.frame_limit;

        let handle = std::thread::Builder::new()
            .name("mock-source".to_string())
            .spawn(move || run(generators, &ports, &stop, frame_duration, frame_limit))
            .map_err(|e| PipelineError::Source(format!("failed to spawn mock source: {e}")))?;
        self.handle = Some(handle);
        tracing::info!(streams = self.ids.len(), "mock source started");
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("mock source thread panicked");
            }
            tracing::info!("mock source closed");
        }
        self.ports.close_outputs();
    }

    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
            && !self.stop.load(Ordering::Acquire)
    }
}

impl Drop for MockSourceManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(
    mut generators: Vec<Generator>,
    ports: &PortTable,
    stop: &AtomicBool,
    frame_duration: Duration,
    frame_limit: Option<u64>,
) {
    let started = Instant::now();
    let mut packet: u64 = 0;

    while !stop.load(Ordering::Acquire) && frame_limit.map_or(true, |limit| packet < limit) {
        let timestamp = frame_duration * packet as u32;
        for (port, generator) in generators.iter_mut().enumerate() {
            let frame = match generator.next_frame(timestamp) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(port, error = %e, "mock source failed to encode packet");
                    continue;
                }
            };
            match ports.write_frame(port, frame) {
                Ok(_) | Err(QueueError::NotConnected) => {}
                Err(e) => tracing::debug!(port, error = %e, "mock source write failed"),
            }
        }
        packet += 1;

        let next = started + frame_duration * packet as u32;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    if frame_limit.is_some_and(|limit| packet >= limit) {
        tracing::debug!(packets = packet, "mock source reached frame limit");
        ports.close_outputs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{create_decoder, CodecId};
    use crate::pipeline::connect_reader;

    fn stream(signal: MockSignal) -> MockStream {
        MockStream::new("s", CodecConfig::new(CodecId::Pcm, 8000, 1), signal)
    }

    fn decode(codec: CodecConfig, frame: &Frame) -> Vec<i16> {
        let mut decoder = create_decoder(&codec).unwrap();
        decoder
            .decode(frame)
            .unwrap()
            .to_interleaved_samples()
            .unwrap()
    }

    #[test]
    fn test_generate_packet_size_and_timestamp() {
        let codec = CodecConfig::new(CodecId::Pcmu, 8000, 2);
        let mut source = MockSourceManager::builder()
            .stream(MockStream::new("a", codec, MockSignal::Silence))
            .build()
            .unwrap();

        let frames = source.generate(Duration::from_millis(40)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 320);
        assert_eq!(frames[0].format(), codec.compressed_format());
        assert_eq!(frames[0].timestamp(), Duration::from_millis(40));
    }

    #[test]
    fn test_constant_signal_round_trips() {
        let mut source = MockSourceManager::builder()
            .stream(stream(MockSignal::Constant(1234)))
            .build()
            .unwrap();
        let frames = source.generate(Duration::ZERO).unwrap();
        let samples = decode(CodecConfig::new(CodecId::Pcm, 8000, 1), &frames[0]);
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|&s| s == 1234));
    }

    #[test]
    fn test_sine_is_continuous_across_packets() {
        let mut source = MockSourceManager::builder()
            .stream(stream(MockSignal::Sine {
                frequency: 50.0,
                amplitude: 1.0,
            }))
            .build()
            .unwrap();
        let codec = CodecConfig::new(CodecId::Pcm, 8000, 1);
        let first = decode(codec, &source.generate(Duration::ZERO).unwrap()[0]);
        let second = decode(codec, &source.generate(Duration::from_millis(20)).unwrap()[0]);
        // 50 Hz completes exactly one period per 20 ms packet.
        assert!(first
            .iter()
            .zip(&second)
            .all(|(a, b)| (i32::from(*a) - i32::from(*b)).abs() <= 1));
        assert!(first.iter().any(|&s| s > 30000));
        assert!(first.iter().any(|&s| s < -30000));
    }

    #[test]
    fn test_noise_is_deterministic() {
        let build = || {
            MockSourceManager::builder()
                .stream(stream(MockSignal::Noise { amplitude: 0.5 }))
                .build()
                .unwrap()
        };
        let a = build().generate(Duration::ZERO).unwrap();
        let b = build().generate(Duration::ZERO).unwrap();
        assert_eq!(a, b);
        let samples = decode(CodecConfig::new(CodecId::Pcm, 8000, 1), &a[0]);
        assert!(samples.iter().all(|&s| s.unsigned_abs() <= 16384));
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_inject_requires_connection() {
        let source = MockSourceManager::builder()
            .stream(stream(MockSignal::Silence))
            .build()
            .unwrap();
        let frame = Frame::new(vec![0; 4], Duration::ZERO, CodecConfig::new(CodecId::Pcm, 8000, 1).compressed_format());
        assert_eq!(source.inject(0, frame.clone()), Err(QueueError::NotConnected));

        let reader = connect_reader(source.ports(), 0).unwrap();
        assert_eq!(source.inject(0, frame), Ok(WriteStatus::Enqueued));
        assert!(reader.read_frame().is_some());
    }

    #[test]
    fn test_frame_limit_closes_outputs() {
        let mut source = MockSourceManager::builder()
            .stream(stream(MockSignal::Constant(1)))
            .frame_duration(Duration::from_millis(1))
            .frame_limit(5)
            .build()
            .unwrap();
        let reader = connect_reader(source.ports(), 0).unwrap();
        source.start().unwrap();

        let mut stamps = Vec::new();
        while !reader.is_finished() {
            if let Some(frame) = reader.wait_frame(Duration::from_millis(100)) {
                reader.remove_frame();
                stamps.push(frame.timestamp());
            }
        }
        let expected: Vec<Duration> = (0..5).map(Duration::from_millis).collect();
        assert_eq!(stamps, expected);
        source.close();
        assert!(!source.is_running());
    }

    #[test]
    fn test_start_twice_fails_and_close_is_idempotent() {
        let mut source = MockSourceManager::builder()
            .stream(stream(MockSignal::Silence))
            .build()
            .unwrap();
        source.start().unwrap();
        assert!(source.is_running());
        assert!(matches!(source.start(), Err(PipelineError::Source(_))));
        source.close();
        source.close();
        assert!(!source.is_running());
        assert!(source.start().is_err());
    }
}
