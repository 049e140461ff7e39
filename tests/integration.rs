//! Integration tests for stream-mixer.
//!
//! End-to-end runs use real threads and the system clock, so they assert
//! properties that hold regardless of scheduling rather than exact output.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use stream_mixer::format::{bytes_to_samples, samples_to_bytes};
use stream_mixer::pipeline::{
    connect, connect_reader, AudioMixer, DecoderStage, ManualClock, PcmLayout, PortTable,
    Processor, Reader, StepOutcome, Worker, WorkerState, DECODER_INPUT, DECODER_OUTPUT,
    MIXER_OUTPUT,
};
use stream_mixer::{
    CanonicalFormat, ChannelSink, CodecConfig, CodecId, ConnectionError, FileSink, Frame,
    MixerConfig, MockSignal, MockSourceManager, MockStream, PipelineBuilder, PipelineConfig,
    PipelineEvent, QueueConfig, Sink, SinkError, StreamFormat, WorkerConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RATE: u32 = 8000;

fn pcm() -> CodecConfig {
    CodecConfig::new(CodecId::Pcm, RATE, 1)
}

fn narrowband_config() -> PipelineConfig {
    PipelineConfig {
        mixer: MixerConfig {
            format: CanonicalFormat::new(RATE, 1),
            ..MixerConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn constant_source(levels: &[i16]) -> MockSourceManager {
    let mut builder = MockSourceManager::builder();
    for (i, &level) in levels.iter().enumerate() {
        builder = builder.stream(MockStream::new(format!("p{i}"), pcm(), MockSignal::Constant(level)));
    }
    builder.build().unwrap()
}

fn drain(reader: &Reader) -> Vec<Arc<Frame>> {
    let mut frames = Vec::new();
    while let Some(frame) = reader.read_frame() {
        reader.remove_frame();
        frames.push(frame);
    }
    frames
}

/// A test sink that counts writes.
struct CountingSink {
    name: String,
    count: AtomicUsize,
}

#[async_trait]
impl Sink for CountingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, _frame: Arc<Frame>) -> Result<(), SinkError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_inputs_end_to_end() {
    let (tx, mut rx) = mpsc::channel(1024);
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();

    let pipeline = PipelineBuilder::new()
        .source_manager(constant_source(&[1000, 2000]))
        .with_config(narrowband_config())
        .encoder(pcm())
        .add_sink(ChannelSink::new(tx))
        .on_event(move |e| seen.lock().push(e))
        .start()
        .await
        .unwrap();

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        trigger.cancel();
    });
    let stats = pipeline.run_until(stop).await.unwrap();

    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    assert!(frames.len() >= 5, "only {} frames delivered", frames.len());
    assert_eq!(stats.frames_delivered, frames.len() as u64);

    let allowed = [0, 1000, 2000, 3000];
    let mut saw_both = false;
    for frame in &frames {
        assert_eq!(frame.format(), StreamFormat::compressed(CodecId::Pcm, RATE, 1));
        let samples = bytes_to_samples(frame.data());
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|&s| s == samples[0]), "tick mixed partial input");
        assert!(allowed.contains(&samples[0]), "unexpected level {}", samples[0]);
        saw_both |= samples[0] == 3000;
    }
    assert!(saw_both, "both inputs never mixed together");

    let timestamps: Vec<Duration> = frames.iter().map(|f| f.timestamp()).collect();
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

    let events = events.lock();
    let activated: HashSet<usize> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::InputActivated { input } => Some(*input),
            _ => None,
        })
        .collect();
    assert_eq!(activated, HashSet::from([0, 1]));
}

#[tokio::test]
async fn test_wav_file_from_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mix.wav");

    let pipeline = PipelineBuilder::new()
        .source_manager(constant_source(&[500]))
        .with_config(narrowband_config())
        .encoder(pcm())
        .add_sink(FileSink::wav(&path))
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.stop().await.unwrap();

    let data = std::fs::read(&path).unwrap();
    assert_eq!(&data[0..4], b"RIFF");
    let data_size = u32::from_le_bytes([data[40], data[41], data[42], data[43]]) as usize;
    assert_eq!(data.len(), 44 + data_size);
    // Whole ticks only.
    assert_eq!(data_size % 320, 0);
}

#[tokio::test]
async fn test_runtime_add_input() {
    let sink = Arc::new(CountingSink {
        name: "count".to_string(),
        count: AtomicUsize::new(0),
    });
    let mut pipeline = PipelineBuilder::new()
        .source_manager(constant_source(&[1, 2, 3]))
        .with_config(narrowband_config())
        .encoder(pcm())
        .add_input(0)
        .add_shared_sink(sink.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(pipeline.input_count(), 1);
    assert_eq!(pipeline.add_input(2).unwrap(), 1);
    assert!(matches!(
        pipeline.add_input(2),
        Err(stream_mixer::PipelineError::Connection(ConnectionError::PortAlreadyBound { .. }))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = pipeline.stop().await.unwrap();
    assert_eq!(sink.count.load(Ordering::SeqCst) as u64, stats.frames_delivered);
}

#[tokio::test]
async fn test_run_ends_when_source_stops() {
    let source = MockSourceManager::builder()
        .stream(MockStream::new("short", pcm(), MockSignal::Constant(700)))
        .frame_duration(Duration::from_millis(5))
        .frame_limit(5)
        .build()
        .unwrap();
    let (tx, mut rx) = mpsc::channel(1024);
    let pipeline = PipelineBuilder::new()
        .source_manager(source)
        .with_config(narrowband_config())
        .encoder(pcm())
        .add_sink(ChannelSink::new(tx))
        .start()
        .await
        .unwrap();

    let stop = CancellationToken::new();
    let stats = tokio::time::timeout(Duration::from_secs(2), pipeline.run_until(stop.clone()))
        .await
        .expect("pipeline kept running after its source ended")
        .unwrap();

    assert!(!stop.is_cancelled());
    assert_eq!(stats.frames_decoded, 5);
    // 25ms of input plus the polling slack, far from the 2s bound.
    assert!(stats.ticks_mixed < 50, "mixed {} ticks", stats.ticks_mixed);

    let mut delivered = 0;
    while rx.try_recv().is_ok() {
        delivered += 1;
    }
    assert_eq!(delivered as u64, stats.frames_delivered);
}

#[test]
fn test_order_preserved_through_decoder_worker() {
    let codec = pcm();
    let queue = QueueConfig {
        capacity: 128,
        ..QueueConfig::default()
    };
    let source = PortTable::new("source").with_output(codec.compressed_format(), queue);
    let decoder = DecoderStage::new("decoder", &codec, PcmLayout::Interleaved, queue).unwrap();
    connect(&source, 0, decoder.ports(), DECODER_INPUT).unwrap();
    let out = connect_reader(decoder.ports(), DECODER_OUTPUT).unwrap();

    let mut worker = Worker::new(decoder, WorkerConfig::default());
    worker.start().unwrap();
    for i in 0..100i16 {
        let frame = Frame::new(
            samples_to_bytes(&[i; 4]),
            Duration::from_millis(i as u64),
            codec.compressed_format(),
        );
        source.write_frame(0, frame).unwrap();
    }
    source.close_outputs();
    worker.stop_and_join().unwrap();

    let values: Vec<i16> = drain(&out)
        .iter()
        .map(|f| f.to_interleaved_samples().unwrap()[0])
        .collect();
    assert_eq!(values, (0..100).collect::<Vec<i16>>());
    assert!(out.is_finished());
}

#[test]
fn test_shutdown_drains_buffered_ticks_once() {
    let clock = Arc::new(ManualClock::new());
    let config = MixerConfig {
        max_inputs: 2,
        format: CanonicalFormat::new(RATE, 1),
        tick_duration: Duration::from_millis(10),
        jitter_buffer_samples: 1000,
        ..MixerConfig::default()
    };
    let mixer = AudioMixer::new("mixer", config, QueueConfig::default())
        .unwrap()
        .with_clock(clock);
    let feeder = PortTable::new("feeder").with_output(StreamFormat::planar(RATE, 1), QueueConfig::default());
    connect(&feeder, 0, mixer.ports(), 0).unwrap();
    let out = connect_reader(mixer.ports(), MIXER_OUTPUT).unwrap();

    for i in 0..5i16 {
        let frame = Frame::from_planar_samples(&[vec![i * 100 + 1; 80]], Duration::from_millis(i as u64 * 10), RATE);
        feeder.write_frame(0, frame).unwrap();
    }

    let mut worker = Worker::new(mixer, WorkerConfig::default());
    worker.start().unwrap();
    worker.stop_and_join().unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);

    let frames = drain(&out);
    let levels: Vec<i16> = frames
        .iter()
        .map(|f| f.to_planar_samples().unwrap()[0][0])
        .collect();
    assert_eq!(levels, vec![1, 101, 201, 301, 401]);
    let stamps: Vec<Duration> = frames.iter().map(|f| f.timestamp()).collect();
    let expected: Vec<Duration> = (0..5).map(|i| Duration::from_millis(i * 10)).collect();
    assert_eq!(stamps, expected);
    assert!(out.is_finished());
}

#[test]
fn test_silent_and_sine_mix_to_sine() {
    let clock = Arc::new(ManualClock::new());
    let config = MixerConfig {
        max_inputs: 2,
        format: CanonicalFormat::new(RATE, 1),
        tick_duration: Duration::from_millis(20),
        ..MixerConfig::default()
    };
    let mut mixer = AudioMixer::new("mixer", config, QueueConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    let a = PortTable::new("a").with_output(StreamFormat::interleaved(RATE, 1), QueueConfig::default());
    let b = PortTable::new("b").with_output(StreamFormat::interleaved(RATE, 1), QueueConfig::default());
    connect(&a, 0, mixer.ports(), 0).unwrap();
    connect(&b, 0, mixer.ports(), 1).unwrap();
    let out = connect_reader(mixer.ports(), MIXER_OUTPUT).unwrap();

    let sine: Vec<i16> = (0..160)
        .map(|n| ((2.0 * std::f64::consts::PI * n as f64 / 40.0).sin() * 32767.0) as i16)
        .collect();
    a.write_frame(0, Frame::from_samples(&[0; 160], Duration::ZERO, RATE, 1)).unwrap();
    b.write_frame(0, Frame::from_samples(&sine, Duration::ZERO, RATE, 1)).unwrap();

    assert_eq!(mixer.step().unwrap(), StepOutcome::Progress);
    clock.advance(Duration::from_millis(20));
    mixer.step().unwrap();

    let frames = drain(&out);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].to_planar_samples().unwrap()[0], sine);
}

#[test]
fn test_connect_twice_keeps_one_queue() {
    let codec = pcm();
    let source = PortTable::new("source").with_output(codec.compressed_format(), QueueConfig::default());
    let first = DecoderStage::new("first", &codec, PcmLayout::Planar, QueueConfig::default()).unwrap();
    let second = DecoderStage::new("second", &codec, PcmLayout::Planar, QueueConfig::default()).unwrap();

    connect(&source, 0, first.ports(), DECODER_INPUT).unwrap();
    assert!(matches!(
        connect(&source, 0, second.ports(), DECODER_INPUT),
        Err(ConnectionError::PortAlreadyBound { .. })
    ));
    assert!(matches!(
        connect(&source, 0, first.ports(), DECODER_INPUT),
        Err(ConnectionError::PortAlreadyBound { .. })
    ));

    let frame = Frame::new(vec![0; 4], Duration::ZERO, codec.compressed_format());
    source.write_frame(0, frame).unwrap();
    assert!(first.ports().read_frame(DECODER_INPUT).is_some());
    assert!(!second.ports().is_input_bound(DECODER_INPUT));
}

#[tokio::test]
async fn test_multiple_sinks_receive_same_frame() {
    let (tx1, mut rx1) = mpsc::channel(4);
    let (tx2, mut rx2) = mpsc::channel(4);
    let sink1 = ChannelSink::with_name("one", tx1);
    let sink2 = ChannelSink::with_name("two", tx2);

    let frame = Arc::new(Frame::from_samples(&[1, 2, 3], Duration::ZERO, RATE, 1));
    sink1.write(frame.clone()).await.unwrap();
    sink2.write(frame.clone()).await.unwrap();

    assert!(Arc::ptr_eq(&rx1.recv().await.unwrap(), &frame));
    assert!(Arc::ptr_eq(&rx2.recv().await.unwrap(), &frame));
}
