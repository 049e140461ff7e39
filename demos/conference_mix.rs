//! Conference mixing example.
//!
//! Mixes two synthetic participants (one silent, one speaking a tone) into a
//! single µ-law stream, written both raw and as WAV.
//!
//! Run with: cargo run --example conference_mix [seconds]
//!
//! With the `opus` feature the participants arrive as 48kHz stereo Opus:
//! cargo run --example conference_mix --features opus
//!
//! Stops after the given number of seconds (default 5) or on Ctrl+C.

use std::time::Duration;

use stream_mixer::{
    CodecConfig, CodecId, FileSink, FormatPreset, MockSignal, MockSourceManager, MockStream,
    PipelineBuilder, PipelineEvent,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn participant_codec() -> CodecConfig {
    if cfg!(feature = "opus") {
        CodecConfig::new(CodecId::Opus, 48000, 2).with_bitrate(64_000)
    } else {
        CodecConfig::new(CodecId::Pcmu, 8000, 1)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(5);

    let codec = participant_codec();
    let source = MockSourceManager::builder()
        .stream(MockStream::new("alice", codec, MockSignal::Silence))
        .stream(MockStream::new(
            "bob",
            codec,
            MockSignal::Sine {
                frequency: 440.0,
                amplitude: 0.5,
            },
        ))
        .build()?;

    let pipeline = PipelineBuilder::new()
        .source_manager(source)
        .format(FormatPreset::Conference)
        .encoder(CodecConfig::new(CodecId::Pcmu, 48000, 2))
        .add_sink(FileSink::raw("coded.ulaw"))
        .add_sink(FileSink::wav("mix.wav"))
        .on_event(|event| match event {
            PipelineEvent::InputActivated { input } => println!("input {input} joined the mix"),
            PipelineEvent::InputDeactivated { input, underruns } => {
                println!("input {input} left the mix after {underruns} empty ticks");
            }
            other => tracing::debug!(?other, "pipeline event"),
        })
        .start()
        .await?;

    println!("Mixing {:?} for {seconds}s into coded.ulaw and mix.wav...", pipeline.stream_ids());
    println!("Press Ctrl+C to stop early.");

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => println!("\nCtrl+C received, draining..."),
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        }
        trigger.cancel();
    });

    let stats = pipeline.run_until(stop).await?;
    println!("Stats: {stats:?}");

    Ok(())
}
