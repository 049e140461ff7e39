//! Configuration types for the pipeline.

use std::time::Duration;

use crate::error::PipelineError;
use crate::frame::StreamFormat;

/// Preset canonical formats for the mixer.
///
/// Every input is converted to the canonical format before mixing, and the
/// mixer emits frames in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatPreset {
    /// 48kHz stereo - full-band conferencing, matches Opus' native rate.
    #[default]
    Conference,

    /// 16kHz mono - wideband speech, cheaper to mix and encode.
    Wideband,
}

impl FormatPreset {
    /// Returns the canonical format for this preset.
    #[must_use]
    pub fn format(&self) -> CanonicalFormat {
        match self {
            Self::Conference => CanonicalFormat::new(48000, 2),
            Self::Wideband => CanonicalFormat::new(16000, 1),
        }
    }
}

/// Sample rate and channel count the mixer works in. Samples are always S16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
}

impl CanonicalFormat {
    /// Creates a canonical format.
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Planar stream format emitted by the mixer.
    pub fn planar(&self) -> StreamFormat {
        StreamFormat::planar(self.sample_rate, self.channels)
    }

    /// Samples per channel covering `duration`.
    pub fn samples_in(&self, duration: Duration) -> usize {
        (u128::from(self.sample_rate) * duration.as_nanos() / 1_000_000_000) as usize
    }
}

impl Default for CanonicalFormat {
    fn default() -> Self {
        FormatPreset::default().format()
    }
}

impl From<FormatPreset> for CanonicalFormat {
    fn from(preset: FormatPreset) -> Self {
        preset.format()
    }
}

/// What a full queue does with a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest frame. Writers never wait.
    #[default]
    DropOldest,

    /// Wait up to `timeout` for a reader to free a slot, then fail the write.
    ///
    /// Intended for offline processing and tests, not live paths.
    Block {
        /// Longest time a write may wait.
        timeout: Duration,
    },
}

/// Configuration for a frame queue created by `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum frames held.
    ///
    /// Default: 16
    pub capacity: usize,

    /// Behavior when the queue is full.
    ///
    /// Default: [`OverflowPolicy::DropOldest`]
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// How the mixer combines the active inputs of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixPolicy {
    /// Sum the inputs and clamp to the S16 range.
    ///
    /// Silence from one party never attenuates another.
    #[default]
    Sum,

    /// Sum, divide by the number of active inputs, then clamp.
    ///
    /// Never clips, but every party gets quieter as others join.
    Average,
}

/// Configuration for [`AudioMixer`](crate::pipeline::AudioMixer).
///
/// # Example
///
/// ```
/// use stream_mixer::{FormatPreset, MixPolicy, MixerConfig};
/// use std::time::Duration;
///
/// let config = MixerConfig {
///     format: FormatPreset::Wideband.format(),
///     policy: MixPolicy::Average,
///     tick_duration: Duration::from_millis(10),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerConfig {
    /// Number of mixer input ports.
    ///
    /// Default: 4
    pub max_inputs: usize,

    /// Format inputs are converted to and the mix is emitted in.
    ///
    /// Default: 48kHz stereo
    pub format: CanonicalFormat,

    /// Duration of audio in each mixed frame.
    ///
    /// Default: 20ms
    pub tick_duration: Duration,

    /// Jitter buffer capacity per input, in samples per channel.
    ///
    /// Raised to two ticks if smaller. Default: 3000
    pub jitter_buffer_samples: usize,

    /// Consecutive underrun ticks tolerated before an input is deactivated.
    ///
    /// Default: 50 (one second at 20ms ticks)
    pub underrun_threshold: u32,

    /// Gain policy.
    ///
    /// Default: [`MixPolicy::Sum`]
    pub policy: MixPolicy,

    /// Most ticks emitted by one step when the mixer falls behind.
    ///
    /// Further overdue ticks are skipped. Default: 5
    pub max_catch_up_ticks: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            max_inputs: 4,
            format: CanonicalFormat::default(),
            tick_duration: Duration::from_millis(20),
            jitter_buffer_samples: 3000,
            underrun_threshold: 50,
            policy: MixPolicy::Sum,
            max_catch_up_ticks: 5,
        }
    }
}

impl MixerConfig {
    /// Samples per channel in one tick.
    pub fn samples_per_tick(&self) -> usize {
        self.format.samples_in(self.tick_duration)
    }

    /// Effective per-input ring capacity.
    pub fn ring_capacity(&self) -> usize {
        self.jitter_buffer_samples.max(2 * self.samples_per_tick())
    }

    /// Checks every value is usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_inputs == 0 {
            return Err(PipelineError::InvalidConfig(
                "mixer needs at least one input".to_string(),
            ));
        }
        if self.format.sample_rate == 0 || self.format.channels == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "canonical format {}Hz/{}ch is empty",
                self.format.sample_rate, self.format.channels
            )));
        }
        if self.samples_per_tick() == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "tick of {:?} holds no samples at {}Hz",
                self.tick_duration, self.format.sample_rate
            )));
        }
        if self.max_catch_up_ticks == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_catch_up_ticks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`Worker`](crate::pipeline::Worker) thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Longest wait when a step made no progress.
    ///
    /// Default: 5ms
    pub idle_wait: Duration,

    /// Most progressing drain steps run after a stop request.
    ///
    /// Default: 256
    pub drain_steps: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(5),
            drain_steps: 256,
        }
    }
}

/// Configuration for a whole pipeline.
///
/// Use [`PipelineConfig::default()`] for sensible defaults, or customize as needed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    /// Mixer settings, including the canonical format.
    pub mixer: MixerConfig,

    /// Settings for every queue the builder creates.
    pub queue: QueueConfig,

    /// Settings for every worker the builder starts.
    pub worker: WorkerConfig,

    /// Sink routing settings.
    pub router: RouterConfig,
}

impl PipelineConfig {
    /// Checks every value is usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.mixer.validate()?;
        if self.queue.capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for delivering output frames to sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Sleep between polls of the output queue when it is empty.
    ///
    /// Default: 1ms
    pub poll_interval: Duration,

    /// Number of retry attempts for failed sink writes.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,

    /// Initial delay between sink retry attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt).
    /// Default: 100ms
    pub sink_retry_delay: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            sink_retry_attempts: 3,
            sink_retry_delay: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_preset_conference() {
        let format = FormatPreset::Conference.format();
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(format.channels, 2);
    }

    #[test]
    fn test_format_preset_wideband() {
        let format = FormatPreset::Wideband.format();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.channels, 1);
    }

    #[test]
    fn test_format_preset_default() {
        assert_eq!(FormatPreset::default(), FormatPreset::Conference);
    }

    #[test]
    fn test_mixer_config_defaults() {
        let config = MixerConfig::default();
        assert_eq!(config.max_inputs, 4);
        assert_eq!(config.tick_duration, Duration::from_millis(20));
        assert_eq!(config.samples_per_tick(), 960);
        assert_eq!(config.ring_capacity(), 3000);
        assert_eq!(config.policy, MixPolicy::Sum);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ring_capacity_at_least_two_ticks() {
        let config = MixerConfig {
            jitter_buffer_samples: 100,
            ..Default::default()
        };
        assert_eq!(config.ring_capacity(), 1920);
    }

    #[test]
    fn test_mixer_config_rejects_empty_tick() {
        let config = MixerConfig {
            format: CanonicalFormat::new(8000, 1),
            tick_duration: Duration::from_micros(100),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_pipeline_config_rejects_zero_capacity() {
        let config = PipelineConfig {
            queue: QueueConfig {
                capacity: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_router_config_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.sink_retry_attempts, 3);
        assert_eq!(config.sink_retry_delay, Duration::from_millis(100));
    }
}
