//! Tick-based N-input audio mixer.
//!
//! ```text
//! input 0 ─► ring 0 ─┐
//! input 1 ─► ring 1 ─┼─► sum/average + clamp ─► planar frame every tick
//! input N ─► ring N ─┘
//! ```
//!
//! Each step drains every bound input queue into that input's
//! [`AudioCircularBuffer`], then emits every tick that is due on the mixer's
//! [`Clock`]. An input with less than a tick buffered contributes silence
//! without consuming anything, so late audio is delayed rather than lost.

use std::sync::Arc;
use std::time::Duration;

use super::circular_buffer::AudioCircularBuffer;
use super::clock::{Clock, SystemClock};
use super::port::{FormatFilter, PortId, PortTable};
use super::processor::{Processor, StageContext, StepOutcome};
use crate::config::{MixPolicy, MixerConfig, QueueConfig};
use crate::error::{PipelineError, ProcessError, QueueError};
use crate::event::PipelineEvent;
use crate::frame::Frame;
use crate::pipeline::queue::WriteStatus;
use crate::stats::PipelineCounters;

/// Output port of the mixer.
pub const MIXER_OUTPUT: PortId = 0;

/// Participation of one mixer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Bound, waiting for its first full tick.
    Priming,
    /// Contributing to every tick, with silence on underrun.
    Active,
    /// Underran past the threshold; rejoins once a full tick is buffered.
    Inactive,
}

#[derive(Debug)]
struct MixerInput {
    state: InputState,
    buffer: AudioCircularBuffer,
    consecutive_underruns: u32,
    /// Queue finished; dropped once less than a tick remains.
    closed: bool,
}

/// Mixes up to [`MixerConfig::max_inputs`] PCM streams into one planar
/// stream in the canonical format.
///
/// Input ports accept PCM of any rate and channel count; each input is
/// converted on arrival. The output frame for tick `k` carries timestamp
/// `k × tick_duration`.
pub struct AudioMixer {
    name: String,
    ports: Arc<PortTable>,
    config: MixerConfig,
    samples_per_tick: usize,
    inputs: Vec<Option<MixerInput>>,
    clock: Arc<dyn Clock>,
    epoch: Option<Duration>,
    tick_index: u64,
    context: StageContext,
}

impl AudioMixer {
    /// Creates a mixer with `config.max_inputs` input ports and one output port.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidConfig`] if the configuration is unusable.
    pub fn new(
        name: impl Into<String>,
        config: MixerConfig,
        queue: QueueConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let name = name.into();
        let ports = PortTable::new(name.clone())
            .with_inputs(config.max_inputs, FormatFilter::AnyPcm)
            .with_output(config.format.planar(), queue);
        Ok(Self {
            name,
            ports: Arc::new(ports),
            samples_per_tick: config.samples_per_tick(),
            inputs: (0..config.max_inputs).map(|_| None).collect(),
            config,
            clock: Arc::new(SystemClock::new()),
            epoch: None,
            tick_index: 0,
            context: StageContext::default(),
        })
    }

    /// Replaces the clock ticks are scheduled on.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets where events and counters are reported.
    #[must_use]
    pub fn with_context(mut self, context: StageContext) -> Self {
        self.context = context;
        self
    }

    /// Index of the next tick to emit.
    pub fn tick_index(&self) -> u64 {
        self.tick_index
    }

    /// State of an input, `None` if nothing is bound there.
    pub fn input_state(&self, input: PortId) -> Option<InputState> {
        self.inputs.get(input)?.as_ref().map(|i| i.state)
    }

    /// Samples per channel buffered for an input.
    pub fn buffered(&self, input: PortId) -> usize {
        self.inputs
            .get(input)
            .and_then(Option::as_ref)
            .map_or(0, |i| i.buffer.available())
    }

    /// Moves every available frame from the input queues into the rings.
    /// Returns the number of frames ingested.
    fn ingest(&mut self) -> usize {
        let mut ingested = 0;
        for port in 0..self.inputs.len() {
            if !self.ports.is_input_bound(port) {
                continue;
            }
            let rebind = self.inputs[port].as_ref().map_or(true, |i| i.closed);
            if rebind {
                tracing::debug!(stage = %self.name, input = port, "input bound");
                self.inputs[port] = Some(MixerInput {
                    state: InputState::Priming,
                    buffer: AudioCircularBuffer::new(self.config.ring_capacity(), self.config.format),
                    consecutive_underruns: 0,
                    closed: false,
                });
            }

            while let Some(frame) = self.ports.read_frame(port) {
                self.ingest_frame(port, &frame);
                self.ports.remove_frame(port);
                ingested += 1;
            }

            if self.ports.release_finished_input(port) {
                if let Some(input) = self.inputs[port].as_mut() {
                    input.closed = true;
                }
                tracing::info!(stage = %self.name, input = port, "input disconnected");
                self.context
                    .emit(PipelineEvent::InputDisconnected { input: port });
            }
        }
        self.retire_closed_inputs();
        ingested
    }

    fn ingest_frame(&mut self, port: PortId, frame: &Frame) {
        let Some(input) = self.inputs[port].as_mut() else {
            return;
        };
        if !frame.format().is_pcm() {
            tracing::warn!(stage = %self.name, input = port, format = %frame.format(), "dropping non-PCM frame");
            PipelineCounters::add(&self.context.counters.frames_dropped, 1);
            return;
        }

        let report = input.buffer.write_frame(frame);
        if let Some(previous) = report.format_changed {
            tracing::info!(stage = %self.name, input = port, %previous, current = %frame.format(), "input format changed");
            self.context.emit(PipelineEvent::InputFormatChanged {
                input: port,
                previous,
                current: frame.format(),
            });
        }
        if report.dropped > 0 {
            tracing::debug!(stage = %self.name, input = port, dropped = report.dropped, "jitter buffer overflow");
            PipelineCounters::add(
                &self.context.counters.overflowed_samples,
                report.dropped as u64,
            );
            self.context.emit(PipelineEvent::InputOverflow {
                input: port,
                dropped_samples: report.dropped,
            });
        }
    }

    fn retire_closed_inputs(&mut self) {
        let samples_per_tick = self.samples_per_tick;
        for slot in &mut self.inputs {
            if slot
                .as_ref()
                .is_some_and(|i| i.closed && !i.buffer.has_tick(samples_per_tick))
            {
                *slot = None;
            }
        }
    }

    /// Produces the frame for the current tick and advances the tick index.
    fn mix_tick(&mut self) -> Frame {
        let n = self.samples_per_tick;
        let channels = self.config.format.channels as usize;
        let mut acc = vec![vec![0i32; n]; channels];
        let mut active = 0i32;

        for (port, slot) in self.inputs.iter_mut().enumerate() {
            let Some(input) = slot.as_mut() else {
                continue;
            };
            let has_tick = input.buffer.has_tick(n);
            match input.state {
                InputState::Active => {}
                InputState::Priming if has_tick => {
                    input.state = InputState::Active;
                    tracing::info!(stage = %self.name, input = port, "input active");
                    self.context.emit(PipelineEvent::InputActivated { input: port });
                }
                InputState::Inactive if has_tick => {
                    input.state = InputState::Active;
                    tracing::info!(stage = %self.name, input = port, "input resumed");
                    self.context.emit(PipelineEvent::InputResumed { input: port });
                }
                InputState::Priming | InputState::Inactive => continue,
            }
            active += 1;

            if has_tick {
                input.consecutive_underruns = 0;
                for (sum, plane) in acc.iter_mut().zip(input.buffer.read(n)) {
                    for (s, x) in sum.iter_mut().zip(plane) {
                        *s += i32::from(x);
                    }
                }
                continue;
            }

            // Underrun: silence stands in, nothing is consumed.
            input.consecutive_underruns += 1;
            PipelineCounters::add(&self.context.counters.underruns, 1);
            tracing::trace!(stage = %self.name, input = port, underruns = input.consecutive_underruns, "underrun");
            if input.consecutive_underruns > self.config.underrun_threshold {
                input.state = InputState::Inactive;
                tracing::warn!(stage = %self.name, input = port, underruns = input.consecutive_underruns, "input deactivated");
                self.context.emit(PipelineEvent::InputDeactivated {
                    input: port,
                    underruns: input.consecutive_underruns,
                });
            }
        }

        let divisor = match self.config.policy {
            MixPolicy::Sum => 1,
            MixPolicy::Average => active.max(1),
        };
        let planes: Vec<Vec<i16>> = acc
            .into_iter()
            .map(|plane| {
                plane
                    .into_iter()
                    .map(|s| (s / divisor).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
                    .collect()
            })
            .collect();

        let timestamp = Duration::from_nanos(
            (self.config.tick_duration.as_nanos() as u64).saturating_mul(self.tick_index),
        );
        self.tick_index += 1;
        self.retire_closed_inputs();
        Frame::from_planar_samples(&planes, timestamp, self.config.format.sample_rate)
    }

    fn emit_tick(&mut self) {
        let frame = self.mix_tick();
        PipelineCounters::add(&self.context.counters.ticks_mixed, 1);
        match self.ports.write_frame(MIXER_OUTPUT, frame) {
            Ok(WriteStatus::Enqueued) => {}
            Ok(WriteStatus::DroppedOldest) => {
                PipelineCounters::add(&self.context.counters.queue_overflows, 1);
                self.context.emit(PipelineEvent::QueueOverflow {
                    stage: self.name.clone(),
                    port: MIXER_OUTPUT,
                });
            }
            Err(QueueError::NotConnected) => {
                tracing::trace!(stage = %self.name, "no consumer, mixed frame discarded");
            }
            Err(err) => {
                tracing::debug!(stage = %self.name, error = %err, "mixed frame discarded");
            }
        }
    }

    /// Ticks whose interval has fully elapsed and that were not emitted yet.
    fn ticks_due(&mut self) -> u64 {
        let now = self.clock.now();
        let epoch = *self.epoch.get_or_insert(now);
        let tick = self.config.tick_duration.as_nanos().max(1);
        let elapsed_ticks = (now.saturating_sub(epoch).as_nanos() / tick) as u64;
        elapsed_ticks.saturating_sub(self.tick_index)
    }
}

impl Processor for AudioMixer {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    fn step(&mut self) -> Result<StepOutcome, ProcessError> {
        let ingested = self.ingest();

        let mut due = self.ticks_due();
        let max = u64::from(self.config.max_catch_up_ticks);
        if due > max {
            let skipped = due - max;
            tracing::warn!(stage = %self.name, skipped, "mixer fell behind, skipping ticks");
            PipelineCounters::add(&self.context.counters.ticks_skipped, skipped);
            self.tick_index += skipped;
            due = max;
        }
        for _ in 0..due {
            self.emit_tick();
        }

        if ingested > 0 || due > 0 {
            Ok(StepOutcome::Progress)
        } else {
            Ok(StepOutcome::Idle)
        }
    }

    fn drain_step(&mut self) -> Result<StepOutcome, ProcessError> {
        self.ingest();
        let n = self.samples_per_tick;
        let pending = self
            .inputs
            .iter()
            .flatten()
            .any(|i| i.buffer.has_tick(n));
        if pending {
            self.emit_tick();
            Ok(StepOutcome::Progress)
        } else {
            Ok(StepOutcome::Idle)
        }
    }

    fn wait_for_input(&self, timeout: Duration) {
        let until_next_tick = self.epoch.map_or(timeout, |epoch| {
            let next = epoch
                + Duration::from_nanos(
                    (self.config.tick_duration.as_nanos() as u64)
                        .saturating_mul(self.tick_index + 1),
                );
            next.saturating_sub(self.clock.now())
        });
        std::thread::sleep(until_next_tick.min(timeout));
    }

    fn on_stop(&mut self) {
        tracing::debug!(stage = %self.name, ticks = self.tick_index, "mixer stopped");
    }
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("name", &self.name)
            .field("tick_index", &self.tick_index)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}
