//! One OS thread driving one processor.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::port::PortTable;
use super::processor::{Processor, StageContext, StepOutcome};
use crate::config::WorkerConfig;
use crate::error::{PipelineError, ProcessError};
use crate::event::PipelineEvent;
use crate::stats::PipelineCounters;

/// Lifecycle of a [`Worker`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Created, thread not spawned.
    Idle = 0,
    /// Stepping the processor.
    Running = 1,
    /// Stop requested, draining.
    Stopping = 2,
    /// Thread finished.
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Shared {
    state: AtomicU8,
    steps: AtomicU64,
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Runs a [`Processor`] on a dedicated thread.
///
/// The stop flag is only checked between steps, so a step in progress always
/// completes. After a stop request the worker runs up to
/// [`WorkerConfig::drain_steps`] progressing drain steps, calls
/// [`Processor::on_stop`], closes the stage's outputs and becomes
/// [`WorkerState::Stopped`]. A worker cannot be restarted.
pub struct Worker {
    name: String,
    ports: Arc<PortTable>,
    shared: Arc<Shared>,
    processor: Option<Box<dyn Processor>>,
    handle: Option<JoinHandle<()>>,
    config: WorkerConfig,
    context: StageContext,
}

impl Worker {
    /// Creates an idle worker for `processor`.
    pub fn new(processor: impl Processor + 'static, config: WorkerConfig) -> Self {
        Self::from_boxed(Box::new(processor), config)
    }

    /// Creates an idle worker for an already boxed processor.
    pub fn from_boxed(processor: Box<dyn Processor>, config: WorkerConfig) -> Self {
        Self {
            name: processor.name().to_string(),
            ports: processor.ports().clone(),
            shared: Arc::new(Shared {
                state: AtomicU8::new(WorkerState::Idle as u8),
                steps: AtomicU64::new(0),
            }),
            processor: Some(processor),
            handle: None,
            config,
            context: StageContext::default(),
        }
    }

    /// Sets where dropped-frame and stop events are reported.
    #[must_use]
    pub fn with_context(mut self, context: StageContext) -> Self {
        self.context = context;
        self
    }

    /// Name of the processor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ports of the processor, usable while it runs.
    pub fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Steps completed so far.
    pub fn steps(&self) -> u64 {
        self.shared.steps.load(Ordering::Relaxed)
    }

    /// Spawns the thread and moves to [`WorkerState::Running`].
    ///
    /// # Errors
    ///
    /// [`PipelineError::WorkerState`] unless idle, [`PipelineError::WorkerSpawn`]
    /// if the thread cannot be created.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let state = self.state();
        let processor = match (state, self.processor.take()) {
            (WorkerState::Idle, Some(processor)) => processor,
            (_, processor) => {
                self.processor = processor;
                return Err(PipelineError::WorkerState {
                    stage: self.name.clone(),
                    state: state.to_string(),
                });
            }
        };

        self.shared.set(WorkerState::Running);
        let shared = self.shared.clone();
        let config = self.config;
        let context = self.context.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("worker-{}", self.name))
            .spawn(move || run(processor, shared, config, context));

        match spawned {
            Ok(handle) => {
                tracing::debug!(stage = %self.name, "worker started");
                self.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.shared.set(WorkerState::Stopped);
                Err(PipelineError::WorkerSpawn {
                    stage: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Requests a stop. Returns immediately; use [`join`](Self::join) to wait.
    ///
    /// An idle worker goes straight to [`WorkerState::Stopped`].
    pub fn stop(&self) {
        if self.shared.transition(WorkerState::Running, WorkerState::Stopping) {
            tracing::debug!(stage = %self.name, "worker stop requested");
        } else if self.shared.transition(WorkerState::Idle, WorkerState::Stopped) {
            tracing::debug!(stage = %self.name, "idle worker stopped");
        }
    }

    /// Waits for the thread to finish.
    ///
    /// # Errors
    ///
    /// [`PipelineError::WorkerPanicked`] if the processor panicked.
    pub fn join(&mut self) -> Result<(), PipelineError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.join().map_err(|_| {
            self.shared.set(WorkerState::Stopped);
            PipelineError::WorkerPanicked {
                stage: self.name.clone(),
            }
        })
    }

    /// Stops and waits.
    pub fn stop_and_join(&mut self) -> Result<(), PipelineError> {
        self.stop();
        self.join()
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("steps", &self.steps())
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            let _ = self.join();
        }
    }
}

fn report_frame_error(context: &StageContext, err: &ProcessError) {
    if let ProcessError::Frame { stage, reason } = err {
        tracing::warn!(stage = %stage, reason = %reason, "frame dropped");
        PipelineCounters::add(&context.counters.frames_dropped, 1);
        context.emit(PipelineEvent::FrameDropped {
            stage: stage.clone(),
            reason: reason.clone(),
        });
    }
}

fn run(
    mut processor: Box<dyn Processor>,
    shared: Arc<Shared>,
    config: WorkerConfig,
    context: StageContext,
) {
    let name = processor.name().to_string();
    let mut reason = "stopped".to_string();

    while shared.state() == WorkerState::Running {
        match processor.step() {
            Ok(StepOutcome::Progress) => {}
            Ok(StepOutcome::Idle) => processor.wait_for_input(config.idle_wait),
            Err(err @ ProcessError::Frame { .. }) => report_frame_error(&context, &err),
            Err(err) => {
                tracing::error!(stage = %name, error = %err, "worker failed");
                reason = err.to_string();
                break;
            }
        }
        shared.steps.fetch_add(1, Ordering::Relaxed);
    }

    if shared.state() == WorkerState::Stopping {
        let mut drained = 0;
        while drained < config.drain_steps {
            match processor.drain_step() {
                Ok(StepOutcome::Progress) => drained += 1,
                Ok(StepOutcome::Idle) => break,
                Err(err @ ProcessError::Frame { .. }) => {
                    report_frame_error(&context, &err);
                    drained += 1;
                }
                Err(err) => {
                    tracing::error!(stage = %name, error = %err, "drain failed");
                    break;
                }
            }
        }
        tracing::debug!(stage = %name, drained, "worker drained");
    }

    processor.on_stop();
    processor.ports().close_outputs();
    shared.set(WorkerState::Stopped);
    tracing::info!(stage = %name, reason = %reason, "worker stopped");
    context.emit(PipelineEvent::WorkerStopped {
        stage: name,
        reason,
    });
}
