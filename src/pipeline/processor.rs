//! The unit of work a [`Worker`](super::Worker) drives.

use std::sync::Arc;
use std::time::Duration;

use super::port::PortTable;
use crate::error::ProcessError;
use crate::event::{EventCallback, PipelineEvent};
use crate::stats::PipelineCounters;

/// What a single step accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Frames were consumed or produced.
    Progress,
    /// Nothing to do; the worker may wait before the next step.
    Idle,
}

/// A pipeline stage driven one step at a time by a worker thread.
///
/// A step never blocks indefinitely. Per-frame failures are reported as
/// [`ProcessError::Frame`] and the worker keeps stepping.
pub trait Processor: Send {
    /// Stage name for logs and events.
    fn name(&self) -> &str;

    /// The stage's ports.
    fn ports(&self) -> &Arc<PortTable>;

    /// Consumes available input and produces available output.
    fn step(&mut self) -> Result<StepOutcome, ProcessError>;

    /// Step run after a stop request. Defaults to [`step`](Self::step).
    ///
    /// Returning [`StepOutcome::Idle`] ends the drain.
    fn drain_step(&mut self) -> Result<StepOutcome, ProcessError> {
        self.step()
    }

    /// Waits up to `timeout` for work after an idle step.
    fn wait_for_input(&self, timeout: Duration) {
        std::thread::sleep(timeout);
    }

    /// Called once on the worker thread after the last step.
    fn on_stop(&mut self) {}
}

/// Shared handles a stage reports through.
#[derive(Clone, Default)]
pub struct StageContext {
    events: Option<EventCallback>,
    pub(crate) counters: Arc<PipelineCounters>,
}

impl StageContext {
    /// Creates a context delivering events to `events`.
    pub fn new(events: Option<EventCallback>) -> Self {
        Self {
            events,
            counters: Arc::default(),
        }
    }

    pub(crate) fn with_counters(events: Option<EventCallback>, counters: Arc<PipelineCounters>) -> Self {
        Self { events, counters }
    }

    /// Delivers an event if a callback is registered.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }

    /// Snapshot of the shared counters.
    pub fn stats(&self) -> crate::PipelineStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}
