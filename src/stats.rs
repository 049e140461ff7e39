//! Counters shared by every stage of a pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about a running pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames decoded by all decoder stages.
    pub frames_decoded: u64,
    /// Frames dropped by any stage (codec failures, closed queues).
    pub frames_dropped: u64,
    /// Frames evicted from full queues.
    pub queue_overflows: u64,
    /// Ticks emitted by the mixer.
    pub ticks_mixed: u64,
    /// Input-ticks filled with silence because a buffer ran dry.
    pub underruns: u64,
    /// Samples per channel dropped from full jitter buffers.
    pub overflowed_samples: u64,
    /// Ticks skipped because the mixer fell too far behind.
    pub ticks_skipped: u64,
    /// Frames encoded by the encoder stage.
    pub frames_encoded: u64,
    /// Frames handed to the sinks.
    pub frames_delivered: u64,
}

/// Internal counters shared between the pipeline handle and its workers.
#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub frames_decoded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub queue_overflows: AtomicU64,
    pub ticks_mixed: AtomicU64,
    pub underruns: AtomicU64,
    pub overflowed_samples: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_delivered: AtomicU64,
}

impl PipelineCounters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            ticks_mixed: self.ticks_mixed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            overflowed_samples: self.overflowed_samples.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = PipelineCounters::default();
        PipelineCounters::add(&counters.ticks_mixed, 3);
        PipelineCounters::add(&counters.underruns, 1);
        let stats = counters.snapshot();
        assert_eq!(stats.ticks_mixed, 3);
        assert_eq!(stats.underruns, 1);
        assert_eq!(stats.frames_delivered, 0);
    }
}
