//! Bounded frame queue with one writer and independent reader cursors.
//!
//! ```text
//! Writer ──write_frame──► [f3 f4 f5 f6] ──read_frame/remove_frame──► Reader A
//!                               └────────────────────────────────► Reader B
//! ```
//!
//! Every reader sees every retained frame in order. A slot is freed once all
//! registered readers have removed it. Bookkeeping lives behind one short
//! mutex; a condvar wakes readers on writes and blocked writers on removals.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{OverflowPolicy, QueueConfig};
use crate::error::QueueError;
use crate::frame::Frame;

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The frame was appended.
    Enqueued,
    /// The queue was full; the oldest frame was evicted to make room.
    DroppedOldest,
}

#[derive(Debug, Default)]
struct Cursor {
    /// Sequence number of the next frame this reader has not removed.
    next: u64,
    /// Frame handed out by the last `read_frame`, not yet removed.
    pending: Option<u64>,
}

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<Arc<Frame>>,
    /// Sequence number of `frames[0]`.
    head_seq: u64,
    cursors: HashMap<u64, Cursor>,
    next_reader_id: u64,
    closed: bool,
    dropped: u64,
}

impl QueueState {
    fn tail_seq(&self) -> u64 {
        self.head_seq + self.frames.len() as u64
    }

    /// Pops frames every reader has removed.
    fn release_consumed(&mut self) -> bool {
        let Some(min_next) = self.cursors.values().map(|c| c.next).min() else {
            return false;
        };
        let mut released = false;
        while self.head_seq < min_next && !self.frames.is_empty() {
            self.frames.pop_front();
            self.head_seq += 1;
            released = true;
        }
        released
    }

    fn peek(&mut self, reader: u64) -> Option<Arc<Frame>> {
        let head = self.head_seq;
        let tail = self.tail_seq();
        let cursor = self.cursors.get_mut(&reader)?;
        // Frames evicted by overflow are skipped.
        let seq = cursor.next.max(head);
        if seq >= tail {
            return None;
        }
        cursor.next = seq;
        cursor.pending = Some(seq);
        self.frames.get((seq - head) as usize).cloned()
    }

    fn available(&self, reader: u64) -> usize {
        self.cursors
            .get(&reader)
            .map(|c| (self.tail_seq() - c.next.max(self.head_seq)) as usize)
            .unwrap_or(0)
    }

    fn register(&mut self) -> u64 {
        let id = self.next_reader_id;
        self.next_reader_id += 1;
        self.cursors.insert(
            id,
            Cursor {
                next: self.head_seq,
                pending: None,
            },
        );
        id
    }
}

/// Shared queue behind a [`Writer`] and its [`Reader`]s.
#[derive(Debug)]
struct FrameQueue {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Signalled on write and close.
    readable: Condvar,
    /// Signalled when slots are freed.
    writable: Condvar,
}

impl FrameQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }
}

/// Creates a queue and returns its writer and first reader.
///
/// # Example
///
/// ```
/// use stream_mixer::pipeline::queue;
/// use stream_mixer::{Frame, QueueConfig};
/// use std::time::Duration;
///
/// let (writer, reader) = queue::channel("demo", QueueConfig::default());
/// writer.write_frame(Frame::from_samples(&[1, 2], Duration::ZERO, 8000, 1)).unwrap();
///
/// let frame = reader.read_frame().unwrap();
/// assert_eq!(frame.to_interleaved_samples(), Some(vec![1, 2]));
/// assert!(reader.remove_frame());
/// assert!(reader.read_frame().is_none());
/// ```
pub fn channel(name: impl Into<String>, config: QueueConfig) -> (Writer, Reader) {
    // A zero-capacity queue could never hold the frame it just accepted.
    let config = QueueConfig {
        capacity: config.capacity.max(1),
        ..config
    };
    let mut state = QueueState {
        frames: VecDeque::with_capacity(config.capacity),
        head_seq: 0,
        cursors: HashMap::new(),
        next_reader_id: 0,
        closed: false,
        dropped: 0,
    };
    let id = state.register();
    let queue = Arc::new(FrameQueue {
        name: name.into(),
        config,
        state: Mutex::new(state),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    (
        Writer {
            queue: queue.clone(),
        },
        Reader { queue, id },
    )
}

/// Writing end of a frame queue. Dropping it closes the queue.
#[derive(Debug)]
pub struct Writer {
    queue: Arc<FrameQueue>,
}

impl Writer {
    /// Appends a frame, applying the overflow policy when full.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Closed`] after [`close`](Self::close)
    /// - [`QueueError::Disconnected`] when every reader has been dropped
    /// - [`QueueError::Timeout`] when a blocking write found no room in time
    pub fn write_frame(&self, frame: Frame) -> Result<WriteStatus, QueueError> {
        let queue = &self.queue;
        let mut state = queue.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.cursors.is_empty() {
            return Err(QueueError::Disconnected);
        }

        let mut status = WriteStatus::Enqueued;
        if state.frames.len() >= queue.config.capacity {
            match queue.config.overflow {
                OverflowPolicy::DropOldest => {
                    state.frames.pop_front();
                    state.head_seq += 1;
                    state.dropped += 1;
                    status = WriteStatus::DroppedOldest;
                    tracing::trace!(queue = %queue.name, dropped = state.dropped, "queue full, dropped oldest frame");
                }
                OverflowPolicy::Block { timeout } => {
                    let deadline = Instant::now() + timeout;
                    while state.frames.len() >= queue.config.capacity {
                        if state.closed {
                            return Err(QueueError::Closed);
                        }
                        if state.cursors.is_empty() {
                            return Err(QueueError::Disconnected);
                        }
                        if queue.writable.wait_until(&mut state, deadline).timed_out()
                            && state.frames.len() >= queue.config.capacity
                        {
                            return Err(QueueError::Timeout);
                        }
                    }
                }
            }
        }

        state.frames.push_back(Arc::new(frame));
        drop(state);
        queue.readable.notify_all();
        Ok(status)
    }

    /// Registers another reader starting at the oldest retained frame.
    pub fn add_reader(&self) -> Reader {
        let id = self.queue.lock().register();
        Reader {
            queue: self.queue.clone(),
            id,
        }
    }

    /// Closes the queue. Readers drain what is left, then report finished.
    pub fn close(&self) {
        let mut state = self.queue.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!(queue = %self.queue.name, "queue closed");
        }
        drop(state);
        self.queue.readable.notify_all();
        self.queue.writable.notify_all();
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Returns `true` while at least one reader is registered.
    pub fn has_readers(&self) -> bool {
        !self.queue.lock().cursors.is_empty()
    }

    /// Frames currently retained.
    pub fn len(&self) -> usize {
        self.queue.lock().frames.len()
    }

    /// Returns `true` if no frames are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted by overflow so far.
    pub fn dropped_frames(&self) -> u64 {
        self.queue.lock().dropped
    }

    /// Name given at creation, used in logs.
    pub fn name(&self) -> &str {
        &self.queue.name
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading end of a frame queue with its own cursor.
///
/// [`read_frame`](Self::read_frame) returns the oldest frame this reader has
/// not removed, without advancing. [`remove_frame`](Self::remove_frame)
/// advances past it. Dropping the reader unregisters its cursor.
#[derive(Debug)]
pub struct Reader {
    queue: Arc<FrameQueue>,
    id: u64,
}

impl Reader {
    /// Returns the oldest frame not yet removed by this reader, or `None`.
    ///
    /// Calling it again before [`remove_frame`](Self::remove_frame) returns
    /// the same frame.
    pub fn read_frame(&self) -> Option<Arc<Frame>> {
        self.queue.lock().peek(self.id)
    }

    /// Like [`read_frame`](Self::read_frame), but waits up to `timeout` for a
    /// frame to arrive. Returns early with `None` when the queue closes empty.
    pub fn wait_frame(&self, timeout: Duration) -> Option<Arc<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.queue.lock();
        loop {
            if let Some(frame) = state.peek(self.id) {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            if self.queue.readable.wait_until(&mut state, deadline).timed_out() {
                return state.peek(self.id);
            }
        }
    }

    /// Advances past the frame last returned by `read_frame`.
    ///
    /// Returns `false` if there was none.
    pub fn remove_frame(&self) -> bool {
        let mut state = self.queue.lock();
        let Some(cursor) = state.cursors.get_mut(&self.id) else {
            return false;
        };
        let Some(seq) = cursor.pending.take() else {
            return false;
        };
        cursor.next = cursor.next.max(seq + 1);
        if state.release_consumed() {
            drop(state);
            self.queue.writable.notify_all();
        }
        true
    }

    /// Frames available to this reader.
    pub fn available(&self) -> usize {
        self.queue.lock().available(self.id)
    }

    /// Returns `true` once the queue is closed and this reader has removed
    /// every remaining frame.
    pub fn is_finished(&self) -> bool {
        let state = self.queue.lock();
        state.closed && state.available(self.id) == 0
    }

    /// Name given at creation, used in logs.
    pub fn name(&self) -> &str {
        &self.queue.name
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.cursors.remove(&self.id);
        state.release_consumed();
        drop(state);
        self.queue.writable.notify_all();
    }
}
