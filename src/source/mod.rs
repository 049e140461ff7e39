//! Session manager contract and the in-crate mock.
//!
//! A [`SourceManager`] owns the negotiated incoming streams and exposes each
//! one as an output port carrying compressed frames. The pipeline connects a
//! decoder to every port it is told to mix and closes the manager first on
//! shutdown.

mod mock;
mod source_id;

pub use mock::{MockSignal, MockSourceManager, MockSourceManagerBuilder, MockStream};
pub use source_id::SourceId;

use std::sync::Arc;

use crate::error::PipelineError;
use crate::pipeline::PortTable;

/// External session manager feeding the pipeline.
///
/// Port `i` of [`ports`](Self::ports) carries the stream named by
/// `stream_ids()[i]`, in that stream's compressed format.
pub trait SourceManager: Send {
    /// Output ports, one per negotiated stream.
    fn ports(&self) -> &Arc<PortTable>;

    /// Identifiers of the streams, indexed by output port.
    fn stream_ids(&self) -> Vec<SourceId>;

    /// Starts producing frames.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] if the session cannot start.
    fn start(&mut self) -> Result<(), PipelineError>;

    /// Stops producing frames and closes every output queue.
    ///
    /// Idempotent. Frames already queued stay readable.
    fn close(&mut self);

    /// Returns `true` between `start` and `close`.
    fn is_running(&self) -> bool;
}
