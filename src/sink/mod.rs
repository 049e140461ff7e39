//! Sink trait and implementations for mixed-stream destinations.
//!
//! A [`Sink`] is any destination that can receive the pipeline's encoded
//! output frames. The crate provides two built-in sinks:
//!
//! - [`ChannelSink`]: Sends frames to a tokio mpsc channel
//! - [`FileSink`]: Writes frames to a raw or WAV file
//!
//! You can implement the [`Sink`] trait for custom destinations like
//! RTP senders or recorders.

mod channel;
mod file;

pub use channel::ChannelSink;
pub use file::FileSink;

use std::sync::Arc;

use crate::{Frame, SinkError};
use async_trait::async_trait;

/// A destination for encoded frames.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability (`Mutex`, `RwLock`) if needed
/// - All methods are async and run on the tokio runtime
/// - `on_start` is called before any frame flows; open resources here
/// - `on_stop` is called once the pipeline has drained; close resources here
/// - A failed `write` may be retried with the same frame
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stream_mixer::{Frame, Sink, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink {
///     name: String,
/// }
///
/// #[async_trait]
/// impl Sink for PrintSink {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     async fn write(&self, frame: Arc<Frame>) -> Result<(), SinkError> {
///         println!("{} bytes at {:?}", frame.len(), frame.timestamp());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once before the pipeline starts.
    ///
    /// Errors here are fatal and prevent the pipeline from starting.
    async fn on_start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Receives one output frame.
    ///
    /// Errors are recoverable: the router emits a
    /// [`PipelineEvent::SinkError`](crate::PipelineEvent::SinkError) and
    /// retries according to [`RouterConfig`](crate::RouterConfig).
    async fn write(&self, frame: Arc<Frame>) -> Result<(), SinkError>;

    /// Called during shutdown after the last frame, even if writes failed.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSink {
        name: String,
        bytes: AtomicUsize,
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&self, frame: Arc<Frame>) -> Result<(), SinkError> {
            self.bytes.fetch_add(frame.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_lifecycle() {
        let sink = CountingSink {
            name: "test".to_string(),
            bytes: AtomicUsize::new(0),
        };

        sink.on_start().await.unwrap();
        let frame = Arc::new(Frame::from_samples(&[0i16; 100], Duration::ZERO, 16000, 1));
        sink.write(frame.clone()).await.unwrap();
        sink.write(frame).await.unwrap();
        assert_eq!(sink.bytes.load(Ordering::SeqCst), 400);
        sink.on_stop().await.unwrap();
    }

    #[test]
    fn test_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<dyn Sink>>();
    }
}
