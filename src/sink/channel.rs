//! Tokio mpsc channel sink implementation.

use std::sync::Arc;

use crate::sink::Sink;
use crate::{Frame, SinkError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A sink that forwards output frames to a tokio mpsc channel.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stream_mixer::{ChannelSink, Frame};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<Arc<Frame>>(100);
/// let sink = ChannelSink::new(tx);
///
/// // Add the sink to a PipelineBuilder, then receive frames:
/// // while let Some(frame) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<Arc<Frame>>,
}

impl ChannelSink {
    /// Creates a channel sink named `"channel"`.
    pub fn new(sender: mpsc::Sender<Arc<Frame>>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<Arc<Frame>>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, frame: Arc<Frame>) -> Result<(), SinkError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| SinkError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::from_samples(&[1, 2, 3], Duration::ZERO, 16000, 1))
    }

    #[tokio::test]
    async fn test_channel_sink_sends_frames() {
        let (tx, mut rx) = mpsc::channel(10);
        let sink = ChannelSink::new(tx);

        let sent = frame();
        sink.write(sent.clone()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&sent, &received));
        assert_eq!(received.to_interleaved_samples().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel(10);
        let sink = ChannelSink::new(tx);
        drop(rx);

        let result = sink.write(frame()).await;
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel(10);
        let sink = ChannelSink::with_name("recorder", tx);
        assert_eq!(sink.name(), "recorder");
    }
}
