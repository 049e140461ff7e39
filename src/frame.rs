//! Media frames passed between pipeline stages.

use std::fmt;
use std::time::Duration;

use crate::codec::CodecId;
use crate::format::convert;

/// Sample layout or compression of a frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Signed 16-bit little-endian PCM, channels interleaved in one buffer.
    S16Interleaved,
    /// Signed 16-bit little-endian PCM, one buffer per channel.
    S16Planar,
    /// Compressed payload produced by a codec.
    Compressed(CodecId),
}

/// Encoding, sample rate and channel count of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    /// Payload encoding.
    pub encoding: Encoding,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
}

impl StreamFormat {
    /// Interleaved S16 PCM.
    pub const fn interleaved(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: Encoding::S16Interleaved,
            sample_rate,
            channels,
        }
    }

    /// Planar S16 PCM.
    pub const fn planar(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: Encoding::S16Planar,
            sample_rate,
            channels,
        }
    }

    /// Compressed with the given codec.
    pub const fn compressed(codec: CodecId, sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: Encoding::Compressed(codec),
            sample_rate,
            channels,
        }
    }

    /// Returns `true` for either PCM layout.
    pub fn is_pcm(&self) -> bool {
        matches!(
            self.encoding,
            Encoding::S16Interleaved | Encoding::S16Planar
        )
    }

    /// Returns `true` for planar PCM.
    pub fn is_planar(&self) -> bool {
        self.encoding == Encoding::S16Planar
    }

    /// Returns the codec for compressed formats.
    pub fn codec(&self) -> Option<CodecId> {
        match self.encoding {
            Encoding::Compressed(codec) => Some(codec),
            _ => None,
        }
    }

    /// Returns `true` if both formats carry the same rate and channel count,
    /// regardless of encoding.
    pub fn same_shape(&self, other: &StreamFormat) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encoding {
            Encoding::S16Interleaved => write!(f, "s16")?,
            Encoding::S16Planar => write!(f, "s16p")?,
            Encoding::Compressed(codec) => write!(f, "{codec}")?,
        }
        write!(f, "/{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// A unit of media passed through a [`FrameQueue`](crate::pipeline::queue).
///
/// A frame owns its payload bytes: one buffer for interleaved PCM and
/// compressed data, one buffer per channel for planar PCM. Queues hand frames
/// out as `Arc<Frame>`, so a frame is immutable once enqueued.
///
/// # Example
///
/// ```
/// use stream_mixer::Frame;
/// use std::time::Duration;
///
/// let frame = Frame::from_samples(&[0i16; 960], Duration::ZERO, 48000, 1);
/// assert_eq!(frame.duration(), Duration::from_millis(20));
/// assert_eq!(frame.len(), 1920);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    planes: Vec<Vec<u8>>,
    timestamp: Duration,
    format: StreamFormat,
}

impl Frame {
    /// Creates a frame with a single payload buffer.
    ///
    /// Used for interleaved PCM and compressed frames.
    pub fn new(data: Vec<u8>, timestamp: Duration, format: StreamFormat) -> Self {
        debug_assert!(!format.is_planar(), "planar frames need one plane per channel");
        Self {
            planes: vec![data],
            timestamp,
            format,
        }
    }

    /// Creates a planar PCM frame from per-channel byte buffers.
    pub fn from_planes(planes: Vec<Vec<u8>>, timestamp: Duration, sample_rate: u32) -> Self {
        let channels = planes.len() as u16;
        Self {
            planes,
            timestamp,
            format: StreamFormat::planar(sample_rate, channels),
        }
    }

    /// Creates an interleaved PCM frame from samples.
    pub fn from_samples(samples: &[i16], timestamp: Duration, sample_rate: u32, channels: u16) -> Self {
        Self::new(
            convert::samples_to_bytes(samples),
            timestamp,
            StreamFormat::interleaved(sample_rate, channels),
        )
    }

    /// Creates a planar PCM frame from per-channel samples.
    pub fn from_planar_samples(planes: &[Vec<i16>], timestamp: Duration, sample_rate: u32) -> Self {
        Self::from_planes(
            planes.iter().map(|p| convert::samples_to_bytes(p)).collect(),
            timestamp,
            sample_rate,
        )
    }

    /// Presentation timestamp.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Format of the payload.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Payload of a single-buffer frame, or the first plane of a planar one.
    pub fn data(&self) -> &[u8] {
        self.planes.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// All payload buffers.
    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    /// Payload byte count across all planes.
    pub fn len(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }

    /// Returns `true` if the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated bytes across all planes.
    pub fn capacity(&self) -> usize {
        self.planes.iter().map(Vec::capacity).sum()
    }

    /// Samples per channel for PCM frames, `0` for compressed ones.
    pub fn frame_count(&self) -> usize {
        match self.format.encoding {
            Encoding::S16Planar => self.data().len() / 2,
            Encoding::S16Interleaved if self.format.channels > 0 => {
                self.data().len() / 2 / self.format.channels as usize
            }
            _ => 0,
        }
    }

    /// Playback duration of a PCM frame.
    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.format.sample_rate as f64)
    }

    /// Returns a copy with the timestamp replaced.
    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Interleaved samples of a PCM frame, `None` for compressed frames.
    pub fn to_interleaved_samples(&self) -> Option<Vec<i16>> {
        match self.format.encoding {
            Encoding::S16Interleaved => Some(convert::bytes_to_samples(self.data())),
            Encoding::S16Planar => {
                let planes: Vec<Vec<i16>> = self
                    .planes
                    .iter()
                    .map(|p| convert::bytes_to_samples(p))
                    .collect();
                Some(convert::interleave(&planes))
            }
            Encoding::Compressed(_) => None,
        }
    }

    /// Per-channel samples of a PCM frame, `None` for compressed frames.
    pub fn to_planar_samples(&self) -> Option<Vec<Vec<i16>>> {
        match self.format.encoding {
            Encoding::S16Planar => Some(
                self.planes
                    .iter()
                    .map(|p| convert::bytes_to_samples(p))
                    .collect(),
            ),
            Encoding::S16Interleaved => Some(convert::deinterleave(
                &convert::bytes_to_samples(self.data()),
                self.format.channels,
            )),
            Encoding::Compressed(_) => None,
        }
    }

    /// Converts a PCM frame to the planar layout. Other frames are returned unchanged.
    pub fn into_planar(self) -> Self {
        if self.format.encoding != Encoding::S16Interleaved {
            return self;
        }
        let planes = convert::deinterleave(
            &convert::bytes_to_samples(self.data()),
            self.format.channels,
        );
        Self::from_planar_samples(&planes, self.timestamp, self.format.sample_rate)
    }

    /// Converts a PCM frame to the interleaved layout. Other frames are returned unchanged.
    pub fn into_interleaved(self) -> Self {
        if self.format.encoding != Encoding::S16Planar {
            return self;
        }
        let channels = self.format.channels;
        let rate = self.format.sample_rate;
        let samples = self.to_interleaved_samples().unwrap_or_default();
        Self::from_samples(&samples, self.timestamp, rate, channels)
    }
}
