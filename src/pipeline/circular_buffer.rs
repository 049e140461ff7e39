//! Per-input jitter buffer for the mixer.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::config::CanonicalFormat;
use crate::format::FormatConverter;
use crate::frame::{Frame, StreamFormat};

/// Outcome of [`AudioCircularBuffer::write_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReport {
    /// Samples per channel appended.
    pub written: usize,
    /// Oldest samples per channel overwritten to make room.
    pub dropped: usize,
    /// Previous source format when this frame changed it.
    pub format_changed: Option<StreamFormat>,
}

/// Planar ring of canonical-format samples, one [`HeapRb`] per channel.
///
/// Writes never block: when full, the oldest samples are overwritten and
/// counted. Reads may be short. The buffer also remembers the source format of
/// its input and converts incoming PCM frames to the canonical format.
pub struct AudioCircularBuffer {
    channels: Vec<HeapRb<i16>>,
    capacity: usize,
    format: CanonicalFormat,
    converter: Option<FormatConverter>,
    dropped_total: u64,
}

impl AudioCircularBuffer {
    /// Creates an empty buffer holding `capacity` samples per channel.
    pub fn new(capacity: usize, format: CanonicalFormat) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: (0..format.channels.max(1))
                .map(|_| HeapRb::new(capacity))
                .collect(),
            capacity,
            format,
            converter: None,
            dropped_total: 0,
        }
    }

    /// Appends canonical samples, one slice per channel.
    ///
    /// Missing channels are filled with silence and extra ones ignored.
    /// Returns the samples per channel dropped to make room.
    pub fn write(&mut self, planes: &[Vec<i16>]) -> usize {
        let len = planes.iter().map(Vec::len).min().unwrap_or(0);
        if len == 0 {
            return 0;
        }
        let silence = vec![0i16; len];
        let mut dropped = 0;
        for (ch, ring) in self.channels.iter_mut().enumerate() {
            let plane = planes.get(ch).map_or(silence.as_slice(), |p| &p[..len]);
            // Only the newest `capacity` samples can survive the write.
            let plane = &plane[plane.len().saturating_sub(self.capacity)..];
            let overflow = (ring.occupied_len() + plane.len()).saturating_sub(self.capacity);
            ring.push_slice_overwrite(plane);
            dropped = dropped.max(overflow + (len - plane.len()));
        }
        self.dropped_total += dropped as u64;
        dropped
    }

    /// Converts a PCM frame to the canonical format and appends it.
    ///
    /// A frame whose rate or channel count differs from the previous one
    /// rebuilds the converter and reports the previous format. Compressed
    /// frames are ignored and report nothing written.
    pub fn write_frame(&mut self, frame: &Frame) -> WriteReport {
        let format = frame.format();
        if !format.is_pcm() {
            return WriteReport::default();
        }

        let mut report = WriteReport::default();
        let rebuild = match &self.converter {
            Some(converter) if converter.accepts(&format) => false,
            Some(converter) => {
                report.format_changed = Some(converter.source_format());
                true
            }
            None => true,
        };
        if rebuild {
            self.converter = Some(FormatConverter::new(
                format,
                self.format.sample_rate,
                self.format.channels,
            ));
        }

        let planes = match self.converter.as_mut().and_then(|c| c.convert(frame)) {
            Some(planes) => planes,
            None => return report,
        };
        report.written = planes.iter().map(Vec::len).min().unwrap_or(0);
        report.dropped = self.write(&planes);
        report
    }

    /// Removes up to `count` samples per channel.
    pub fn read(&mut self, count: usize) -> Vec<Vec<i16>> {
        let count = count.min(self.available());
        self.channels
            .iter_mut()
            .map(|ring| {
                let mut plane = vec![0i16; count];
                let n = ring.pop_slice(&mut plane);
                plane.truncate(n);
                plane
            })
            .collect()
    }

    /// Samples per channel ready to read.
    pub fn available(&self) -> usize {
        self.channels
            .iter()
            .map(|ring| ring.occupied_len())
            .min()
            .unwrap_or(0)
    }

    /// Returns `true` if at least `samples_per_tick` samples per channel are buffered.
    pub fn has_tick(&self, samples_per_tick: usize) -> bool {
        self.available() >= samples_per_tick
    }

    /// Samples per channel the buffer holds when full.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discards everything buffered.
    pub fn clear(&mut self) {
        for ring in &mut self.channels {
            ring.clear();
        }
    }

    /// Source format of the last frame written, if any.
    pub fn source_format(&self) -> Option<StreamFormat> {
        self.converter.as_ref().map(FormatConverter::source_format)
    }

    /// Samples per channel dropped over the buffer's lifetime.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}

impl std::fmt::Debug for AudioCircularBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCircularBuffer")
            .field("channels", &self.channels.len())
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("source_format", &self.source_format())
            .finish()
    }
}
