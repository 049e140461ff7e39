//! File sink: raw payload dump or WAV container.

use crate::codec::CodecId;
use crate::frame::{Encoding, StreamFormat};
use crate::sink::Sink;
use crate::{Frame, SinkError};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

// WAV file format constants
// See: http://soundfile.sapp.org/doc/WaveFormat/

/// Byte offset of the file size field in WAV header (RIFF chunk size).
const WAV_FILE_SIZE_OFFSET: u64 = 4;

/// Byte offset of the data chunk size field in WAV header.
const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Size of the WAV header in bytes (RIFF + fmt + data chunk headers).
const WAV_HEADER_SIZE: usize = 44;

/// Size of the fmt chunk data.
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// WAVE format tags.
const WAV_FORMAT_PCM: u16 = 1;
const WAV_FORMAT_ALAW: u16 = 6;
const WAV_FORMAT_MULAW: u16 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Raw,
    Wav,
}

/// A sink that writes output frames to a file.
///
/// Two layouts are supported:
///
/// - [`FileSink::raw`] appends each frame's payload as-is. PCM is written as
///   interleaved S16LE; compressed frames are concatenated unframed.
/// - [`FileSink::wav`] writes a WAV file. Accepts S16 PCM (either layout),
///   µ-law and A-law. Other codecs are rejected with
///   [`SinkError::UnsupportedFormat`].
///
/// Every frame must share the format of the first. The file is created on
/// first write and, for WAV, the header is finalized on `on_stop()`. All file
/// I/O runs on the blocking thread pool.
///
/// # Example
///
/// ```no_run
/// use stream_mixer::FileSink;
///
/// let sink = FileSink::wav("conference.wav");
/// // Add to a PipelineBuilder...
/// ```
pub struct FileSink {
    name: String,
    path: Arc<PathBuf>,
    container: Container,
    state: Arc<Mutex<FileState>>,
}

struct FileState {
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    format: Option<StreamFormat>,
}

impl FileSink {
    /// Creates a sink that writes a WAV file.
    pub fn wav(path: impl AsRef<Path>) -> Self {
        Self::create(path, Container::Wav)
    }

    /// Creates a sink that writes frame payloads back to back.
    pub fn raw(path: impl AsRef<Path>) -> Self {
        Self::create(path, Container::Raw)
    }

    fn create(path: impl AsRef<Path>, container: Container) -> Self {
        Self {
            name: format!("file:{}", path.as_ref().display()),
            path: Arc::new(path.as_ref().to_path_buf()),
            container,
            state: Arc::new(Mutex::new(FileState {
                writer: None,
                bytes_written: 0,
                format: None,
            })),
        }
    }

    /// Path being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered data to disk.
    ///
    /// Does not update the WAV header; that happens on `on_stop()`.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            if let Some(ref mut writer) = state.writer {
                writer
                    .flush()
                    .map_err(|e| SinkError::file_error(&*path, e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| SinkError::custom(format!("flush task panicked: {e}")))?
    }

    /// WAVE format tag and bits per sample for a frame format.
    fn wav_encoding(format: &StreamFormat) -> Option<(u16, u16)> {
        match format.encoding {
            Encoding::S16Interleaved | Encoding::S16Planar | Encoding::Compressed(CodecId::Pcm) => {
                Some((WAV_FORMAT_PCM, 16))
            }
            Encoding::Compressed(CodecId::Pcmu) => Some((WAV_FORMAT_MULAW, 8)),
            Encoding::Compressed(CodecId::Pcma) => Some((WAV_FORMAT_ALAW, 8)),
            Encoding::Compressed(_) => None,
        }
    }

    /// Writes a complete WAV header with the given parameters.
    fn write_wav_header(
        writer: &mut BufWriter<File>,
        format: &StreamFormat,
        data_size: u32,
    ) -> std::io::Result<()> {
        let (format_tag, bits_per_sample) =
            Self::wav_encoding(format).unwrap_or((WAV_FORMAT_PCM, 16));
        let channels = format.channels;

        // RIFF container header
        writer.write_all(b"RIFF")?;
        let file_size = WAV_HEADER_SIZE as u32 - 8 + data_size;
        writer.write_all(&file_size.to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        // fmt subchunk
        writer.write_all(b"fmt ")?;
        writer.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        writer.write_all(&format_tag.to_le_bytes())?;
        writer.write_all(&channels.to_le_bytes())?;
        writer.write_all(&format.sample_rate.to_le_bytes())?;

        let bytes_per_sample = bits_per_sample / 8;
        let byte_rate = format.sample_rate * u32::from(channels) * u32::from(bytes_per_sample);
        writer.write_all(&byte_rate.to_le_bytes())?;

        let block_align = channels * bytes_per_sample;
        writer.write_all(&block_align.to_le_bytes())?;
        writer.write_all(&bits_per_sample.to_le_bytes())?;

        // data subchunk header
        writer.write_all(b"data")?;
        writer.write_all(&data_size.to_le_bytes())?;

        Ok(())
    }

    /// Updates the WAV header with the final data size.
    fn update_wav_header(writer: &mut BufWriter<File>, data_size: u32) -> std::io::Result<()> {
        let file_size = WAV_HEADER_SIZE as u32 - 8 + data_size;
        writer.seek(SeekFrom::Start(WAV_FILE_SIZE_OFFSET))?;
        writer.write_all(&file_size.to_le_bytes())?;

        writer.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
        writer.write_all(&data_size.to_le_bytes())?;

        writer.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Checks a frame against the container and the stream so far.
    fn check_format(
        container: Container,
        state: &FileState,
        format: &StreamFormat,
    ) -> Result<(), SinkError> {
        let unsupported = || SinkError::UnsupportedFormat {
            format: format.to_string(),
        };
        if container == Container::Wav && Self::wav_encoding(format).is_none() {
            return Err(unsupported());
        }
        match state.format {
            // Planar and interleaved PCM of the same shape produce identical bytes.
            Some(first)
                if first != *format
                    && !(first.is_pcm() && format.is_pcm() && first.same_shape(format)) =>
            {
                Err(unsupported())
            }
            _ => Ok(()),
        }
    }

    fn write_frame_blocking(
        container: Container,
        state: &mut FileState,
        path: &Path,
        frame: &Frame,
    ) -> Result<(), SinkError> {
        let format = frame.format();
        Self::check_format(container, state, &format)?;

        if state.writer.is_none() {
            let file = File::create(path).map_err(|e| SinkError::file_error(path, e))?;
            let mut writer = BufWriter::new(file);
            if container == Container::Wav {
                // Placeholder sizes, fixed on stop.
                Self::write_wav_header(&mut writer, &format, 0)
                    .map_err(|e| SinkError::file_error(path, e))?;
            }
            state.writer = Some(writer);
            state.format = Some(format);
        }

        let Some(ref mut writer) = state.writer else {
            return Ok(());
        };
        let written = if format.is_planar() {
            let samples = frame.to_interleaved_samples().unwrap_or_default();
            for sample in &samples {
                writer
                    .write_all(&sample.to_le_bytes())
                    .map_err(|e| SinkError::file_error(path, e))?;
            }
            samples.len() * 2
        } else {
            writer
                .write_all(frame.data())
                .map_err(|e| SinkError::file_error(path, e))?;
            frame.data().len()
        };
        state.bytes_written += written as u64;
        Ok(())
    }

    fn finalize_blocking(
        container: Container,
        state: &mut FileState,
        path: &Path,
    ) -> Result<(), SinkError> {
        let data_size = u32::try_from(state.bytes_written).unwrap_or(u32::MAX);

        if let Some(ref mut writer) = state.writer {
            if container == Container::Wav {
                Self::update_wav_header(writer, data_size)
                    .map_err(|e| SinkError::file_error(path, e))?;
            }
            writer.flush().map_err(|e| SinkError::file_error(path, e))?;
        }

        state.writer = None;
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, frame: Arc<Frame>) -> Result<(), SinkError> {
        tracing::trace!(
            sink = %self.name,
            bytes = frame.len(),
            timestamp = ?frame.timestamp(),
            "writing frame"
        );

        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);
        let container = self.container;

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::write_frame_blocking(container, &mut state, &path, &frame)
        })
        .await
        .map_err(|e| SinkError::custom(format!("write task panicked: {e}")))?
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);
        let container = self.container;

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::finalize_blocking(container, &mut state, &path)
        })
        .await
        .map_err(|e| SinkError::custom(format!("finalize task panicked: {e}")))?
    }
}
