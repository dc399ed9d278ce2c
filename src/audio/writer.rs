use super::{AudioBuffer, AudioFormat};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BITS_PER_SAMPLE: u16 = 16;
const WAV_HEADER_BYTES: u64 = 44;
const PART_SUFFIX: &str = ".part";
/// RIFF sizes are u32, so a WAV file cannot grow past this
pub const MAX_WAV_BYTES: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Succeeded,
    Cancelled,
    Failed,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage write failed: {0}")]
    Storage(#[from] hound::Error),

    #[error("Audio format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    #[error("WAV size limit reached ({bytes} bytes of PCM)")]
    SizeLimit { bytes: u64 },

    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Writer is no longer open")]
    Closed,
}

/// Where the artifact ended up and what it holds
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub state: WriterState,
    pub bytes: u64,
    pub segments: usize,
    pub samples: u64,
    pub duration_secs: f64,
}

/// Append-only WAV writer for one run.
///
/// Audio goes to `<path>.part` until [`OutputWriter::finish`] renames it into place, so an
/// interrupted or failed run never leaves a file that looks complete.
pub struct OutputWriter {
    final_path: PathBuf,
    part_path: PathBuf,
    format: AudioFormat,
    inner: Option<hound::WavWriter<BufWriter<File>>>,
    samples_written: u64,
    segments_written: usize,
    max_bytes: u64,
    state: WriterState,
}

impl OutputWriter {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, WriteError> {
        let part_path = part_path_for(path);

        if let Some(parent) = part_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| WriteError::Create {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        };

        let inner = hound::WavWriter::create(&part_path, spec).map_err(|e| match e {
            hound::Error::IoError(source) => WriteError::Create {
                path: part_path.clone(),
                source,
            },
            other => WriteError::Storage(other),
        })?;

        tracing::info!(
            "Output writer opened: {} ({} Hz, {} ch)",
            part_path.display(),
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            final_path: path.to_path_buf(),
            part_path,
            format,
            inner: Some(inner),
            samples_written: 0,
            segments_written: 0,
            max_bytes: MAX_WAV_BYTES,
            state: WriterState::Open,
        })
    }

    /// Cap the file size (header included); clamped to the WAV maximum
    pub fn with_byte_limit(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes.min(MAX_WAV_BYTES);
        self
    }

    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Append one segment and refresh the header so the prefix on disk stays playable
    pub fn append(&mut self, audio: &AudioBuffer) -> Result<(), WriteError> {
        if audio.format() != self.format {
            return Err(WriteError::FormatMismatch {
                expected: self.format,
                actual: audio.format(),
            });
        }

        let pcm_bytes = (self.samples_written + audio.samples.len() as u64) * 2;
        if WAV_HEADER_BYTES + pcm_bytes > self.max_bytes {
            return Err(WriteError::SizeLimit { bytes: pcm_bytes });
        }

        let writer = self.inner.as_mut().ok_or(WriteError::Closed)?;
        for &sample in &audio.samples {
            writer.write_sample(sample)?;
        }
        writer.flush()?;

        self.samples_written += audio.samples.len() as u64;
        self.segments_written += 1;
        Ok(())
    }

    /// Finalize the header and move the artifact to its final path
    pub fn finish(mut self) -> Result<ArtifactInfo, WriteError> {
        let writer = self.inner.take().ok_or(WriteError::Closed)?;
        writer.finalize()?;

        fs::rename(&self.part_path, &self.final_path).map_err(|source| WriteError::Rename {
            from: self.part_path.clone(),
            to: self.final_path.clone(),
            source,
        })?;

        self.state = WriterState::Succeeded;
        let path = self.final_path.clone();
        Ok(self.artifact_info(path))
    }

    /// Keep the flushed prefix at the `.part` path with a valid header
    pub fn cancel(mut self) -> ArtifactInfo {
        if let Some(writer) = self.inner.take() {
            if let Err(e) = writer.finalize() {
                tracing::warn!("Failed to finalize cancelled output: {}", e);
            }
        }
        self.state = WriterState::Cancelled;
        let path = self.part_path.clone();
        self.artifact_info(path)
    }

    /// Leave whatever reached disk at the `.part` path, marked incomplete
    pub fn fail(mut self) -> ArtifactInfo {
        if let Some(writer) = self.inner.take() {
            if let Err(e) = writer.finalize() {
                tracing::warn!("Failed to finalize failed output: {}", e);
            }
        }
        self.state = WriterState::Failed;
        let path = self.part_path.clone();
        self.artifact_info(path)
    }

    fn artifact_info(&self, path: PathBuf) -> ArtifactInfo {
        let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        ArtifactInfo {
            path,
            state: self.state,
            bytes,
            segments: self.segments_written,
            samples: self.samples_written,
            duration_secs: self.format.duration_of(self.samples_written),
        }
    }
}

pub fn part_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}
