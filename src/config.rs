use crate::audio::AudioFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_VOICEVOX_URL: &str = "http://127.0.0.1:50021";
pub const DEFAULT_VOICE: &str = "Kyoko";
pub const DEFAULT_OUTPUT_EXTENSION: &str = "wav";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// VOICEVOX HTTP engine
    #[value(name = "voicevox")]
    VoiceVox,
    /// macOS `say` command
    Say,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub max_segment_chars: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub synthesis_timeout_secs: u64,
    pub progress_interval_segments: usize,
    /// Reorder window: a worker may run at most this far ahead of the last flushed segment
    pub max_pending: usize,
    pub sample_rate: u32,
    pub channels: u16,
    /// Silence length per character for segments that could not be synthesized
    pub placeholder_secs_per_char: f32,
    pub engine: EngineKind,
    pub voicevox_url: String,
    pub speaker_id: u32,
    pub voice: String,
    pub speech_rate: u32,
    pub dump_segments: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            max_segment_chars: 200,
            concurrency: 16,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            synthesis_timeout_secs: 60,
            progress_interval_segments: 100,
            max_pending: 256,
            sample_rate: 24_000,
            channels: 1,
            placeholder_secs_per_char: 0.12,
            engine: EngineKind::VoiceVox,
            voicevox_url: DEFAULT_VOICEVOX_URL.to_string(),
            speaker_id: 1,
            voice: DEFAULT_VOICE.to_string(),
            speech_rate: 200,
            dump_segments: false,
        }
    }
}

impl RunConfig {
    /// Read a JSON config file; missing keys fall back to defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str::<RunConfig>(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    /// Where the per-segment text dump goes when `dump_segments` is set
    pub fn segments_dump_path(&self) -> PathBuf {
        let mut name = self.output_path.as_os_str().to_owned();
        name.push(".segments.txt");
        PathBuf::from(name)
    }

    /// Normalize free-form values, then reject anything the pipeline cannot run with
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        normalize_config(&mut self);
        validate(&self)?;
        Ok(self)
    }
}

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_VOICEVOX_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn normalize_voice(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        DEFAULT_VOICE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<input>.wav` next to the source document
pub fn default_output_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(DEFAULT_OUTPUT_EXTENSION);
    PathBuf::from(name)
}

fn normalize_config(config: &mut RunConfig) {
    config.voicevox_url = normalize_url(&config.voicevox_url);
    config.voice = normalize_voice(&config.voice);
    if config.output_path.as_os_str().is_empty() && !config.input_path.as_os_str().is_empty() {
        config.output_path = default_output_path(&config.input_path);
    }
    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        config.retry_max_delay_ms = config.retry_base_delay_ms;
    }
}

fn validate(config: &RunConfig) -> Result<(), ConfigError> {
    fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
        Err(ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        })
    }

    if config.input_path.as_os_str().is_empty() {
        return invalid("input_path", "an input document is required");
    }
    if config.output_path == config.input_path {
        return invalid("output_path", "must differ from input_path");
    }
    if config.max_segment_chars == 0 {
        return invalid("max_segment_chars", "must be greater than 0");
    }
    if config.concurrency == 0 {
        return invalid("concurrency", "must be at least 1");
    }
    if config.progress_interval_segments == 0 {
        return invalid("progress_interval_segments", "must be at least 1");
    }
    if config.max_pending == 0 {
        return invalid("max_pending", "must be at least 1");
    }
    if config.synthesis_timeout_secs == 0 {
        return invalid("synthesis_timeout_secs", "must be greater than 0");
    }
    if config.sample_rate == 0 {
        return invalid("sample_rate", "must be greater than 0");
    }
    if config.channels == 0 {
        return invalid("channels", "must be at least 1");
    }
    if !config.placeholder_secs_per_char.is_finite() || config.placeholder_secs_per_char < 0.0 {
        return invalid("placeholder_secs_per_char", "must be a non-negative number");
    }
    Ok(())
}
