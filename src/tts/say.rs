// src/tts/say.rs
// macOS `say` engine adapter (subprocess)

use super::{SpeechEngine, SynthesisError};
use crate::audio::{AudioBuffer, AudioFormat};
use async_trait::async_trait;
use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::process::Command;

const DEFAULT_SAY_BIN: &str = "say";

pub struct SayAdapter {
    bin_path: PathBuf,
    voice: String,
    rate: u32,
    format: AudioFormat,
    tmp_dir: PathBuf,
}

impl SayAdapter {
    pub fn new(voice: &str, rate: u32, format: AudioFormat) -> Self {
        let bin_path = env::var("NARRATOR_SAY_BIN")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SAY_BIN));

        tracing::info!(
            "say adapter initialized: bin={}, voice={}, rate={}",
            bin_path.display(),
            voice,
            rate
        );

        Self {
            bin_path,
            voice: voice.to_string(),
            rate,
            format,
            tmp_dir: env::temp_dir(),
        }
    }

    pub fn with_binary(mut self, bin_path: impl Into<PathBuf>) -> Self {
        self.bin_path = bin_path.into();
        self
    }

    /// Directory for the intermediate WAV files
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    fn command(&self, text: &str, out_path: &Path) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.arg("-r")
            .arg(self.rate.to_string())
            .arg("-v")
            .arg(&self.voice)
            .arg("-o")
            .arg(out_path)
            .arg("--file-format=WAVE")
            .arg(format!("--data-format=LEI16@{}", self.format.sample_rate))
            .arg("--")
            .arg(text)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SpeechEngine for SayAdapter {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer, SynthesisError> {
        // Deleted when dropped, so a timed-out or cancelled call cleans up too
        let out_path = tempfile::Builder::new()
            .prefix("narrator_say_")
            .suffix(".wav")
            .tempfile_in(&self.tmp_dir)
            .map_err(|e| {
                SynthesisError::EngineUnavailable(format!(
                    "cannot create temp file in {}: {}",
                    self.tmp_dir.display(),
                    e
                ))
            })?
            .into_temp_path();

        let output = self
            .command(text, &out_path)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SynthesisError::EngineError(format!(
                    "say binary not found at {}",
                    self.bin_path.display()
                )),
                _ => SynthesisError::EngineUnavailable(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SynthesisError::EngineError(format!(
                "say failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let wav = tokio::fs::read(&out_path)
            .await
            .map_err(|e| SynthesisError::InvalidAudio(e.to_string()))?;
        if let Err(e) = out_path.close() {
            tracing::warn!("Failed to remove say output: {}", e);
        }

        Ok(AudioBuffer::from_wav_bytes(&wav)?)
    }

    fn name(&self) -> &str {
        "say"
    }
}
