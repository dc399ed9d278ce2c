// src/tts/mod.rs
// TTS Module - Speech synthesis engine adapters

mod say;
mod types;
mod voicevox;

pub use say::SayAdapter;
pub use types::SynthesisError;
pub use voicevox::VoiceVoxAdapter;

use crate::audio::AudioBuffer;
use crate::config::{EngineKind, RunConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Unified synthesis engine trait
///
/// Implementations must tolerate `concurrency` simultaneous calls.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Synthesize one segment of text into audio
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer, SynthesisError>;

    /// Get engine name
    fn name(&self) -> &str;
}

/// Build the engine selected by the run configuration
pub fn engine_from_config(config: &RunConfig) -> Result<Arc<dyn SpeechEngine>, SynthesisError> {
    let engine: Arc<dyn SpeechEngine> = match config.engine {
        EngineKind::VoiceVox => Arc::new(VoiceVoxAdapter::new(
            &config.voicevox_url,
            config.speaker_id,
            Duration::from_secs(config.synthesis_timeout_secs),
            config.concurrency,
        )?),
        EngineKind::Say => Arc::new(SayAdapter::new(
            &config.voice,
            config.speech_rate,
            config.audio_format(),
        )),
    };

    tracing::info!("Synthesis engine selected: {}", engine.name());
    Ok(engine)
}
