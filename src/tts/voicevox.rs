// src/tts/voicevox.rs
// VOICEVOX engine adapter (HTTP)

use super::{SpeechEngine, SynthesisError};
use crate::audio::AudioBuffer;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

pub struct VoiceVoxAdapter {
    base_url: String,
    speaker_id: u32,
    client: reqwest::Client,
}

impl VoiceVoxAdapter {
    pub fn new(
        base_url: &str,
        speaker_id: u32,
        timeout: Duration,
        max_connections: usize,
    ) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_connections)
            .build()
            .map_err(|e| SynthesisError::EngineError(e.to_string()))?;

        let base_url = base_url.trim().trim_end_matches('/').to_string();
        tracing::info!(
            "VOICEVOX adapter initialized: url={}, speaker={}",
            base_url,
            speaker_id
        );

        Ok(Self {
            base_url,
            speaker_id,
            client,
        })
    }

    async fn audio_query(&self, text: &str) -> Result<serde_json::Value, SynthesisError> {
        let speaker = self.speaker_id.to_string();
        let resp = self
            .client
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| SynthesisError::EngineError(format!("Bad audio_query response: {}", e)))
    }

    async fn synthesis(&self, query: &serde_json::Value) -> Result<Vec<u8>, SynthesisError> {
        let speaker = self.speaker_id.to_string();
        let resp = self
            .client
            .post(format!("{}/synthesis", self.base_url))
            .query(&[("speaker", speaker.as_str())])
            .json(query)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = resp.bytes().await.map_err(classify_transport)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechEngine for VoiceVoxAdapter {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer, SynthesisError> {
        let query = self.audio_query(text).await?;
        let wav = self.synthesis(&query).await?;

        if wav.is_empty() {
            return Err(SynthesisError::InvalidAudio("Empty synthesis response".to_string()));
        }

        Ok(AudioBuffer::from_wav_bytes(&wav)?)
    }

    fn name(&self) -> &str {
        "VOICEVOX"
    }
}

fn classify_transport(err: reqwest::Error) -> SynthesisError {
    if err.is_timeout() {
        SynthesisError::TimeoutError
    } else {
        SynthesisError::NetworkError(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> SynthesisError {
    let detail = format!("HTTP {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        SynthesisError::RateLimitError
    } else if status == StatusCode::REQUEST_TIMEOUT {
        SynthesisError::TimeoutError
    } else if status.is_server_error() {
        SynthesisError::EngineUnavailable(detail)
    } else {
        SynthesisError::TextRejected(detail)
    }
}
