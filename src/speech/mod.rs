//! Speech collaborators for the voice pipeline: audio → text and
//! text → audio. Both are external HTTP services behind trait seams.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use crate::errors::AppError;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, AppError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError>;
}

// ── Whisper-style transcription client ───────────────────────────────────────

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Clone)]
pub struct WhisperTranscriber {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: "whisper-1".to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, AppError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("utterance.webm")
            .mime_str("audio/webm")
            .map_err(|e| AppError::TranscriptionFailed { message: e.to_string() })?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Transcription request failed: {e}");
                AppError::TranscriptionFailed { message: e.to_string() }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Transcription service returned {status}: {body}");
            return Err(AppError::TranscriptionFailed {
                message: format!("upstream returned {status}"),
            });
        }

        let parsed: TranscriptionResponse = response.json().await.map_err(|e| {
            AppError::TranscriptionFailed { message: format!("bad response body: {e}") }
        })?;

        if parsed.text.trim().is_empty() {
            return Err(AppError::TranscriptionFailed {
                message: "empty transcript".to_string(),
            });
        }
        Ok(parsed.text)
    }
}

// ── ElevenLabs-style synthesis client ────────────────────────────────────────

const MAX_SYNTHESIS_CHARS: usize = 2500;

#[derive(Clone)]
pub struct ElevenLabsSynthesizer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
}

impl ElevenLabsSynthesizer {
    pub fn new(base_url: &str, api_key: &str, voice_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            voice_id: voice_id.to_string(),
        }
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError> {
        if text.is_empty() || text.chars().count() > MAX_SYNTHESIS_CHARS {
            return Err(AppError::SynthesisFailed {
                message: format!("text length must be 1..={MAX_SYNTHESIS_CHARS} characters"),
            });
        }

        let payload = serde_json::json!({
            "text": text,
            "model_id": "eleven_multilingual_v2",
            "voice_settings": {
                "stability": 0.7,
                "similarity_boost": 0.7,
                "style": 0.3,
                "use_speaker_boost": true,
                "speed": 0.88,
            },
        });

        let response = self
            .http
            .post(format!("{}/text-to-speech/{}", self.base_url, self.voice_id))
            .header("xi-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("Synthesis request failed: {e}");
                AppError::SynthesisFailed { message: e.to_string() }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Synthesis service returned {status}: {body}");
            return Err(AppError::SynthesisFailed {
                message: format!("upstream returned {status}"),
            });
        }

        let audio = response.bytes().await.map_err(|e| {
            AppError::SynthesisFailed { message: format!("failed to read audio body: {e}") }
        })?;
        Ok(audio.to_vec())
    }
}
