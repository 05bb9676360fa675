//! ElevenLabs text-to-speech adapter.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ProviderError, Result, Synthesizer, http_client};
use crate::config::SynthesisConfig;

const SERVICE: &str = "elevenlabs";

/// Voice settings sent with every synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl From<&SynthesisConfig> for VoiceSettings {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            style: config.style,
            use_speaker_boost: config.use_speaker_boost,
        }
    }
}

/// Synthesizes `audio/mpeg` through `POST /v1/text-to-speech/{voice_id}`.
#[derive(Debug, Clone)]
pub struct ElevenLabsSynthesizer {
    api_key: String,
    base_url: String,
    voice_id: String,
    model_id: String,
    settings: VoiceSettings,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when the key or voice is missing.
    pub fn from_config(config: &SynthesisConfig, timeout: Duration) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Config("ElevenLabs API key is not set".into()))?;
        let voice_id = config
            .voice_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Config("ElevenLabs voice id is not set".into()))?;
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voice_id,
            model_id: config.model_id.clone(),
            settings: VoiceSettings::from(config),
            client: http_client(timeout)?,
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": self.settings.stability,
                "similarity_boost": self.settings.similarity_boost,
                "style": self.settings.style,
                "use_speaker_boost": self.settings.use_speaker_boost,
            },
        })
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, voice_override: Option<&str>) -> Result<Bytes> {
        let voice = voice_override
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.voice_id);
        let response = self
            .client
            .post(format!("{}/v1/text-to-speech/{voice}", self.base_url))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| ProviderError::request(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(SERVICE, status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Stream(format!("{SERVICE} audio body: {e}")))?;
        if audio.is_empty() {
            return Err(ProviderError::Decode("synthesis returned no audio".into()));
        }
        Ok(audio)
    }
}
