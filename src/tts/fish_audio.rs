use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;

use super::{ReferenceVoice, SpeechSynthesizer};
use crate::config::SynthesisConfig;
use crate::error::{DubSyncError, Result};

/// Voice sample attached to a request
#[derive(Debug, Serialize)]
struct ReferenceAudio<'a> {
    /// Base64 encoded audio
    audio: String,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Prosody {
    speed: f32,
    volume: f32,
}

/// Body of `POST /v1/tts`
#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    format: &'a str,
    references: Vec<ReferenceAudio<'a>>,
    prosody: Prosody,
    latency: &'a str,
}

/// Client of the Fish Audio text-to-speech API
pub struct FishAudioSynthesizer {
    client: Client,
    api_key: String,
    endpoint: String,
    format: String,
    speed: f32,
}

impl FishAudioSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(DubSyncError::Configuration(
                "Fish Audio API key is required for speech synthesis".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/v1/tts", config.base_url.trim_end_matches('/')),
            format: config.format.as_str().to_string(),
            speed: config.speed,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for FishAudioSynthesizer {
    async fn synthesize(&self, text: &str, reference: &ReferenceVoice) -> Result<Bytes> {
        let request = TtsRequest {
            text,
            format: &self.format,
            references: vec![ReferenceAudio {
                audio: base64::engine::general_purpose::STANDARD.encode(&reference.audio),
                text: &reference.text,
            }],
            prosody: Prosody {
                speed: self.speed,
                volume: 0.0,
            },
            latency: "normal",
        };

        log::debug!("Sending TTS request ({} chars) to {}", text.len(), self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response: {}", e));
            return Err(DubSyncError::Other(format!(
                "Fish Audio API error (status {}): {}",
                status, error_text
            )));
        }

        // Audio arrives in chunks
        let mut audio = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }

        log::debug!("Received {} bytes of audio", audio.len());
        Ok(audio.freeze())
    }
}
