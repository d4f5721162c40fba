//! Speech to subtitles
//!
//! The transcription service returns SRT text that the subtitle parser reads
//! directly. Recognized cues can be merged into whole sentences before the
//! document is written.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::config::TranscriptionConfig;
use crate::error::{DubSyncError, Result};
use crate::subtitle::{merge_sentences, parse_srt_document, write_srt, ParsedDocument};

/// Produces an SRT document for an audio file
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String>;
}

/// Client of a Whisper-compatible `/audio/transcriptions` endpoint
pub struct WhisperTranscriber {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(DubSyncError::Configuration(
                "API key is required for transcription".to_string(),
            ));
        }

        let client = Client::builder().timeout(Duration::from_secs(600)).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language: config.language.clone().filter(|l| !l.trim().is_empty()),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String> {
        let metadata = tokio::fs::metadata(audio)
            .await
            .map_err(|_| DubSyncError::FileNotFound(audio.display().to_string()))?;
        if !metadata.is_file() {
            return Err(DubSyncError::FileNotFound(audio.display().to_string()));
        }

        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let file = tokio::fs::File::open(audio).await?;
        let stream = FramedRead::new(file, BytesCodec::new());
        let part = Part::stream_with_length(Body::wrap_stream(stream), metadata.len())
            .file_name(file_name)
            .mime_str("application/octet-stream")?;

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "srt")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        log::info!(
            "Transcribing {} ({} bytes) with {}",
            audio.display(),
            metadata.len(),
            self.model
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DubSyncError::Other(format!(
                "Transcription API error (status {}): {}",
                status, error_text
            )));
        }

        Ok(response.text().await?)
    }
}

/// Transcribe `audio` into `output`, reusing a parsable existing file.
///
/// With `sentences` set, the written document holds whole sentences.
pub async fn transcribe_to_file(
    transcriber: &dyn Transcriber,
    audio: &Path,
    output: &Path,
    sentences: bool,
) -> Result<ParsedDocument> {
    if output.exists() {
        match parse_srt_document(&tokio::fs::read_to_string(output).await?) {
            Ok(document) => {
                log::info!("Reusing transcription {}", output.display());
                return Ok(document);
            }
            Err(e) => log::warn!("Discarding unusable transcription {}: {}", output.display(), e),
        }
    }

    let mut srt = transcriber.transcribe(audio).await?;
    let mut document = parse_srt_document(&srt)?;
    if sentences {
        document.slots = merge_sentences(&document.slots);
        srt = write_srt(&document.slots);
    }
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(output, srt).await?;
    log::info!(
        "Transcription with {} subtitles written to {}",
        document.slots.len(),
        output.display()
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTranscriber {
        calls: AtomicUsize,
        response: &'static str,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, _audio: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.to_string())
        }
    }

    const SRT: &str = "1\n00:00:00,000 --> 00:00:01,500\nHello there.\n\n2\n00:00:02,000 --> 00:00:03,000\nBye.\n";

    #[tokio::test]
    async fn test_transcribe_to_file_reuses_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("subs").join("audio.srt");
        let transcriber = FakeTranscriber {
            calls: AtomicUsize::new(0),
            response: SRT,
        };

        let document = transcribe_to_file(&transcriber, Path::new("audio.mp3"), &output, false)
            .await
            .unwrap();
        assert_eq!(document.slots.len(), 2);
        assert_eq!(document.slots[0].end_ms, 1500);
        assert!(output.exists());

        transcribe_to_file(&transcriber, Path::new("audio.mp3"), &output, false)
            .await
            .unwrap();
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unparsable_transcription_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("audio.srt");
        let transcriber = FakeTranscriber {
            calls: AtomicUsize::new(0),
            response: "not subtitles",
        };

        let result = transcribe_to_file(&transcriber, Path::new("audio.mp3"), &output, true).await;
        assert!(matches!(result, Err(DubSyncError::MalformedDocument(_))));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_transcription_is_merged_into_sentences() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("audio.srt");
        let transcriber = FakeTranscriber {
            calls: AtomicUsize::new(0),
            response: "1\n00:00:00,000 --> 00:00:01,000\nWell, what\n\n\
                       2\n00:00:01,000 --> 00:00:02,500\nhappened next?\n\n\
                       3\n00:00:03,000 --> 00:00:04,000\nNobody knows.\n",
        };

        let document = transcribe_to_file(&transcriber, Path::new("audio.mp3"), &output, true)
            .await
            .unwrap();
        assert_eq!(document.slots.len(), 2);
        assert_eq!(document.slots[0].text, "Well, what happened next?");
        assert_eq!(document.slots[0].end_ms, 2500);

        // The merged document is what lands on disk
        let written = parse_srt_document(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.slots, document.slots);
    }

    #[tokio::test]
    async fn test_whisper_missing_audio() {
        let config = TranscriptionConfig {
            api_key: "key".to_string(),
            ..Default::default()
        };
        let transcriber = WhisperTranscriber::new(&config).unwrap();
        assert_eq!(
            transcriber.endpoint,
            "https://api.openai.com/v1/audio/transcriptions"
        );
        let result = transcriber.transcribe(Path::new("/nonexistent/audio.mp3")).await;
        assert!(matches!(result, Err(DubSyncError::FileNotFound(_))));
    }

    #[test]
    fn test_requires_api_key() {
        assert!(WhisperTranscriber::new(&TranscriptionConfig::default()).is_err());
    }
}
