//! Configuration of the dub-sync library
//!
//! One `DubSyncConfig` is built per run (from defaults, a JSON file and the
//! environment) and then handed by reference to every component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DubSyncError, Result};

/// Audio container requested from the speech synthesis service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Uncompressed WAV
    Wav,
    /// MP3
    Mp3,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::Wav
    }
}

impl AudioFormat {
    /// Value sent to the synthesis API
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }

    /// File extension of cached clips
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

/// Speech synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// API key of the synthesis service
    pub api_key: String,
    /// Base URL of the synthesis service
    pub base_url: String,
    /// Voice sample used for cloning
    pub reference_audio: Option<PathBuf>,
    /// Transcript of the voice sample
    pub reference_text: String,
    /// Speaking rate (1.0 = natural)
    pub speed: f32,
    /// Container of the synthesized clips
    pub format: AudioFormat,
    /// Per request timeout in seconds
    pub request_timeout_secs: u64,
    /// Maximum number of concurrent synthesis requests
    pub max_concurrent_requests: usize,
    /// Directory holding one clip per slot; reused across runs
    pub clip_dir: PathBuf,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.fish.audio".to_string(),
            reference_audio: None,
            reference_text: String::new(),
            speed: 1.0,
            format: AudioFormat::default(),
            request_timeout_secs: 120,
            max_concurrent_requests: 4,
            clip_dir: PathBuf::from("clips"),
        }
    }
}

/// Timeline assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Canonical sample rate of the speech track
    pub sample_rate: u32,
    /// Canonical channel count of the speech track
    pub channels: u16,
    /// Number of slots between two checkpoints of the merge buffer
    pub checkpoint_every: usize,
    /// Silence used for slots without text
    pub empty_text_silence_ms: u64,
    /// Silence substituted when synthesis fails
    pub failure_silence_ms: u64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            checkpoint_every: 5,
            empty_text_silence_ms: 100,
            failure_silence_ms: 1000,
        }
    }
}

/// Subtitle translation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// API key of the chat completion service
    pub api_key: String,
    /// Base URL of an OpenAI-compatible chat completion API
    pub base_url: String,
    /// Chat model name
    pub model: String,
    /// Language of the source subtitles
    pub source_language: String,
    /// Language to translate into
    pub target_language: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token limit
    pub max_tokens: u32,
    /// Segments sent in one tagged request
    pub batch_size: usize,
    /// Attempts per stage of the fallback chain
    pub max_attempts: usize,
    /// Pause between two batches in milliseconds
    pub batch_delay_ms: u64,
    /// Ask the model for a summary of the video before translating
    pub analyze_content: bool,
    /// Maximum number of subtitles sampled for the summary
    pub analysis_sample_size: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            source_language: "English".to_string(),
            target_language: "Chinese".to_string(),
            temperature: 0.1,
            max_tokens: 8192,
            batch_size: 50,
            max_attempts: 2,
            batch_delay_ms: 300,
            analyze_content: true,
            analysis_sample_size: 50,
        }
    }
}

/// Transcription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// API key of the transcription service
    pub api_key: String,
    /// Base URL of a Whisper-compatible API
    pub base_url: String,
    /// Transcription model
    pub model: String,
    /// ISO-639-1 language hint
    pub language: Option<String>,
    /// Join recognized cues until each ends a sentence
    pub merge_sentences: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            language: None,
            merge_sentences: true,
        }
    }
}

/// External tool settings used by the combiner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    /// ffmpeg executable
    pub ffmpeg: String,
    /// ffprobe executable
    pub ffprobe: String,
    /// demucs executable
    pub demucs: String,
    /// demucs separation model
    pub demucs_model: String,
    /// Bitrate of every encoded audio output
    pub audio_bitrate: String,
    /// Codec of the muxed subtitle stream
    pub subtitle_codec: String,
    /// amix dropout transition in seconds
    pub dropout_transition: u32,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            demucs: "demucs".to_string(),
            demucs_model: "mdx_extra_q".to_string(),
            audio_bitrate: "320k".to_string(),
            subtitle_codec: "mov_text".to_string(),
            dropout_transition: 2,
        }
    }
}

/// Library configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DubSyncConfig {
    /// Speech synthesis
    pub synthesis: SynthesisConfig,
    /// Timeline assembly and merge buffer
    pub assembly: AssemblyConfig,
    /// Subtitle translation
    pub translation: TranslationConfig,
    /// Transcription
    pub transcription: TranscriptionConfig,
    /// Mixing and muxing
    pub combiner: CombinerConfig,
    /// Remove checkpoints and intermediate mixes when the run ends
    pub cleanup_temp_files: bool,
}

impl Default for DubSyncConfig {
    fn default() -> Self {
        Self {
            synthesis: SynthesisConfig::default(),
            assembly: AssemblyConfig::default(),
            translation: TranslationConfig::default(),
            transcription: TranscriptionConfig::default(),
            combiner: CombinerConfig::default(),
            cleanup_temp_files: true,
        }
    }
}

impl DubSyncConfig {
    /// Load a configuration from a JSON file; absent fields take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DubSyncError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Fill empty API keys from the environment
    pub fn with_env(mut self) -> Self {
        fn fill(slot: &mut String, vars: &[&str]) {
            if !slot.is_empty() {
                return;
            }
            if let Some(value) = vars.iter().find_map(|var| std::env::var(var).ok()) {
                *slot = value;
            }
        }

        fill(&mut self.synthesis.api_key, &["FISH_AUDIO_API_KEY"]);
        fill(&mut self.translation.api_key, &["DEEPSEEK_API_KEY", "OPENAI_API_KEY"]);
        fill(&mut self.transcription.api_key, &["OPENAI_API_KEY"]);
        self
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.assembly.sample_rate == 0 {
            return Err(DubSyncError::Configuration("sample_rate must be positive".into()));
        }
        if self.assembly.channels == 0 {
            return Err(DubSyncError::Configuration("channels must be positive".into()));
        }
        if self.assembly.checkpoint_every == 0 {
            return Err(DubSyncError::Configuration("checkpoint_every must be positive".into()));
        }
        if self.synthesis.max_concurrent_requests == 0 {
            return Err(DubSyncError::Configuration(
                "max_concurrent_requests must be positive".into(),
            ));
        }
        if self.translation.batch_size == 0 || self.translation.max_attempts == 0 {
            return Err(DubSyncError::Configuration(
                "translation batch_size and max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}
