//! Speech synthesis
//!
//! [`SpeechSynthesizer`] is the seam to the external voice-cloning service;
//! [`adapter::SegmentSynthesizer`] turns slots into clips on top of it.

pub mod adapter;
pub mod cache;
pub mod fish_audio;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DubSyncError, Result};

pub use adapter::SegmentSynthesizer;
pub use cache::ClipCache;
pub use fish_audio::FishAudioSynthesizer;

/// Voice sample and its transcript, sent with every synthesis request
#[derive(Debug, Clone)]
pub struct ReferenceVoice {
    pub audio: Bytes,
    pub text: String,
}

impl ReferenceVoice {
    pub fn new(audio: impl Into<Bytes>, text: impl Into<String>) -> Self {
        Self {
            audio: audio.into(),
            text: text.into(),
        }
    }

    /// Read the voice sample from disk
    pub fn load(path: &Path, text: impl Into<String>) -> Result<Self> {
        let audio = std::fs::read(path).map_err(|e| {
            DubSyncError::FileNotFound(format!("reference audio {}: {}", path.display(), e))
        })?;
        Ok(Self::new(audio, text))
    }
}

/// External text-to-speech collaborator
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in the reference voice; returns the encoded audio
    async fn synthesize(&self, text: &str, reference: &ReferenceVoice) -> Result<Bytes>;
}

/// Where the samples of a clip live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipAudio {
    /// Silence lasting the clip duration
    Silence,
    /// Encoded audio file, decoded when the clip is assembled
    File(PathBuf),
}

/// Audio produced for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedClip {
    /// Position of the slot in the sorted slot list
    pub slot_index: usize,
    /// Measured length of the audio
    pub audio_duration_ms: u64,
    pub audio: ClipAudio,
}

impl SynthesizedClip {
    pub fn new(slot_index: usize, audio_duration_ms: u64, audio: ClipAudio) -> Self {
        Self {
            slot_index,
            audio_duration_ms,
            audio,
        }
    }

    /// Silent stand-in for a slot
    pub fn silence(slot_index: usize, duration_ms: u64) -> Self {
        Self::new(slot_index, duration_ms, ClipAudio::Silence)
    }
}
