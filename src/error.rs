//! Error types for the dub-sync library
//!
//! Parsing and checkpoint failures abort a run. Synthesis and translation
//! failures are absorbed by their stage and only surface here when a caller
//! asks for the raw collaborator error.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the dub-sync library
#[derive(Debug, Error)]
pub enum DubSyncError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WAV encoding/decoding error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// A timestamp that is neither `HH:MM:SS,mmm` nor `HH:MM:SS.mmm`
    #[error("Malformed timecode: {0}")]
    MalformedTimecode(String),

    /// A subtitle document without a single valid block
    #[error("Malformed subtitle document: {0}")]
    MalformedDocument(String),

    /// The speech synthesis collaborator failed for one slot
    #[error("Speech synthesis failed for slot {slot_index}: {reason}")]
    SynthesisFailure { slot_index: usize, reason: String },

    /// The merge buffer could not persist its accumulated audio
    #[error("Failed to write checkpoint {}: {reason}", path.display())]
    CheckpointWriteFailure { path: PathBuf, reason: String },

    /// An external process (ffmpeg, ffprobe, demucs) exited unsuccessfully
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalToolFailure {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The translation response could not be aligned with the request
    #[error("Translation alignment error: {0}")]
    TranslationAlignment(String),

    /// Audio decoding, resampling or sample layout error
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The run was cancelled between two slots
    #[error("Cancelled before slot {0}")]
    Cancelled(usize),

    /// Any other error
    #[error("Other error: {0}")]
    Other(String),
}

impl DubSyncError {
    /// Shorthand for an external tool failure
    pub fn tool_failure(
        tool: impl Into<String>,
        status: impl ToString,
        stderr: impl Into<String>,
    ) -> Self {
        DubSyncError::ExternalToolFailure {
            tool: tool.into(),
            status: status.to_string(),
            stderr: stderr.into(),
        }
    }
}

impl From<&str> for DubSyncError {
    fn from(s: &str) -> Self {
        DubSyncError::Other(s.to_string())
    }
}

impl From<String> for DubSyncError {
    fn from(s: String) -> Self {
        DubSyncError::Other(s)
    }
}

/// Result type of the dub-sync library
pub type Result<T> = std::result::Result<T, DubSyncError>;
