//! Incremental merge buffer
//!
//! Audio handed over by the assembler is converted to the canonical layout
//! and kept in memory only until the next checkpoint. Every
//! `checkpoint_every` slots the pending buffers are collapsed and appended to
//! the checkpoint file, which then stands for everything assembled so far.
//! Checkpoint writes are synchronous and a failed write ends the run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::buffer::{frames_for_ms, AudioBuffer};
use super::timeline::TimelineSink;
use crate::config::AssemblyConfig;
use crate::error::{DubSyncError, Result};
use crate::tts::{ClipAudio, SynthesizedClip};

/// Totals of a finished merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Sample frames in the output
    pub frames: u64,
    /// Output duration in milliseconds
    pub duration_ms: u64,
    /// Number of checkpoint flushes, the final one included
    pub checkpoints_written: usize,
}

/// Accumulates the speech track with periodic on-disk checkpoints.
///
/// The track is kept aligned to a millisecond position: a clip's last partial
/// millisecond is filled with silence, and silence always ends on the frame
/// of its millisecond boundary.
pub struct MergeBuffer {
    sample_rate: u32,
    channels: u16,
    checkpoint_every: usize,
    checkpoint_path: PathBuf,
    pending: Vec<AudioBuffer>,
    checkpoint_frames: u64,
    pending_frames: u64,
    position_ms: u64,
    checkpoints_written: usize,
    slots_since_checkpoint: usize,
}

impl MergeBuffer {
    /// `checkpoint_path` must not exist yet; it normally lives in the run's temp dir
    pub fn new(checkpoint_path: impl Into<PathBuf>, config: &AssemblyConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            checkpoint_every: config.checkpoint_every.max(1),
            checkpoint_path: checkpoint_path.into(),
            pending: Vec::new(),
            checkpoint_frames: 0,
            pending_frames: 0,
            position_ms: 0,
            checkpoints_written: 0,
            slots_since_checkpoint: 0,
        }
    }

    /// Append audio in any layout and return the whole milliseconds it occupies
    pub fn push(&mut self, buffer: AudioBuffer) -> Result<u64> {
        let buffer = buffer.to_format(self.sample_rate, self.channels)?;
        let span = buffer.span_ms();
        self.pending_frames += buffer.frames() as u64;
        self.pending.push(buffer);
        self.position_ms += span;
        self.fill_to_position();
        Ok(span)
    }

    /// Append silence
    pub fn push_silence(&mut self, duration_ms: u64) {
        self.position_ms += duration_ms;
        self.fill_to_position();
    }

    fn fill_to_position(&mut self) {
        let target = frames_for_ms(self.position_ms, self.sample_rate) as u64;
        let written = self.checkpoint_frames + self.pending_frames;
        if target > written {
            let missing = (target - written) as usize;
            self.pending.push(AudioBuffer::from_interleaved(
                vec![0.0; missing * self.channels as usize],
                self.sample_rate,
                self.channels,
            ));
            self.pending_frames = target - self.checkpoint_frames;
        }
    }

    /// Buffers currently held in memory
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn checkpoints_written(&self) -> usize {
        self.checkpoints_written
    }

    /// Sample frames appended so far
    pub fn frames(&self) -> u64 {
        self.checkpoint_frames + self.pending_frames
    }

    /// Duration of everything appended so far
    pub fn duration_ms(&self) -> u64 {
        self.frames() * 1000 / self.sample_rate as u64
    }

    /// Collapse the pending buffers onto the checkpoint file
    pub fn checkpoint(&mut self) -> Result<()> {
        let mut collapsed = AudioBuffer::empty(self.sample_rate, self.channels);
        for buffer in &self.pending {
            collapsed.append(buffer)?;
        }

        collapsed
            .append_to_wav(&self.checkpoint_path)
            .map_err(|e| DubSyncError::CheckpointWriteFailure {
                path: self.checkpoint_path.clone(),
                reason: e.to_string(),
            })?;

        self.checkpoint_frames += collapsed.frames() as u64;
        self.pending_frames = 0;
        self.pending.clear();
        self.checkpoints_written += 1;
        self.slots_since_checkpoint = 0;

        log::debug!(
            "Checkpoint #{}: {}ms in {}",
            self.checkpoints_written,
            self.duration_ms(),
            self.checkpoint_path.display()
        );
        Ok(())
    }

    /// Flush what is left and move the track to `output`
    pub fn finish(mut self, output: &Path) -> Result<MergeSummary> {
        self.checkpoint()?;

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // The temp dir may sit on another filesystem
        if fs::rename(&self.checkpoint_path, output).is_err() {
            fs::copy(&self.checkpoint_path, output)?;
            fs::remove_file(&self.checkpoint_path)?;
        }

        let summary = MergeSummary {
            frames: self.checkpoint_frames,
            duration_ms: self.duration_ms(),
            checkpoints_written: self.checkpoints_written,
        };
        log::info!(
            "Speech track written to {} ({}ms, {} checkpoints)",
            output.display(),
            summary.duration_ms,
            summary.checkpoints_written
        );
        Ok(summary)
    }
}

impl TimelineSink for MergeBuffer {
    fn append_silence(&mut self, duration_ms: u64) -> Result<()> {
        self.push_silence(duration_ms);
        Ok(())
    }

    fn append_clip(&mut self, clip: &SynthesizedClip) -> Result<u64> {
        match &clip.audio {
            ClipAudio::Silence => {
                self.push_silence(clip.audio_duration_ms);
                Ok(clip.audio_duration_ms)
            }
            ClipAudio::File(path) => self.push(AudioBuffer::decode_file(path)?),
        }
    }

    fn end_slot(&mut self) -> Result<()> {
        self.slots_since_checkpoint += 1;
        if self.slots_since_checkpoint >= self.checkpoint_every {
            self.checkpoint()?;
        }
        Ok(())
    }
}
