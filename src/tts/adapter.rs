//! Slot to clip adapter
//!
//! Every slot yields exactly one clip. Empty text becomes a short silence
//! without calling the service, a failed call becomes a longer silence, and a
//! clip left by a previous run is reused as is.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{ClipAudio, ClipCache, ReferenceVoice, SpeechSynthesizer, SynthesizedClip};
use crate::config::DubSyncConfig;
use crate::error::{DubSyncError, Result};
use crate::media::AudioBuffer;
use crate::outcome::Outcome;
use crate::progress::ProgressTracker;
use crate::subtitle::Slot;

/// Produces one clip per slot on top of a [`SpeechSynthesizer`]
#[derive(Clone)]
pub struct SegmentSynthesizer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    reference: Arc<ReferenceVoice>,
    cache: Arc<ClipCache>,
    empty_text_silence_ms: u64,
    failure_silence_ms: u64,
    max_concurrent_requests: usize,
}

impl SegmentSynthesizer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        reference: ReferenceVoice,
        cache: ClipCache,
        config: &DubSyncConfig,
    ) -> Self {
        Self {
            synthesizer,
            reference: Arc::new(reference),
            cache: Arc::new(cache),
            empty_text_silence_ms: config.assembly.empty_text_silence_ms,
            failure_silence_ms: config.assembly.failure_silence_ms,
            max_concurrent_requests: config.synthesis.max_concurrent_requests.max(1),
        }
    }

    pub fn cache(&self) -> &ClipCache {
        &self.cache
    }

    /// Produce the clip of one slot. Never fails: the worst case is silence.
    pub async fn synthesize_slot(&self, slot_index: usize, text: &str) -> Outcome<SynthesizedClip> {
        if text.trim().is_empty() {
            log::debug!("Slot {}: empty text, using {}ms of silence", slot_index, self.empty_text_silence_ms);
            return Outcome::Success(SynthesizedClip::silence(slot_index, self.empty_text_silence_ms));
        }

        let cache = self.cache.clone();
        let cached = tokio::task::spawn_blocking(move || cache.lookup(slot_index))
            .await
            .ok()
            .flatten();
        if let Some((path, duration)) = cached {
            log::debug!("Slot {}: reusing {} ({}ms)", slot_index, path.display(), duration);
            return Outcome::Success(SynthesizedClip::new(slot_index, duration, ClipAudio::File(path)));
        }

        match self.synthesize_uncached(slot_index, text).await {
            Ok(clip) => Outcome::Success(clip),
            Err(e) => {
                log::warn!(
                    "{}; substituting {}ms of silence",
                    e,
                    self.failure_silence_ms
                );
                Outcome::fallback(
                    SynthesizedClip::silence(slot_index, self.failure_silence_ms),
                    e.to_string(),
                )
            }
        }
    }

    async fn synthesize_uncached(&self, slot_index: usize, text: &str) -> Result<SynthesizedClip> {
        let failure = |reason: String| DubSyncError::SynthesisFailure { slot_index, reason };

        let preview: String = text.chars().take(50).collect();
        log::info!("Slot {}: synthesizing \"{}\"", slot_index, preview);

        let audio = self
            .synthesizer
            .synthesize(text, &self.reference)
            .await
            .map_err(|e| failure(e.to_string()))?;
        if audio.is_empty() {
            return Err(failure("service returned no audio".to_string()));
        }

        let path = self
            .cache
            .store(slot_index, &audio)
            .map_err(|e| failure(format!("cannot store clip: {}", e)))?;

        let clip_path = path.clone();
        let decoded = tokio::task::spawn_blocking(move || AudioBuffer::decode_file(&clip_path))
            .await
            .map_err(|e| failure(format!("decoder task failed: {}", e)))?;

        match decoded {
            Ok(buffer) if !buffer.is_empty() => Ok(SynthesizedClip::new(
                slot_index,
                buffer.span_ms(),
                ClipAudio::File(path),
            )),
            Ok(_) => {
                let _ = self.cache.remove(slot_index);
                Err(failure("service returned silent audio".to_string()))
            }
            Err(e) => {
                // A broken clip must not be picked up by the next run
                let _ = self.cache.remove(slot_index);
                Err(failure(format!("undecodable audio: {}", e)))
            }
        }
    }

    /// Synthesize every slot with a bounded worker pool.
    ///
    /// The result is ordered by slot index whatever the completion order.
    /// Only cancellation makes this fail.
    pub async fn synthesize_all(
        &self,
        slots: &[Slot],
        cancel: &CancellationToken,
        tracker: Option<&ProgressTracker>,
    ) -> Result<Vec<Outcome<SynthesizedClip>>> {
        let total = slots.len();
        log::info!(
            "Synthesizing {} slots with up to {} concurrent requests",
            total,
            self.max_concurrent_requests
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_requests));
        let mut pending = FuturesUnordered::new();

        for (i, slot) in slots.iter().enumerate() {
            let this = self.clone();
            let text = slot.text.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                Some(this.synthesize_slot(i, &text).await)
            });
            pending.push(async move { (i, handle.await) });
        }

        let mut results: Vec<Option<Outcome<SynthesizedClip>>> = vec![None; total];
        let mut completed = 0;

        while let Some((i, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Synthesis task for slot {} panicked: {}", i, e);
                    Some(Outcome::fallback(
                        SynthesizedClip::silence(i, self.failure_silence_ms),
                        format!("synthesis task failed: {}", e),
                    ))
                }
            };
            if outcome.is_some() {
                completed += 1;
                if let Some(t) = tracker {
                    t.update_step_progress(
                        completed as f32 / total.max(1) as f32 * 100.0,
                        Some(format!("Synthesized {}/{} slots", completed, total)),
                    );
                }
            }
            results[i] = outcome;
        }

        if let Some(first_missing) = results.iter().position(Option::is_none) {
            log::info!("Synthesis cancelled, slot {} was not started", first_missing);
            return Err(DubSyncError::Cancelled(first_missing));
        }

        let clips: Vec<Outcome<SynthesizedClip>> = results.into_iter().flatten().collect();
        let fallbacks = clips.iter().filter(|c| c.is_fallback()).count();
        if fallbacks > 0 {
            log::warn!("{} of {} slots fell back to silence", fallbacks, total);
        }
        Ok(clips)
    }
}
