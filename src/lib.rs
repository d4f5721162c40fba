//! dub-sync: subtitle-aligned speech re-assembly for dubbing
//!
//! A subtitle document is turned into one speech clip per cue, the clips are
//! laid out on the original timeline with drift correction, and the
//! resulting speech track is mixed over the separated background of the
//! source video. Progress can be followed through [`progress`] observers.

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod notification;
pub mod outcome;
pub mod progress;
pub mod subtitle;
pub mod transcription;
pub mod translation;
pub mod tts;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use crate::config::DubSyncConfig;
pub use crate::error::{DubSyncError, Result};
pub use crate::outcome::Outcome;

use crate::media::{assemble, AssemblyReport, AudioCombiner, MergeBuffer};
use crate::notification::ChannelProgressObserver;
use crate::progress::{ProcessStep, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::subtitle::{parse_srt_file, write_srt, ParsedDocument};
use crate::transcription::{transcribe_to_file, Transcriber};
use crate::translation::{SubtitleTranslator, TranslatedSlots};
use crate::tts::{ClipCache, ReferenceVoice, SegmentSynthesizer, SpeechSynthesizer};
use crate::utils::temp::TempFileManager;

/// Outcome of a speech track run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Slots assembled
    pub slots: usize,
    /// Subtitle blocks the parser rejected
    pub skipped_blocks: usize,
    /// Slots whose synthesis failed and were filled with silence
    pub synthesis_fallbacks: Vec<usize>,
    /// Every slot that used substitute content, sorted
    pub fallback_slots: Vec<usize>,
    /// End of the last slot on the subtitle timeline
    pub nominal_end_ms: u64,
    /// Length of the assembled speech track
    pub assembled_ms: u64,
    /// Overrun still unabsorbed after the last slot
    pub residual_overrun_ms: u64,
    /// Where the speech track was written
    pub speech_track: PathBuf,
    /// Per-slot detail
    pub assembly: AssemblyReport,
}

impl RunReport {
    fn new(
        document: &ParsedDocument,
        synthesis_fallbacks: Vec<usize>,
        assembly: AssemblyReport,
        speech_track: &Path,
    ) -> Self {
        let mut fallback_slots = synthesis_fallbacks.clone();
        fallback_slots.extend(assembly.fallback_slots());
        fallback_slots.sort_unstable();
        fallback_slots.dedup();

        Self {
            slots: document.slots.len(),
            skipped_blocks: document.skipped.len(),
            synthesis_fallbacks,
            fallback_slots,
            nominal_end_ms: assembly.nominal_end_ms,
            assembled_ms: assembly.assembled_ms,
            residual_overrun_ms: assembly.residual_overrun_ms,
            speech_track: speech_track.to_path_buf(),
            assembly,
        }
    }
}

/// Entry point of the library
pub struct DubSync {
    config: DubSyncConfig,
    progress_tracker: Option<ProgressTracker>,
}

impl DubSync {
    pub fn new(config: DubSyncConfig) -> Self {
        Self {
            config,
            progress_tracker: None,
        }
    }

    pub fn with_progress_reporter(config: DubSyncConfig, reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            config,
            progress_tracker: Some(ProgressTracker::with_reporter(reporter)),
        }
    }

    pub fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.progress_tracker
            .get_or_insert_with(ProgressTracker::new)
            .set_reporter(reporter);
    }

    /// Add a progress observer, returning its id
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        self.progress_tracker
            .get_or_insert_with(ProgressTracker::new)
            .add_observer(observer)
    }

    pub fn config(&self) -> &DubSyncConfig {
        &self.config
    }

    fn tracker(&self) -> Option<&ProgressTracker> {
        self.progress_tracker.as_ref()
    }

    fn step(&self, step: ProcessStep, details: &str) {
        if let Some(t) = self.tracker() {
            t.set_step(step);
            t.update_step_progress(0.0, Some(details.to_string()));
        }
    }

    fn step_done(&self, details: String) {
        if let Some(t) = self.tracker() {
            t.update_step_progress(100.0, Some(details));
        }
    }

    /// Voice sample configured for cloning
    pub fn reference_voice(&self) -> Result<ReferenceVoice> {
        let path = self.config.synthesis.reference_audio.as_ref().ok_or_else(|| {
            DubSyncError::Configuration("synthesis.reference_audio is not set".to_string())
        })?;
        ReferenceVoice::load(path, self.config.synthesis.reference_text.clone())
    }

    /// Clip directory; relative paths are taken from the speech track's directory
    fn clip_dir(&self, speech_track: &Path) -> PathBuf {
        let clip_dir = &self.config.synthesis.clip_dir;
        if clip_dir.is_absolute() {
            return clip_dir.clone();
        }
        speech_track
            .parent()
            .map(|parent| parent.join(clip_dir))
            .unwrap_or_else(|| clip_dir.clone())
    }

    /// Transcribe `audio` into an SRT file
    pub async fn transcribe(
        &self,
        transcriber: &dyn Transcriber,
        audio: &Path,
        output: &Path,
    ) -> Result<ParsedDocument> {
        self.step(ProcessStep::SubtitleParsing, "Transcribing audio");
        let document = transcribe_to_file(
            transcriber,
            audio,
            output,
            self.config.transcription.merge_sentences,
        )
        .await?;
        self.step_done(format!("{} subtitles transcribed", document.slots.len()));
        Ok(document)
    }

    /// Translate an SRT file, keeping every cue and its timing
    pub async fn translate_file(
        &self,
        translator: &SubtitleTranslator,
        input: &Path,
        output: &Path,
    ) -> Result<TranslatedSlots> {
        self.step(ProcessStep::SubtitleParsing, "Parsing subtitles");
        let document = parse_srt_file(input)?;
        self.step_done(format!("{} subtitles", document.slots.len()));

        self.step(ProcessStep::Translation, "Translating subtitles");
        let translated = translator
            .translate_slots(&document.slots, self.tracker())
            .await;
        tokio::fs::write(output, write_srt(&translated.slots)).await?;

        log::info!(
            "Translated subtitles written to {} ({} kept in the original language)",
            output.display(),
            translated.passthrough.len()
        );
        Ok(translated)
    }

    /// Build the speech track of `subtitles` with the configured reference voice
    pub async fn synthesize_speech_track(
        &self,
        subtitles: &Path,
        output: &Path,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let reference = self.reference_voice()?;
        self.synthesize_speech_track_with(subtitles, output, synthesizer, reference, cancel)
            .await
    }

    /// Build the speech track of `subtitles` with an explicit reference voice
    pub async fn synthesize_speech_track_with(
        &self,
        subtitles: &Path,
        output: &Path,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        reference: ReferenceVoice,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        self.config.validate()?;
        log::info!("Building speech track for {}", subtitles.display());

        self.step(ProcessStep::SubtitleParsing, "Parsing subtitles");
        let document = parse_srt_file(subtitles)?;
        self.step_done(format!("{} slots", document.slots.len()));

        self.step(ProcessStep::SpeechSynthesis, "Synthesizing speech");
        let cache = ClipCache::new(
            self.clip_dir(output),
            self.config.synthesis.format.extension(),
        )?;
        let adapter = SegmentSynthesizer::new(synthesizer, reference, cache, &self.config);
        let outcomes = adapter
            .synthesize_all(&document.slots, cancel, self.tracker())
            .await?;

        let synthesis_fallbacks: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_fallback())
            .map(|(i, _)| i)
            .collect();
        if !synthesis_fallbacks.is_empty() {
            log::warn!(
                "{} slots fell back to silence: {:?}",
                synthesis_fallbacks.len(),
                synthesis_fallbacks
            );
        }
        let clips: Vec<_> = outcomes.into_iter().map(Outcome::into_value).collect();

        self.step(ProcessStep::TimelineAssembly, "Assembling speech track");
        let temp = TempFileManager::new(self.config.cleanup_temp_files)?;
        let checkpoint = temp.create_temp_file("checkpoint", "wav");
        let assembly_config = self.config.assembly.clone();
        let slots = document.slots.clone();
        let track = output.to_path_buf();
        let cancel_token = cancel.clone();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        // Decoding, resampling and checkpoint writes all block
        let task = tokio::task::spawn_blocking(move || -> Result<AssemblyReport> {
            let mut local = ProgressTracker::new();
            local.add_observer(Box::new(ChannelProgressObserver::new(progress_tx)));

            let mut buffer = MergeBuffer::new(checkpoint, &assembly_config);
            let assembly = assemble(&slots, &clips, &mut buffer, &cancel_token, Some(&local))?;
            let summary = buffer.finish(&track)?;
            log::debug!("Merge summary: {:?}", summary);
            Ok(assembly)
        });
        while let Some(progress) = progress_rx.recv().await {
            if let Some(t) = self.tracker() {
                t.update_step_progress(progress.step_progress, progress.details);
            }
        }
        let assembly = task
            .await
            .map_err(|e| DubSyncError::Other(format!("assembly task failed: {}", e)))??;
        drop(temp);

        let report = RunReport::new(&document, synthesis_fallbacks, assembly, output);
        self.step_done(format!(
            "{} slots, {} with substitute audio",
            report.slots,
            report.fallback_slots.len()
        ));
        Ok(report)
    }

    /// Replace the speech of `video` with `speech` over the original background
    pub async fn mix(
        &self,
        video: &Path,
        original_audio: &Path,
        speech: &Path,
        subtitles: Option<&Path>,
        output: &Path,
    ) -> Result<()> {
        for (path, description) in [(video, "video"), (original_audio, "audio"), (speech, "speech track")] {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(DubSyncError::FileNotFound(format!(
                    "{} file {}",
                    description,
                    path.display()
                )));
            }
        }

        self.step(ProcessStep::AudioMixing, "Mixing audio");
        let temp = TempFileManager::new(self.config.cleanup_temp_files)?;
        let work_dir = temp.create_subdir("mix")?;
        AudioCombiner::new(&self.config.combiner)
            .combine(video, original_audio, speech, subtitles, &work_dir, output)
            .await?;
        self.step_done(format!("Written {}", output.display()));
        Ok(())
    }

    /// Speech track and mix in one run
    #[allow(clippy::too_many_arguments)]
    pub async fn dub(
        &self,
        video: &Path,
        original_audio: &Path,
        subtitles: &Path,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        speech_track: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let report = self
            .synthesize_speech_track(subtitles, speech_track, synthesizer, cancel)
            .await?;
        self.mix(video, original_audio, speech_track, Some(subtitles), output)
            .await?;

        if let Some(t) = self.tracker() {
            t.complete();
        }
        log::info!("Dubbing completed: {}", output.display());
        Ok(report)
    }
}
