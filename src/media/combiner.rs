//! Multi-track audio combiner
//!
//! Turns the original soundtrack and the assembled speech track into the
//! replacement audio and muxes it into the source video. Each step is a
//! single external process; a failure stops the step and is not retried.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::CombinerConfig;
use crate::error::{DubSyncError, Result};
use crate::subtitle::timecode;
use crate::utils::ffmpeg::{run_tool, MediaTool};

/// Stems produced by demucs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stems {
    pub drums: Option<PathBuf>,
    pub bass: Option<PathBuf>,
    pub other: Option<PathBuf>,
    pub vocals: Option<PathBuf>,
}

impl Stems {
    /// Search `dir` recursively for `<stem>.mp3` files
    pub fn discover(dir: &Path) -> Self {
        let mut stems = Self::default();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("mp3")
            {
                continue;
            }
            let slot = match path.file_stem().and_then(|s| s.to_str()) {
                Some("drums") => &mut stems.drums,
                Some("bass") => &mut stems.bass,
                Some("other") => &mut stems.other,
                Some("vocals") => &mut stems.vocals,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(path.to_path_buf());
            }
        }
        stems
    }

    /// Every stem except the vocals, or the names of the missing ones
    pub fn background(&self) -> std::result::Result<Vec<PathBuf>, Vec<&'static str>> {
        let named = [
            ("drums", &self.drums),
            ("bass", &self.bass),
            ("other", &self.other),
        ];
        let missing: Vec<&'static str> = named
            .iter()
            .filter(|(_, path)| path.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(named.iter().filter_map(|(_, path)| (*path).clone()).collect())
    }
}

/// Mixes background, speech and video
pub struct AudioCombiner {
    tool: MediaTool,
    demucs: String,
    demucs_model: String,
    audio_bitrate: String,
    subtitle_codec: String,
}

impl AudioCombiner {
    pub fn new(config: &CombinerConfig) -> Self {
        Self {
            tool: MediaTool::new(config),
            demucs: config.demucs.clone(),
            demucs_model: config.demucs_model.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
            subtitle_codec: config.subtitle_codec.clone(),
        }
    }

    /// Split `audio` into stems under `output_dir`
    pub async fn separate_stems(&self, audio: &Path, output_dir: &Path) -> Result<Stems> {
        log::info!("Separating stems of {} with {}", audio.display(), self.demucs_model);
        tokio::fs::create_dir_all(output_dir).await?;
        run_tool(&self.demucs, &demucs_args(audio, output_dir, &self.demucs_model)).await?;

        let stems = Stems::discover(output_dir);
        log::debug!("Discovered stems: {:?}", stems);
        Ok(stems)
    }

    /// Mix every non-vocal stem into one background track
    pub async fn mix_background(&self, stems: &Stems, output: &Path) -> Result<()> {
        let inputs = stems.background().map_err(|missing| {
            DubSyncError::tool_failure(
                &self.demucs,
                "missing stems",
                format!("no {} stem produced", missing.join(", ")),
            )
        })?;
        log::info!("Mixing {} background stems", inputs.len());
        self.tool.mix(&inputs, None, output).await
    }

    /// Lay the speech track over the background with equal weights
    pub async fn mix_speech(&self, background: &Path, speech: &Path, output: &Path) -> Result<()> {
        log::info!("Mixing speech track over background");
        let inputs = [background.to_path_buf(), speech.to_path_buf()];
        self.tool.mix(&inputs, Some(&[1.0, 1.0]), output).await
    }

    /// Replace the audio of `video`, optionally adding an SRT subtitle stream
    pub async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        subtitles: Option<&Path>,
        output: &Path,
    ) -> Result<()> {
        let subtitles = subtitles.filter(|path| {
            let usable = path.exists() && is_srt(path);
            if !usable {
                log::warn!("Ignoring subtitles {}: not an existing .srt file", path.display());
            }
            usable
        });

        log::info!("Muxing {} into {}", audio.display(), output.display());
        self.tool
            .ffmpeg(&mux_args(
                video,
                audio,
                subtitles,
                output,
                &self.audio_bitrate,
                &self.subtitle_codec,
            ))
            .await
    }

    /// How far `speech` runs past the end of `video`; `None` when it fits or
    /// either duration cannot be measured
    pub async fn speech_overshoot_ms(&self, video: &Path, speech: &Path) -> Option<u64> {
        let video_ms = self.tool.measure_duration_ms(video).await.ok()?;
        let speech_ms = self.tool.measure_duration_ms(speech).await.ok()?;
        speech_ms.checked_sub(video_ms).filter(|over| *over > 0)
    }

    /// Separate, mix and mux in one go; intermediates go to `work_dir`
    pub async fn combine(
        &self,
        video: &Path,
        original_audio: &Path,
        speech: &Path,
        subtitles: Option<&Path>,
        work_dir: &Path,
        output: &Path,
    ) -> Result<()> {
        let version = self.tool.version().await?;
        log::info!("Combining with {}", version);
        if let Some(over) = self.speech_overshoot_ms(video, speech).await {
            log::warn!(
                "Speech track runs {:.3}s past the end of the video and will be cut",
                timecode::to_seconds(over)
            );
        }

        let stems = self.separate_stems(original_audio, &work_dir.join("stems")).await?;

        let background = work_dir.join("background.mp3");
        self.mix_background(&stems, &background).await?;

        let replacement = work_dir.join("replacement.mp3");
        self.mix_speech(&background, speech, &replacement).await?;

        self.mux(video, &replacement, subtitles, output).await
    }
}

fn is_srt(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("srt"))
        .unwrap_or(false)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn demucs_args(audio: &Path, output_dir: &Path, model: &str) -> Vec<String> {
    vec![
        "--out".into(),
        path_arg(output_dir),
        "--mp3".into(),
        "-n".into(),
        model.to_string(),
        path_arg(audio),
    ]
}

pub(crate) fn mux_args(
    video: &Path,
    audio: &Path,
    subtitles: Option<&Path>,
    output: &Path,
    bitrate: &str,
    subtitle_codec: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        path_arg(video),
        "-i".into(),
        path_arg(audio),
    ];
    if let Some(subtitles) = subtitles {
        args.push("-i".into());
        args.push(path_arg(subtitles));
    }

    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        bitrate.to_string(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
    ]);
    if subtitles.is_some() {
        args.extend([
            "-map".into(),
            "2".into(),
            "-c:s".into(),
            subtitle_codec.to_string(),
        ]);
    }

    args.push("-shortest".into());
    args.push(path_arg(output));
    args
}
