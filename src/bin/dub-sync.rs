use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use dub_sync::logging::init_logger;
use dub_sync::notification::{FileProgressObserver, LogProgressObserver, ProgressBarObserver};
use dub_sync::transcription::WhisperTranscriber;
use dub_sync::translation::{write_translation_log, SubtitleTranslator};
use dub_sync::tts::FishAudioSynthesizer;
use dub_sync::{DubSync, DubSyncConfig, RunReport};

#[derive(Parser, Debug)]
#[command(name = "dub-sync")]
#[command(about = "Re-voice a video from its subtitles, keeping the speech in sync")]
struct Params {
    /// JSON configuration file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: String,

    /// Report progress as log lines instead of a progress bar
    #[arg(long = "log-progress", default_value_t = false, global = true)]
    log_progress: bool,

    /// Also append timestamped progress lines to this file
    #[arg(long = "progress-file", global = true)]
    progress_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe audio into an SRT file
    Transcribe {
        #[arg(short = 'a', long = "audio")]
        audio: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Translate an SRT file
    Translate {
        #[arg(short = 's', long = "subtitles")]
        subtitles: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Also write the content analysis and samples here
        #[arg(long = "log-file")]
        log_file: Option<PathBuf>,
    },
    /// Build the speech track of an SRT file
    Speech {
        #[arg(short = 's', long = "subtitles")]
        subtitles: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Replace the speech of a video with a speech track
    Mix {
        #[arg(short = 'v', long = "video")]
        video: PathBuf,
        #[arg(short = 'a', long = "audio")]
        audio: PathBuf,
        #[arg(long = "speech")]
        speech: PathBuf,
        #[arg(short = 's', long = "subtitles")]
        subtitles: Option<PathBuf>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Speech track and mix in one go
    Run {
        #[arg(short = 'v', long = "video")]
        video: PathBuf,
        #[arg(short = 'a', long = "audio")]
        audio: PathBuf,
        #[arg(short = 's', long = "subtitles")]
        subtitles: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Keep the speech track here instead of next to the output
        #[arg(long = "speech")]
        speech: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<DubSyncConfig> {
    let config = match path {
        Some(path) => DubSyncConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DubSyncConfig::default(),
    };
    let config = config.with_env();
    config.validate()?;
    Ok(config)
}

fn print_report(report: &RunReport) {
    log::info!(
        "{} slots assembled into {} ({}ms, {}ms past the last subtitle)",
        report.slots,
        report.speech_track.display(),
        report.assembled_ms,
        report.residual_overrun_ms
    );
    if report.skipped_blocks > 0 {
        log::warn!("{} subtitle blocks were skipped", report.skipped_blocks);
    }
    if !report.fallback_slots.is_empty() {
        println!("Slots with substitute audio: {:?}", report.fallback_slots);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();
    init_logger(&params.log_level);

    let config = load_config(params.config.as_deref())?;
    let mut dub = DubSync::new(config);
    if params.log_progress {
        dub.add_observer(Box::new(LogProgressObserver));
    } else {
        dub.add_observer(Box::new(ProgressBarObserver::default()));
    }
    if let Some(path) = &params.progress_file {
        dub.add_observer(Box::new(FileProgressObserver::new(path)));
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current slot");
            on_ctrl_c.cancel();
        }
    });

    match params.command {
        Command::Transcribe { audio, output } => {
            let transcriber = WhisperTranscriber::new(&dub.config().transcription)?;
            let document = dub.transcribe(&transcriber, &audio, &output).await?;
            println!("{} subtitles written to {}", document.slots.len(), output.display());
        }
        Command::Translate {
            subtitles,
            output,
            log_file,
        } => {
            let translator = SubtitleTranslator::from_config(&dub.config().translation)?;
            let translated = dub.translate_file(&translator, &subtitles, &output).await?;
            if let Some(log_file) = log_file {
                let original = dub_sync::subtitle::parse_srt_file(&subtitles)?;
                write_translation_log(&log_file, &original.slots, &translated)?;
            }
            if !translated.passthrough.is_empty() {
                println!("Segments left untranslated: {:?}", translated.passthrough);
            }
        }
        Command::Speech { subtitles, output } => {
            let synthesizer = Arc::new(FishAudioSynthesizer::new(&dub.config().synthesis)?);
            let report = dub
                .synthesize_speech_track(&subtitles, &output, synthesizer, &cancel)
                .await?;
            print_report(&report);
        }
        Command::Mix {
            video,
            audio,
            speech,
            subtitles,
            output,
        } => {
            dub.mix(&video, &audio, &speech, subtitles.as_deref(), &output)
                .await?;
            println!("Written {}", output.display());
        }
        Command::Run {
            video,
            audio,
            subtitles,
            output,
            speech,
        } => {
            let speech = speech.unwrap_or_else(|| output.with_extension("speech.wav"));
            let synthesizer = Arc::new(FishAudioSynthesizer::new(&dub.config().synthesis)?);
            let report = dub
                .dub(&video, &audio, &subtitles, synthesizer, &speech, &output, &cancel)
                .await?;
            print_report(&report);
            println!("Written {}", output.display());
        }
    }

    Ok(())
}
