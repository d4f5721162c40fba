//! ffmpeg / ffprobe invocations
//!
//! Every call runs one process to completion. A non-zero exit is an
//! `ExternalToolFailure` carrying the tail of stderr; nothing is retried.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;

use crate::config::CombinerConfig;
use crate::error::{DubSyncError, Result};

const STDERR_TAIL: usize = 2000;

/// Run `program` with `args` and fail on a non-zero exit
pub async fn run_tool(program: &str, args: &[String]) -> Result<Output> {
    log::debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DubSyncError::tool_failure(program, "not started", e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail_start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map(|(i, _)| i)
            .unwrap_or(0);
        return Err(DubSyncError::tool_failure(
            program,
            output.status,
            stderr[tail_start..].trim(),
        ));
    }

    Ok(output)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// ffmpeg and ffprobe as configured
#[derive(Debug, Clone)]
pub struct MediaTool {
    ffmpeg: String,
    ffprobe: String,
    audio_bitrate: String,
    dropout_transition: u32,
}

impl MediaTool {
    pub fn new(config: &CombinerConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
            dropout_transition: config.dropout_transition,
        }
    }

    /// First line of `ffmpeg -version`
    pub async fn version(&self) -> Result<String> {
        let output = run_tool(&self.ffmpeg, &["-version".to_string()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Run ffmpeg with the given arguments
    pub async fn ffmpeg(&self, args: &[String]) -> Result<()> {
        run_tool(&self.ffmpeg, args).await.map(|_| ())
    }

    /// Container duration in milliseconds
    pub async fn measure_duration_ms(&self, path: &Path) -> Result<u64> {
        let args: Vec<String> = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(path_arg(path)))
        .collect();

        let output = run_tool(&self.ffprobe, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_duration_ms(&stdout).ok_or_else(|| {
            DubSyncError::tool_failure(
                &self.ffprobe,
                "unparsable output",
                format!("expected a duration for {}, got {:?}", path.display(), stdout.trim()),
            )
        })
    }

    /// Mix inputs into one track lasting as long as the longest input.
    ///
    /// `weights`, when given, holds one weight per input.
    pub async fn mix(&self, inputs: &[PathBuf], weights: Option<&[f32]>, output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(DubSyncError::AudioProcessing("nothing to mix".to_string()));
        }
        if let Some(weights) = weights {
            if weights.len() != inputs.len() {
                return Err(DubSyncError::AudioProcessing(format!(
                    "{} weights for {} inputs",
                    weights.len(),
                    inputs.len()
                )));
            }
        }
        self.ffmpeg(&mix_args(inputs, weights, output, &self.audio_bitrate, self.dropout_transition))
            .await
    }
}

/// ffprobe prints the duration in seconds, or `N/A` for streams without one
fn parse_duration_ms(stdout: &str) -> Option<u64> {
    let seconds: f64 = stdout.trim().parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1000.0).round() as u64)
}

/// amix over every input
pub(crate) fn mix_args(
    inputs: &[PathBuf],
    weights: Option<&[f32]>,
    output: &Path,
    bitrate: &str,
    dropout_transition: u32,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    for path in inputs {
        args.push("-i".into());
        args.push(path_arg(path));
    }

    let mut filter = format!(
        "amix=inputs={}:duration=longest:dropout_transition={}",
        inputs.len(),
        dropout_transition
    );
    if let Some(weights) = weights {
        let weights: Vec<String> = weights.iter().map(|w| w.to_string()).collect();
        filter.push_str(&format!(":weights={}", weights.join(" ")));
    }

    args.extend([
        "-filter_complex".into(),
        filter,
        "-b:a".into(),
        bitrate.to_string(),
        path_arg(output),
    ]);
    args
}
