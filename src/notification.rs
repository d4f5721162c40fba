//! Ready-made progress observers

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::progress::{ProgressInfo, ProgressObserver};

fn describe(progress: &ProgressInfo) -> String {
    match progress.details.as_deref() {
        Some(details) if !details.is_empty() => format!(
            "{}: {:.1}% (total {:.1}%), {}",
            progress.step, progress.step_progress, progress.total_progress, details
        ),
        _ => format!(
            "{}: {:.1}% (total {:.1}%)",
            progress.step, progress.step_progress, progress.total_progress
        ),
    }
}

/// Forwards progress to the `log` facade at info level
#[derive(Default)]
pub struct LogProgressObserver;

impl ProgressObserver for LogProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        log::info!("{}", describe(&progress));
    }
}

/// Keeps every update in memory
#[derive(Clone, Default)]
pub struct MemoryProgressObserver {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl MemoryProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates received so far
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}

impl ProgressObserver for MemoryProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        if let Ok(mut history) = self.history.lock() {
            history.push(progress);
        }
    }
}

/// Appends timestamped updates to a file
pub struct FileProgressObserver {
    file_path: PathBuf,
}

impl FileProgressObserver {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl ProgressObserver for FileProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let entry = format!(
            "[{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            describe(&progress)
        );

        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
        {
            Ok(mut file) => {
                let _ = file.write_all(entry.as_bytes());
            }
            Err(e) => log::warn!("Cannot write progress to {}: {}", self.file_path.display(), e),
        }
    }
}

/// Sends updates over a channel, for work running off the async runtime
pub struct ChannelProgressObserver {
    sender: UnboundedSender<ProgressInfo>,
}

impl ChannelProgressObserver {
    pub fn new(sender: UnboundedSender<ProgressInfo>) -> Self {
        Self { sender }
    }
}

impl ProgressObserver for ChannelProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        // The receiver may already be gone after a cancelled run
        let _ = self.sender.send(progress);
    }
}

/// Single-line progress bar on stderr
pub struct ProgressBarObserver {
    width: usize,
    last_progress: Mutex<f32>,
}

impl ProgressBarObserver {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            // Negative so the first update is always drawn
            last_progress: Mutex::new(-1.0),
        }
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new(40)
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let Ok(mut last_progress) = self.last_progress.lock() else {
            return;
        };

        let changed = (*last_progress - progress.total_progress).abs() >= 1.0;
        if !(changed || *last_progress < 0.0 || progress.total_progress >= 100.0) {
            return;
        }
        *last_progress = progress.total_progress;

        let filled = ((progress.total_progress / 100.0) * self.width as f32) as usize;
        let filled = filled.min(self.width);
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\r[{}{}] {:5.1}% {:<28}",
            "=".repeat(filled),
            " ".repeat(self.width - filled),
            progress.total_progress,
            progress.step
        );
        if progress.total_progress >= 100.0 {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
}
