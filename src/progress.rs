//! Progress tracking for long runs
//!
//! Observer pattern: a [`ProgressTracker`] turns per-step progress into a
//! weighted overall percentage and hands [`ProgressInfo`] snapshots to a
//! [`ProgressReporter`], which fans them out to its observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Snapshot of a run's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Current step
    pub step: String,
    /// Progress of the current step (0.0 - 100.0)
    pub step_progress: f32,
    /// Progress of the whole run (0.0 - 100.0)
    pub total_progress: f32,
    /// Free-form detail about the step
    pub details: Option<String>,
}

impl ProgressInfo {
    pub fn new(
        step: impl Into<String>,
        step_progress: f32,
        total_progress: f32,
        details: Option<String>,
    ) -> Self {
        Self {
            step: step.into(),
            step_progress: step_progress.clamp(0.0, 100.0),
            total_progress: total_progress.clamp(0.0, 100.0),
            details,
        }
    }
}

/// Receives progress updates
pub trait ProgressObserver: Send + Sync {
    fn on_progress_update(&self, progress: ProgressInfo);
}

/// Distributes progress updates to observers
pub trait ProgressReporter: Send + Sync {
    /// Register an observer and return its id
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize;

    /// Unregister an observer by id
    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>>;

    /// Forward an update to every observer
    fn notify_progress(&self, progress: ProgressInfo);
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reporter keeping its observers in a map
pub struct DefaultProgressReporter {
    observers: RwLock<HashMap<usize, Box<dyn ProgressObserver>>>,
    next_id: AtomicUsize,
}

impl DefaultProgressReporter {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl Default for DefaultProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for DefaultProgressReporter {
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        write(&self.observers).insert(id, observer);
        id
    }

    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        write(&self.observers).remove(&id)
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        for observer in read(&self.observers).values() {
            observer.on_progress_update(progress.clone());
        }
    }
}

/// Steps of a dubbing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStep {
    /// Reading and sorting subtitles
    SubtitleParsing,
    /// Translating subtitle text
    Translation,
    /// Synthesizing one clip per slot
    SpeechSynthesis,
    /// Laying clips out on the timeline
    TimelineAssembly,
    /// Stem separation, mixing and muxing
    AudioMixing,
}

impl ProcessStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubtitleParsing => "Parsing subtitles",
            Self::Translation => "Translating subtitles",
            Self::SpeechSynthesis => "Synthesizing speech",
            Self::TimelineAssembly => "Assembling speech track",
            Self::AudioMixing => "Mixing audio",
        }
    }

    /// Share of the whole run, in percent
    pub fn weight(&self) -> f32 {
        match self {
            Self::SubtitleParsing => 5.0,
            Self::Translation => 15.0,
            Self::SpeechSynthesis => 50.0,
            Self::TimelineAssembly => 20.0,
            Self::AudioMixing => 10.0,
        }
    }
}

/// Tracks the current step and reports weighted progress
pub struct ProgressTracker {
    reporter: Option<Box<dyn ProgressReporter>>,
    current_step: RwLock<ProcessStep>,
    step_progress: RwLock<f32>,
    total_progress: RwLock<f32>,
    completed_steps: RwLock<HashMap<ProcessStep, f32>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            reporter: None,
            current_step: RwLock::new(ProcessStep::SubtitleParsing),
            step_progress: RwLock::new(0.0),
            total_progress: RwLock::new(0.0),
            completed_steps: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_reporter(reporter: Box<dyn ProgressReporter>) -> Self {
        let mut tracker = Self::new();
        tracker.reporter = Some(reporter);
        tracker
    }

    pub fn set_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.reporter = Some(reporter);
    }

    /// Register an observer on the reporter, creating a default reporter if needed
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        self.reporter
            .get_or_insert_with(|| Box::new(DefaultProgressReporter::new()))
            .add_observer(observer)
    }

    /// Switch to `step`; the previous step counts as finished
    pub fn set_step(&self, step: ProcessStep) {
        {
            let mut current = write(&self.current_step);
            if *current == step {
                return;
            }
            write(&self.completed_steps).insert(*current, 100.0);
            *current = step;
            *write(&self.step_progress) = 0.0;
        }

        self.update_total_progress();
        self.report_progress(None);
    }

    /// Update the progress of the current step
    pub fn update_step_progress(&self, progress: f32, details: Option<String>) {
        *write(&self.step_progress) = progress.clamp(0.0, 100.0);
        self.update_total_progress();
        self.report_progress(details);
    }

    fn update_total_progress(&self) {
        let mut total = 0.0;
        let mut total_weight = 0.0;

        for (step, progress) in read(&self.completed_steps).iter() {
            total += step.weight() * progress / 100.0;
            total_weight += step.weight();
        }

        let current = *read(&self.current_step);
        if !read(&self.completed_steps).contains_key(&current) {
            total += current.weight() * *read(&self.step_progress) / 100.0;
            total_weight += current.weight();
        }

        *write(&self.total_progress) = if total_weight > 0.0 {
            (total / total_weight * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
    }

    fn report_progress(&self, details: Option<String>) {
        if let Some(reporter) = &self.reporter {
            let progress = ProgressInfo::new(
                read(&self.current_step).as_str(),
                *read(&self.step_progress),
                *read(&self.total_progress),
                details,
            );
            reporter.notify_progress(progress);
        }
    }

    /// Mark the whole run as finished
    pub fn complete(&self) {
        let current = *read(&self.current_step);
        write(&self.completed_steps).insert(current, 100.0);
        *write(&self.step_progress) = 100.0;
        *write(&self.total_progress) = 100.0;
        self.report_progress(Some("Done".to_string()));
    }

    /// Overall progress in percent
    pub fn total_progress(&self) -> f32 {
        *read(&self.total_progress)
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
