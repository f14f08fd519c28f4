//! File generation progress tracking
//!
//! Counts completed files for one run and derives a progress fraction and an
//! ETA from elapsed wall time. Safe to share between concurrent file tasks.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::events::{ForgeEvent, SharedEventBus};

#[derive(Debug, Default)]
struct TrackerState {
    run_id: String,
    total: usize,
    generated: BTreeSet<String>,
    started_at: Option<Instant>,
}

/// Snapshot of tracker progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub run_id: String,
    pub total: usize,
    pub completed: usize,
    pub progress: f64,
    pub eta: Option<Duration>,
}

/// Fresh identifier for a generation run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Default)]
pub struct FileGenerationTracker {
    state: Mutex<TrackerState>,
    bus: Option<SharedEventBus>,
}

impl FileGenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that publishes `FileGenerated` events onto `bus`.
    pub fn with_bus(bus: SharedEventBus) -> Self {
        Self {
            state: Mutex::default(),
            bus: Some(bus),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // Counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking a run of `total_files` files; clears previous state.
    pub fn init(&self, total_files: usize, run_id: impl Into<String>) {
        let mut state = self.lock();
        *state = TrackerState {
            run_id: run_id.into(),
            total: total_files,
            generated: BTreeSet::new(),
            started_at: Some(Instant::now()),
        };
        info!(run_id = %state.run_id, total_files, "File tracking started");
    }

    /// Record a completed file and notify observers. Returns current progress.
    ///
    /// A path reported twice is counted once.
    pub fn track_generated(&self, path: &str) -> f64 {
        let (event, progress) = {
            let mut state = self.lock();
            if !state.generated.insert(path.to_string()) {
                debug!(path, "File already tracked");
                return progress_of(&state);
            }
            let progress = progress_of(&state);
            let eta = eta_of(&state);
            debug!(
                path,
                completed = state.generated.len(),
                total = state.total,
                progress,
                "File generated"
            );
            let event = ForgeEvent::FileGenerated {
                run_id: state.run_id.clone(),
                path: path.to_string(),
                progress,
                eta_secs: eta.map(|d| d.as_secs_f64()),
                timestamp: Utc::now(),
            };
            (event, progress)
        };
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
        progress
    }

    /// Fraction of planned files completed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        progress_of(&self.lock())
    }

    /// Remaining time extrapolated from the average time per completed file.
    ///
    /// `None` until at least one file completed.
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        eta_of(&self.lock())
    }

    pub fn completed(&self) -> usize {
        self.lock().generated.len()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        TrackerSnapshot {
            run_id: state.run_id.clone(),
            total: state.total,
            completed: state.generated.len(),
            progress: progress_of(&state),
            eta: eta_of(&state),
        }
    }

    pub fn reset(&self) {
        *self.lock() = TrackerState::default();
    }
}

fn progress_of(state: &TrackerState) -> f64 {
    if state.total == 0 {
        return 0.0;
    }
    (state.generated.len() as f64 / state.total as f64).min(1.0)
}

fn eta_of(state: &TrackerState) -> Option<Duration> {
    let completed = state.generated.len();
    let started = state.started_at?;
    if completed == 0 {
        return None;
    }
    if completed >= state.total {
        return Some(Duration::ZERO);
    }
    let per_file = started.elapsed().as_secs_f64() / completed as f64;
    Some(Duration::from_secs_f64(
        per_file * (state.total - completed) as f64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn progress_counts_unique_paths() {
        let tracker = FileGenerationTracker::new();
        tracker.init(4, "run-1");
        assert_eq!(tracker.progress(), 0.0);
        tracker.track_generated("a.rs");
        tracker.track_generated("a.rs");
        assert_eq!(tracker.progress(), 0.25);
        tracker.track_generated("b.rs");
        assert_eq!(tracker.completed(), 2);
        assert_eq!(tracker.progress(), 0.5);
    }

    #[test]
    fn progress_is_capped() {
        let tracker = FileGenerationTracker::new();
        tracker.init(1, "run");
        tracker.track_generated("a");
        tracker.track_generated("b");
        assert_eq!(tracker.progress(), 1.0);
        assert_eq!(tracker.estimated_time_remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn eta_extrapolates_elapsed_time() {
        let tracker = FileGenerationTracker::new();
        tracker.init(4, "run");
        assert_eq!(tracker.estimated_time_remaining(), None);

        tokio::time::advance(Duration::from_secs(10)).await;
        tracker.track_generated("a");
        let eta = tracker.estimated_time_remaining().unwrap();
        assert_eq!(eta.as_secs(), 30);
    }

    #[tokio::test]
    async fn publishes_file_generated_events() {
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let tracker = FileGenerationTracker::with_bus(bus);
        tracker.init(2, "run-7");
        tracker.track_generated("src/lib.rs");

        match rx.recv().await.unwrap() {
            ForgeEvent::FileGenerated {
                run_id,
                path,
                progress,
                ..
            } => {
                assert_eq!(run_id, "run-7");
                assert_eq!(path, "src/lib.rs");
                assert_eq!(progress, 0.5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn reset_clears_state() {
        let tracker = FileGenerationTracker::new();
        tracker.init(2, "run");
        tracker.track_generated("a");
        tracker.reset();
        assert_eq!(tracker.completed(), 0);
        assert_eq!(tracker.progress(), 0.0);
        assert_eq!(tracker.snapshot().run_id, "");
    }
}
