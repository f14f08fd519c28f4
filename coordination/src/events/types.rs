//! Event types published while a generation run is in progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline phase a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    InitialGeneration,
    Build,
    Test,
    Analysis,
    Fix,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Planning => "planning",
            Phase::InitialGeneration => "initial_generation",
            Phase::Build => "build",
            Phase::Test => "test",
            Phase::Analysis => "analysis",
            Phase::Fix => "fix",
            Phase::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// All events exposed to a presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForgeEvent {
    /// Orchestrator progress for the current phase.
    Progress {
        phase: Phase,
        activity: String,
        /// Overall progress in `[0, 100]`, when known.
        percent: Option<f64>,
        detail: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A file finished generating (successfully or as a placeholder).
    FileGenerated {
        run_id: String,
        path: String,
        /// Fraction of planned files completed, in `[0, 1]`.
        progress: f64,
        /// Estimated seconds remaining.
        eta_secs: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Periodic token-stream progress from the generation engine.
    GenerationProgress {
        tokens: usize,
        /// `None` when no token ceiling is configured.
        percent: Option<f64>,
        tokens_per_sec: f64,
        timestamp: DateTime<Utc>,
    },

    /// A flushed chunk of streamed output.
    OutputChunk { text: String, timestamp: DateTime<Utc> },
}

impl ForgeEvent {
    pub fn progress(phase: Phase, activity: impl Into<String>, percent: Option<f64>) -> Self {
        ForgeEvent::Progress {
            phase,
            activity: activity.into(),
            percent,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn progress_with_detail(
        phase: Phase,
        activity: impl Into<String>,
        percent: Option<f64>,
        detail: impl Into<String>,
    ) -> Self {
        ForgeEvent::Progress {
            phase,
            activity: activity.into(),
            percent,
            detail: Some(detail.into()),
            timestamp: Utc::now(),
        }
    }

    /// Stable snake_case name of the event variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            ForgeEvent::Progress { .. } => "progress",
            ForgeEvent::FileGenerated { .. } => "file_generated",
            ForgeEvent::GenerationProgress { .. } => "generation_progress",
            ForgeEvent::OutputChunk { .. } => "output_chunk",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ForgeEvent::Progress { timestamp, .. }
            | ForgeEvent::FileGenerated { timestamp, .. }
            | ForgeEvent::GenerationProgress { timestamp, .. }
            | ForgeEvent::OutputChunk { timestamp, .. } => *timestamp,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            ForgeEvent::FileGenerated { run_id, .. } => Some(run_id),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            ForgeEvent::Progress { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = ForgeEvent::progress(Phase::Build, "building", Some(40.0));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "build");
        assert_eq!(event.event_type(), "progress");
    }

    #[test]
    fn run_id_only_on_file_events() {
        let event = ForgeEvent::FileGenerated {
            run_id: "run-1".into(),
            path: "src/lib.rs".into(),
            progress: 0.5,
            eta_secs: Some(3.0),
            timestamp: Utc::now(),
        };
        assert_eq!(event.run_id(), Some("run-1"));
        assert!(ForgeEvent::progress(Phase::Test, "t", None).run_id().is_none());
    }
}
