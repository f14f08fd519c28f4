//! Forge Coordination Library
//!
//! Deterministic building blocks of the forge generation pipeline. Nothing in
//! this crate talks to a model; the agents crate wires these pieces to an LLM
//! backend and external toolchains.
//!
//! # Modules
//!
//! - `detection`: token-level duplicate and response-level repetition detectors
//! - `conversation`: bounded chat history and prompt rendering
//! - `project`: planned/generated file model, priority grouping, placeholders
//! - `verdict`: build, test, and analysis verdict types
//! - `feedback`: routing verdicts to the files that need fixing
//! - `analysis`: structural completeness scoring
//! - `tracker`: file generation progress and ETA
//! - `metrics`: per-iteration refinement statistics
//! - `events`: broadcast bus for progress observers

#![allow(clippy::uninlined_format_args)]

pub mod analysis;
pub mod conversation;
pub mod detection;
pub mod events;
pub mod feedback;
pub mod metrics;
pub mod project;
pub mod tracker;
pub mod verdict;

pub use conversation::{ConversationContext, ConversationTurn, Role, RoleMarkers};
pub use detection::{DuplicateDetector, RepetitionDetector};
pub use events::{EventBus, ForgeEvent, Phase, SharedEventBus};
pub use metrics::{IterationMetrics, IterationOutcome, MetricsLog};
pub use project::{
    partition, placeholder_file, Blueprint, FileGroup, GeneratedFile, GroupKind, ProjectFile,
    ProjectImplementation,
};
pub use tracker::{new_run_id, FileGenerationTracker, TrackerSnapshot};
pub use verdict::{
    BuildError, BuildResult, CodeAnalysisResult, FileAnalysis, MissingFile, TestFailure,
    TestResult,
};
