//! Feedback routing for the refinement loop
//!
//! Turns build, test, and analysis verdicts into per-file work items:
//!
//! ```text
//! BuildResult ──▶ group_build_errors ────┐
//! TestResult  ──▶ group_test_failures ───┼──▶ path → diagnostics ──▶ fix prompts
//! Analysis    ──▶ prioritize_missing ────┘          + related_files context
//! ```
//!
//! System-attributed diagnostics are dropped here with a warning so no
//! file-level fix is ever attempted for them.

pub mod association;
pub mod context;
pub mod routing;

pub use association::{associate_failure, normalized_subject, Association};
pub use context::{failing_test_sources, related_files};
pub use routing::{group_build_errors, group_test_failures, prioritize_missing, resolve_path};
