//! Forge: a streaming generation engine and a refinement orchestrator that
//! turns requirements into a set of source files and repairs them from
//! build, test, and analysis feedback.
//!
//! - [`engine`] owns one model session: single-flight admission, token
//!   stream monitoring, retry with back-off, response cleanup.
//! - [`orchestrator`] drives grouped initial generation and the
//!   build → test → analyze → fix loop.
//! - [`collaborators`] are the seams both sides meet at; [`generator`],
//!   [`planner`], and [`toolchain`] provide the default implementations.

#![allow(clippy::uninlined_format_args)]

pub mod backend;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod errors;
pub mod generator;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod service;
pub mod telemetry;
pub mod toolchain;

pub use collaborators::{
    BuildService, CodeAnalyzer, FileGenerator, GenerationContext, RevisionReason,
    RevisionRequest, StructurePlanner, TestRunner,
};
pub use config::ForgeConfig;
pub use engine::{ExecutorStatus, GenerationEngine, GenerationOutcome, StopReason};
pub use errors::{ForgeError, ForgeResult, GenerationError, GenerationResult, RetryCategory};
pub use orchestrator::{Collaborators, RefinementOrchestrator};
pub use service::{ForgeService, Reply};
