//! Seams between the orchestrator and the services it drives.
//!
//! Build, test, and analysis services return structured verdicts. A failed
//! build or a failing test is a normal `Ok` verdict; `Err` means the service
//! itself could not run. Every call takes the run's cancellation token.

use async_trait::async_trait;
use forge_coordination::project::{Blueprint, GeneratedFile, ProjectFile, ProjectImplementation};
use forge_coordination::verdict::{
    BuildError, BuildResult, CodeAnalysisResult, FileAnalysis, TestFailure, TestResult,
};
use tokio_util::sync::CancellationToken;

use crate::errors::ForgeResult;

/// Shared planning data for one generation run. Read-only during the run.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub requirements: String,
    pub blueprint: Blueprint,
    pub language: String,
}

impl GenerationContext {
    pub fn new(
        requirements: impl Into<String>,
        blueprint: Blueprint,
        language: impl Into<String>,
    ) -> Self {
        Self {
            requirements: requirements.into(),
            blueprint,
            language: language.into(),
        }
    }
}

/// Why a file is being regenerated.
#[derive(Debug, Clone, Copy)]
pub enum RevisionReason<'a> {
    BuildErrors(&'a [BuildError]),
    TestFailures {
        failures: &'a [TestFailure],
        test_sources: &'a [&'a GeneratedFile],
    },
    Incomplete(&'a FileAnalysis),
}

impl RevisionReason<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BuildErrors(_) => "build_errors",
            Self::TestFailures { .. } => "test_failures",
            Self::Incomplete(_) => "incomplete",
        }
    }
}

/// Inputs for regenerating one existing file.
#[derive(Debug, Clone, Copy)]
pub struct RevisionRequest<'a> {
    pub file: &'a GeneratedFile,
    pub reason: RevisionReason<'a>,
    pub related: &'a [&'a GeneratedFile],
}

#[async_trait]
pub trait BuildService: Send + Sync {
    async fn build(
        &self,
        implementation: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<BuildResult>;
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(
        &self,
        implementation: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<TestResult>;
}

#[async_trait]
pub trait CodeAnalyzer: Send + Sync {
    /// `planned` is the structure the run was asked to produce.
    async fn analyze(
        &self,
        implementation: &ProjectImplementation,
        planned: &[ProjectFile],
        cancel: &CancellationToken,
    ) -> ForgeResult<CodeAnalysisResult>;
}

/// Produces the planned file list when the caller supplies none.
#[async_trait]
pub trait StructurePlanner: Send + Sync {
    async fn plan(
        &self,
        ctx: &GenerationContext,
        cancel: &CancellationToken,
    ) -> ForgeResult<Vec<ProjectFile>>;
}

#[async_trait]
pub trait FileGenerator: Send + Sync {
    /// Generate a planned file. `existing` is a snapshot of what has been
    /// produced so far.
    async fn create_file(
        &self,
        ctx: &GenerationContext,
        file: &ProjectFile,
        existing: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<GeneratedFile>;

    /// Regenerate an existing file. Returns only the new content.
    async fn revise_file(
        &self,
        ctx: &GenerationContext,
        request: RevisionRequest<'_>,
        cancel: &CancellationToken,
    ) -> ForgeResult<String>;
}
