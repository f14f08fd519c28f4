//! Refinement orchestrator.
//!
//! ```text
//! plan ──▶ Phase A: grouped initial generation ──▶ Phase B: build → test → analyze → fix
//!            foundational groups: sequential           ≤ max_iterations rounds
//!            other groups: ≤ max_parallel_files        clone-and-mutate per round
//! ```
//!
//! The orchestrator never fails a run because a file or an iteration went
//! badly: per-file failures become placeholders, and a collaborator error
//! ends the loop with the last accepted implementation. Only cancellation
//! and invalid input surface as errors.

pub mod initial;
mod refine;

use std::sync::Arc;

use chrono::Utc;
use forge_coordination::events::{ForgeEvent, Phase, SharedEventBus};
use forge_coordination::project::{ProjectFile, ProjectImplementation};
use forge_coordination::tracker::{new_run_id, FileGenerationTracker};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collaborators::{
    BuildService, CodeAnalyzer, FileGenerator, GenerationContext, StructurePlanner, TestRunner,
};
use crate::config::OrchestratorConfig;
use crate::errors::{ForgeError, ForgeResult};

pub use initial::{generate_file, FileAttemptPolicy};

/// The services a run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn FileGenerator>,
    pub build: Arc<dyn BuildService>,
    pub tests: Arc<dyn TestRunner>,
    pub analyzer: Arc<dyn CodeAnalyzer>,
}

pub struct RefinementOrchestrator {
    collaborators: Collaborators,
    config: OrchestratorConfig,
    tracker: Arc<FileGenerationTracker>,
    bus: Option<SharedEventBus>,
}

impl RefinementOrchestrator {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        Self {
            collaborators,
            config,
            tracker: Arc::new(FileGenerationTracker::new()),
            bus: None,
        }
    }

    /// Publish progress and file-generated events onto `bus`.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.tracker = Arc::new(FileGenerationTracker::with_bus(bus.clone()));
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &FileGenerationTracker {
        &self.tracker
    }

    /// Plan the structure with `planner`, then implement it.
    pub async fn plan_and_implement(
        &self,
        ctx: GenerationContext,
        planner: &dyn StructurePlanner,
        cancel: &CancellationToken,
    ) -> ForgeResult<ProjectImplementation> {
        check_cancelled(cancel)?;
        self.report(Phase::Planning, "Planning project structure", None);
        let structure = planner.plan(&ctx, cancel).await?;
        self.implement(ctx, &structure, cancel).await
    }

    /// Generate `structure` and refine it until it converges or the
    /// iteration budget runs out.
    ///
    /// Always returns the last accepted implementation, with the final score
    /// and iteration count recorded in its metadata.
    pub async fn implement(
        &self,
        ctx: GenerationContext,
        structure: &[ProjectFile],
        cancel: &CancellationToken,
    ) -> ForgeResult<ProjectImplementation> {
        if structure.is_empty() {
            return Err(ForgeError::InvalidInput(
                "project structure has no files".into(),
            ));
        }
        check_cancelled(cancel)?;

        let run_id = new_run_id();
        let unique: std::collections::BTreeSet<&str> =
            structure.iter().map(|f| f.path.as_str()).collect();
        info!(
            run_id = %run_id,
            blueprint = %ctx.blueprint.id,
            files = unique.len(),
            "Starting implementation run"
        );

        let ctx = Arc::new(ctx);
        self.tracker.init(unique.len(), run_id);
        self.report(Phase::InitialGeneration, "Generating files", Some(0.0));

        let mut implementation = initial::run(self, &ctx, structure, cancel).await?;
        implementation.metadata.initial_generation_completed_at = Some(Utc::now());
        let snapshot = self.tracker.snapshot();
        info!(
            run_id = %snapshot.run_id,
            files = implementation.len(),
            tracked = snapshot.completed,
            planned = snapshot.total,
            placeholders = implementation.placeholder_count(),
            "Initial generation complete"
        );

        let implementation = refine::run(self, &ctx, structure, implementation, cancel).await?;

        let meta = &implementation.metadata;
        info!(
            iterations = meta.refinement_iterations,
            score = ?meta.final_completeness_score,
            best_score = ?meta.iteration_metrics.best_score(),
            refinement_ms = meta.iteration_metrics.total_duration_ms(),
            converged = meta.converged,
            "Implementation run finished"
        );
        self.report(
            Phase::Complete,
            if meta.converged {
                "Implementation converged"
            } else {
                "Implementation finished without converging"
            },
            Some(100.0),
        );
        Ok(implementation)
    }

    fn report(&self, phase: Phase, activity: impl Into<String>, percent: Option<f64>) {
        if let Some(bus) = &self.bus {
            bus.emit(ForgeEvent::progress(phase, activity, percent));
        }
    }

    fn report_detail(
        &self,
        phase: Phase,
        activity: impl Into<String>,
        percent: Option<f64>,
        detail: impl Into<String>,
    ) {
        if let Some(bus) = &self.bus {
            bus.emit(ForgeEvent::progress_with_detail(phase, activity, percent, detail));
        }
    }

    fn file_policy(&self) -> FileAttemptPolicy {
        FileAttemptPolicy::from_config(&self.config)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> ForgeResult<()> {
    if cancel.is_cancelled() {
        Err(ForgeError::Cancelled)
    } else {
        Ok(())
    }
}
