//! Phase B: the build → test → analyze → fix convergence loop.

use std::sync::Arc;

use chrono::Utc;
use forge_coordination::events::Phase;
use forge_coordination::feedback::{
    failing_test_sources, group_build_errors, group_test_failures, prioritize_missing,
    related_files, resolve_path,
};
use forge_coordination::metrics::{IterationMetrics, IterationOutcome};
use forge_coordination::project::{ProjectFile, ProjectImplementation};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::initial::generate_file;
use super::{check_cancelled, RefinementOrchestrator};
use crate::collaborators::{GenerationContext, RevisionReason, RevisionRequest};
use crate::errors::{ForgeError, ForgeResult};
use crate::prompts;

enum Step {
    /// Keep iterating; carries files added to the plan this round.
    Continue(Vec<ProjectFile>),
    Converged,
}

pub(super) async fn run(
    orch: &RefinementOrchestrator,
    ctx: &Arc<GenerationContext>,
    structure: &[ProjectFile],
    mut accepted: ProjectImplementation,
    cancel: &CancellationToken,
) -> ForgeResult<ProjectImplementation> {
    let max_iterations = orch.config.max_iterations;
    let mut planned = structure.to_vec();

    for iteration in 1..=max_iterations {
        check_cancelled(cancel)?;
        let started = Instant::now();
        orch.report(
            Phase::Build,
            format!("Refinement iteration {iteration}/{max_iterations}"),
            Some(f64::from(iteration - 1) / f64::from(max_iterations) * 100.0),
        );

        let mut working = accepted.clone();
        let mut metrics = IterationMetrics::new(iteration, IterationOutcome::Aborted);
        let step = iterate(orch, ctx, &planned, &mut working, &mut metrics, cancel).await;
        metrics.duration_ms = started.elapsed().as_millis() as u64;

        match step {
            Ok(step) => {
                info!(
                    iteration,
                    outcome = ?metrics.outcome,
                    score = ?metrics.completeness_score,
                    files_touched = metrics.files_touched,
                    "Refinement iteration complete"
                );
                working.metadata.refinement_iterations = iteration;
                if metrics.completeness_score.is_some() {
                    working.metadata.final_completeness_score = metrics.completeness_score;
                }
                working.record_iteration(metrics);
                accepted = working;

                match step {
                    Step::Converged => {
                        accepted.metadata.converged = true;
                        break;
                    }
                    Step::Continue(added) => planned.extend(added),
                }
            }
            Err(e) if e.is_cancelled() => return Err(ForgeError::Cancelled),
            Err(e) => {
                // The working copy is discarded; the accepted state stays intact.
                warn!(iteration, error = %e, "Refinement stopped by collaborator failure");
                accepted.metadata.refinement_iterations = iteration;
                accepted.metadata.stop_reason = Some(e.to_string());
                accepted.record_iteration(metrics);
                break;
            }
        }
    }

    let meta = &mut accepted.metadata;
    // No round reached analysis: nothing has been shown complete.
    if meta.final_completeness_score.is_none() {
        meta.final_completeness_score = Some(0.0);
    }
    if !meta.converged && meta.stop_reason.is_none() {
        meta.stop_reason = Some(format!(
            "iteration budget of {max_iterations} exhausted"
        ));
    }
    meta.completed_at = Some(Utc::now());
    Ok(accepted)
}

async fn iterate(
    orch: &RefinementOrchestrator,
    ctx: &GenerationContext,
    planned: &[ProjectFile],
    working: &mut ProjectImplementation,
    metrics: &mut IterationMetrics,
    cancel: &CancellationToken,
) -> ForgeResult<Step> {
    let c = &orch.collaborators;
    let iteration = metrics.iteration;

    check_cancelled(cancel)?;
    let build = c.build.build(working, cancel).await?;
    metrics.build_success = build.success;
    metrics.build_error_count = build.errors.len();

    if !build.success {
        metrics.outcome = IterationOutcome::BuildFailed;
        orch.report_detail(
            Phase::Fix,
            "Fixing build errors",
            None,
            format!("{} error(s)", build.errors.len()),
        );
        for (path, errors) in group_build_errors(working, &build.errors) {
            check_cancelled(cancel)?;
            let reason = RevisionReason::BuildErrors(&errors);
            if revise(orch, ctx, working, &path, reason, iteration, cancel).await? {
                metrics.files_touched += 1;
            }
        }
        return Ok(Step::Continue(Vec::new()));
    }

    check_cancelled(cancel)?;
    orch.report(Phase::Test, "Running tests", None);
    let tests = c.tests.run_tests(working, cancel).await?;
    metrics.tests_run = tests.tests_run;
    metrics.tests_passed = tests.tests_passed;

    if !tests.all_passing {
        metrics.outcome = IterationOutcome::TestsFailed;
        orch.report_detail(
            Phase::Fix,
            "Fixing failing tests",
            None,
            format!("{} failure(s)", tests.failures.len()),
        );
        for (path, failures) in group_test_failures(working, &tests.failures) {
            check_cancelled(cancel)?;
            let test_sources = failing_test_sources(working, &failures);
            let reason = RevisionReason::TestFailures {
                failures: &failures,
                test_sources: &test_sources,
            };
            let content = request_revision(orch, ctx, working, &path, reason, cancel).await?;
            if apply_revision(working, &path, content, iteration) {
                metrics.files_touched += 1;
            }
        }
        return Ok(Step::Continue(Vec::new()));
    }

    check_cancelled(cancel)?;
    orch.report(Phase::Analysis, "Analyzing completeness", None);
    let analysis = c.analyzer.analyze(working, planned, cancel).await?;
    let threshold = orch.config.convergence_threshold;
    metrics.completeness_score = Some(analysis.completeness_score);
    metrics.missing_file_count = analysis.missing_files.len();

    if analysis.completeness_score >= threshold {
        metrics.outcome = IterationOutcome::Converged;
        return Ok(Step::Converged);
    }
    metrics.outcome = IterationOutcome::Incomplete;

    for file_analysis in analysis.files_below(threshold) {
        check_cancelled(cancel)?;
        let Some(path) = resolve_path(working, &file_analysis.file_path) else {
            debug!(path = %file_analysis.file_path, "Analysis names no known file");
            continue;
        };
        let reason = RevisionReason::Incomplete(file_analysis);
        if revise(orch, ctx, working, &path, reason, iteration, cancel).await? {
            metrics.files_touched += 1;
        }
    }

    let mut added = Vec::new();
    for missing in prioritize_missing(working, &analysis.missing_files) {
        check_cancelled(cancel)?;
        let file = prompts::planned_from_missing(&missing);
        info!(path = %file.path, "Generating missing file");
        let generated = generate_file(
            c.generator.as_ref(),
            ctx,
            &file,
            working,
            cancel,
            orch.file_policy(),
        )
        .await?;
        working.upsert(generated);
        metrics.files_touched += 1;
        added.push(file);
    }

    Ok(Step::Continue(added))
}

/// Revise one file and apply the result. Returns whether content changed.
async fn revise(
    orch: &RefinementOrchestrator,
    ctx: &GenerationContext,
    working: &mut ProjectImplementation,
    path: &str,
    reason: RevisionReason<'_>,
    iteration: u32,
    cancel: &CancellationToken,
) -> ForgeResult<bool> {
    let content = request_revision(orch, ctx, working, path, reason, cancel).await?;
    Ok(apply_revision(working, path, content, iteration))
}

/// Ask the generator for new content. A failed revision is logged and
/// yields `None`; the file keeps its current content.
async fn request_revision(
    orch: &RefinementOrchestrator,
    ctx: &GenerationContext,
    working: &ProjectImplementation,
    path: &str,
    reason: RevisionReason<'_>,
    cancel: &CancellationToken,
) -> ForgeResult<Option<String>> {
    let Some(file) = working.get(path) else {
        return Ok(None);
    };
    let related = related_files(working, path, orch.config.related_file_limit);
    let request = RevisionRequest {
        file,
        reason,
        related: &related,
    };

    match orch
        .collaborators
        .generator
        .revise_file(ctx, request, cancel)
        .await
    {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.is_cancelled() => Err(ForgeError::Cancelled),
        Err(e) => {
            warn!(path, reason = reason.label(), error = %e, "File revision failed, keeping current content");
            Ok(None)
        }
    }
}

fn apply_revision(
    working: &mut ProjectImplementation,
    path: &str,
    content: Option<String>,
    iteration: u32,
) -> bool {
    let (Some(content), Some(file)) = (content, working.get_mut(path)) else {
        return false;
    };
    let changed = file.revise(content, iteration);
    if !changed {
        debug!(path, "Revision returned identical content");
    }
    changed
}
