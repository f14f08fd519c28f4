//! Phase A: initial generation of the planned files.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use forge_coordination::events::Phase;
use forge_coordination::project::{
    partition, placeholder_file, GeneratedFile, ProjectFile, ProjectImplementation,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{check_cancelled, RefinementOrchestrator};
use crate::collaborators::{FileGenerator, GenerationContext};
use crate::config::OrchestratorConfig;
use crate::errors::{ForgeError, ForgeResult};

/// Per-file retry budget.
#[derive(Debug, Clone, Copy)]
pub struct FileAttemptPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl FileAttemptPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            attempts: config.file_attempts.max(1),
            retry_delay: Duration::from_millis(config.file_retry_delay_ms),
        }
    }
}

/// Generate one file, falling back to a placeholder once every attempt
/// has failed.
///
/// Only cancellation is returned as an error.
pub async fn generate_file(
    generator: &dyn FileGenerator,
    ctx: &GenerationContext,
    file: &ProjectFile,
    existing: &ProjectImplementation,
    cancel: &CancellationToken,
    policy: FileAttemptPolicy,
) -> ForgeResult<GeneratedFile> {
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=policy.attempts {
        check_cancelled(cancel)?;
        match generator.create_file(ctx, file, existing, cancel).await {
            Ok(mut generated) => {
                // The plan owns the path; generators may echo a variant.
                generated.path = file.path.clone();
                if attempt > 1 {
                    debug!(path = %file.path, attempt, "File generated after retry");
                }
                generated.metadata.retry_count = attempt - 1;
                return Ok(generated);
            }
            Err(e) if e.is_cancelled() => return Err(ForgeError::Cancelled),
            Err(e) => {
                warn!(
                    path = %file.path,
                    attempt,
                    max_attempts = policy.attempts,
                    error = %e,
                    "File generation attempt failed"
                );
                last_error = e.to_string();
                if attempt < policy.attempts && !policy.retry_delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ForgeError::Cancelled),
                        _ = tokio::time::sleep(policy.retry_delay) => {}
                    }
                }
            }
        }
    }

    warn!(path = %file.path, attempts = policy.attempts, "Emitting placeholder file");
    Ok(placeholder_file(file, &last_error, policy.attempts))
}

pub(super) async fn run(
    orch: &RefinementOrchestrator,
    ctx: &Arc<GenerationContext>,
    structure: &[ProjectFile],
    cancel: &CancellationToken,
) -> ForgeResult<ProjectImplementation> {
    let mut implementation = ProjectImplementation::new(ctx.blueprint.id.clone());
    let groups = partition(structure);

    for group in groups {
        check_cancelled(cancel)?;
        info!(
            group = %group.kind,
            files = group.files.len(),
            sequential = group.is_foundational(),
            "Generating file group"
        );
        orch.report_detail(
            Phase::InitialGeneration,
            format!("Generating {} files", group.kind),
            Some(orch.tracker.progress() * 100.0),
            format!("{} file(s)", group.files.len()),
        );

        if group.is_foundational() {
            generate_sequential(orch, ctx, &group.files, &mut implementation, cancel).await?;
        } else {
            generate_parallel(orch, ctx, group.files, &mut implementation, cancel).await?;
        }
    }

    Ok(implementation)
}

fn record(orch: &RefinementOrchestrator, implementation: &mut ProjectImplementation, file: GeneratedFile) {
    orch.tracker.track_generated(&file.path);
    implementation.upsert(file);
}

/// Each file sees every file generated before it.
async fn generate_sequential(
    orch: &RefinementOrchestrator,
    ctx: &GenerationContext,
    files: &[ProjectFile],
    implementation: &mut ProjectImplementation,
    cancel: &CancellationToken,
) -> ForgeResult<()> {
    let generator = orch.collaborators.generator.as_ref();
    for file in files {
        check_cancelled(cancel)?;
        let generated =
            generate_file(generator, ctx, file, implementation, cancel, orch.file_policy()).await?;
        record(orch, implementation, generated);
    }
    Ok(())
}

/// Bounded fan-out over one group. Tasks read a snapshot taken at group
/// start and only return their own file.
async fn generate_parallel(
    orch: &RefinementOrchestrator,
    ctx: &Arc<GenerationContext>,
    files: Vec<ProjectFile>,
    implementation: &mut ProjectImplementation,
    cancel: &CancellationToken,
) -> ForgeResult<()> {
    let sem = Arc::new(Semaphore::new(orch.config.max_parallel_files.max(1)));
    let snapshot = Arc::new(implementation.clone());
    let policy = orch.file_policy();
    let mut join_set: JoinSet<ForgeResult<GeneratedFile>> = JoinSet::new();
    let mut pending: HashMap<tokio::task::Id, ProjectFile> = HashMap::new();

    for file in files {
        check_cancelled(cancel)?;
        let sem = sem.clone();
        let snapshot = snapshot.clone();
        let ctx = ctx.clone();
        let generator = orch.collaborators.generator.clone();
        let cancel = cancel.clone();
        let planned = file.clone();

        let handle = join_set.spawn(async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|_| ForgeError::collaborator("scheduler", "file semaphore closed"))?;
            generate_file(generator.as_ref(), &ctx, &planned, &snapshot, &cancel, policy).await
        });
        pending.insert(handle.id(), file);
    }

    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, Ok(generated))) => {
                pending.remove(&id);
                record(orch, implementation, generated);
            }
            Ok((_, Err(e))) => {
                join_set.abort_all();
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "File generation task panicked");
                if let Some(file) = pending.remove(&e.id()) {
                    record(orch, implementation, placeholder_file(&file, &e.to_string(), 1));
                }
            }
        }
    }

    Ok(())
}
