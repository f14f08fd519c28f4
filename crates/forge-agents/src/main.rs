use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forge_agents::backend;
use forge_agents::config::ForgeConfig;
use forge_agents::generator::LlmFileGenerator;
use forge_agents::planner::{LlmStructurePlanner, StaticPlanner};
use forge_agents::telemetry::init_tracing;
use forge_agents::toolchain::{
    materialize, CommandBuildService, CommandTestRunner, StructuralAnalyzer,
};
use forge_agents::{
    Collaborators, ForgeService, GenerationContext, GenerationEngine, RefinementOrchestrator,
    Reply, StructurePlanner,
};
use forge_coordination::events::{EventBus, EventBusExt, EventFilter, ForgeEvent, SharedEventBus};
use forge_coordination::metrics::MetricsLog;
use forge_coordination::project::{Blueprint, ProjectImplementation};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt; answers "busy" instead of queuing
    Ask { prompt: String },

    /// Generate and refine a project from requirements
    Generate {
        /// File with the requirement text
        #[arg(long)]
        requirements: PathBuf,

        #[arg(long)]
        blueprint: String,

        /// JSON file with the planned structure; planned by the model if absent
        #[arg(long)]
        plan: Option<PathBuf>,

        #[arg(long)]
        language: String,

        /// Directory the project is built, tested, and finally written in
        #[arg(long)]
        workspace: PathBuf,
    },
}

#[derive(Serialize)]
struct RunSummary<'a> {
    blueprint: &'a str,
    workspace: String,
    files: usize,
    placeholders: usize,
    iterations: u32,
    completeness_score: Option<f64>,
    best_score: Option<f64>,
    refinement_ms: u64,
    converged: bool,
    stop_reason: Option<&'a str>,
    iteration_metrics: &'a MetricsLog,
}

impl<'a> RunSummary<'a> {
    fn new(implementation: &'a ProjectImplementation, workspace: &Path) -> Self {
        let meta = &implementation.metadata;
        Self {
            blueprint: &implementation.blueprint_id,
            workspace: workspace.display().to_string(),
            files: implementation.len(),
            placeholders: implementation.placeholder_count(),
            iterations: meta.refinement_iterations,
            completeness_score: meta.final_completeness_score,
            best_score: meta.iteration_metrics.best_score(),
            refinement_ms: meta.iteration_metrics.total_duration_ms(),
            converged: meta.converged,
            stop_reason: meta.stop_reason.as_deref(),
            iteration_metrics: &meta.iteration_metrics,
        }
    }
}

/// Render orchestration events as log lines.
fn spawn_event_logger(bus: &SharedEventBus) -> tokio::task::JoinHandle<()> {
    let mut events =
        bus.subscribe_filtered(EventFilter::new().types(vec!["progress", "file_generated"]));
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ForgeEvent::Progress {
                    phase,
                    activity,
                    percent,
                    detail,
                    ..
                }) => info!(%phase, percent = ?percent, detail = ?detail, "{activity}"),
                Ok(ForgeEvent::FileGenerated {
                    path,
                    progress,
                    eta_secs,
                    ..
                }) => info!(
                    path = %path,
                    progress = %format!("{:.0}%", progress * 100.0),
                    eta_secs = ?eta_secs.map(|s| s.round()),
                    "File generated"
                ),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json);

    let config = ForgeConfig::load(cli.config.as_deref())?;
    let bus = EventBus::new().shared();
    let logger = spawn_event_logger(&bus);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
    }

    let backend = backend::from_config(&config.backend);
    info!(
        backend = backend.name(),
        base_url = %config.backend.base_url,
        model = %config.backend.model,
        "Opening generation engine"
    );
    let engine = Arc::new(
        GenerationEngine::open(backend, config.engine.clone(), Some(bus.clone()))
            .await
            .context("failed to open generation engine")?,
    );

    let result = match cli.command {
        Command::Ask { prompt } => ask(&engine, &prompt).await,
        Command::Generate {
            requirements,
            blueprint,
            plan,
            language,
            workspace,
        } => {
            let args = GenerateArgs {
                requirements: &requirements,
                blueprint,
                plan: plan.as_deref(),
                language,
                workspace: &workspace,
            };
            generate(&config, &engine, &bus, args, &cancel).await
        }
    };

    engine.shutdown().await;
    logger.abort();
    result
}

async fn ask(engine: &Arc<GenerationEngine>, prompt: &str) -> Result<()> {
    let service = ForgeService::new(engine.clone());
    match service.ask(prompt).await? {
        Reply::Answer(text) => println!("{text}"),
        Reply::Busy => println!("busy"),
    }
    Ok(())
}

struct GenerateArgs<'a> {
    requirements: &'a Path,
    blueprint: String,
    plan: Option<&'a Path>,
    language: String,
    workspace: &'a Path,
}

async fn generate(
    config: &ForgeConfig,
    engine: &Arc<GenerationEngine>,
    bus: &SharedEventBus,
    args: GenerateArgs<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let requirements = std::fs::read_to_string(args.requirements)
        .with_context(|| format!("failed to read {}", args.requirements.display()))?;
    let toolchain = config
        .toolchain(&args.language)
        .cloned()
        .with_context(|| format!("no toolchain configured for language {}", args.language))?;

    let collaborators = Collaborators {
        generator: Arc::new(LlmFileGenerator::new(engine.clone())),
        build: Arc::new(CommandBuildService::new(toolchain.clone(), args.workspace)),
        tests: Arc::new(CommandTestRunner::new(toolchain, args.workspace)),
        analyzer: Arc::new(StructuralAnalyzer),
    };
    let orchestrator = RefinementOrchestrator::new(collaborators, config.orchestrator.clone())
        .with_bus(bus.clone());

    let blueprint = Blueprint::new(args.blueprint).with_language(args.language.clone());
    let ctx = GenerationContext::new(requirements, blueprint, args.language);

    let planner: Box<dyn StructurePlanner> = match args.plan {
        Some(path) => Box::new(StaticPlanner::from_path(path)?),
        None => Box::new(LlmStructurePlanner::new(engine.clone())),
    };

    let implementation = orchestrator
        .plan_and_implement(ctx, planner.as_ref(), cancel)
        .await?;

    let written = materialize(args.workspace, &implementation).await?;
    info!(written, workspace = %args.workspace.display(), "Wrote implementation");

    let summary = RunSummary::new(&implementation, args.workspace);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
