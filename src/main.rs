//! phaseloop CLI.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use phaseloop::adapter::{ProcessAgentAdapter, QuietMode};
use phaseloop::cancel::CancellationToken;
use phaseloop::gates::{CliGate, HeadlessGates};
use phaseloop::phase_loop::{normalize_start_phase, PhaseExecutionLoop, PhaseLoopOptions, PhaseLoopOutcome};
use phaseloop::plan_review_loop::{PlanReviewLoop, PlanReviewOptions, PlanReviewOutcome};
use phaseloop::quality::ShellQualityRunner;
use phaseloop::{Config, Result, Store};

#[derive(Parser)]
#[command(name = "phaseloop")]
#[command(author, version, about = "Author/reviewer phase execution engine")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the status of the active run for a plan.
    Status {
        plan: PathBuf,
    },

    /// Initialize `.phaseloop/` in the project root.
    Init,

    /// Print the parsed phases of a plan.
    Plan {
        plan: PathBuf,
    },

    /// Review (and auto-fix) the plan document before implementation.
    PlanReview {
        plan: PathBuf,
        #[arg(long)]
        auto: bool,
    },

    /// Run the per-phase execution loop.
    Run {
        plan: PathBuf,
        #[arg(long)]
        auto: bool,
        #[arg(long)]
        allow_dirty: bool,
        #[arg(long)]
        skip_quality: bool,
        #[arg(long)]
        start_phase: Option<String>,
    },

    /// Git worktree helper for isolating a run (thin external collaborator).
    Worktree {
        #[command(subcommand)]
        action: WorktreeAction,
    },
}

#[derive(Subcommand)]
enum WorktreeAction {
    Create { name: String },
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let project_root = std::env::current_dir()?;
    let config = Config::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    cancel.install_ctrlc()?;

    match cli.command {
        Commands::Status { plan } => cmd_status(&project_root, &plan).await,
        Commands::Init => {
            phaseloop::config::init(&project_root)?;
            println!("initialized .phaseloop/ in {}", project_root.display());
            Ok(())
        }
        Commands::Plan { plan } => cmd_plan(&plan).await,
        Commands::PlanReview { plan, auto } => cmd_plan_review(&project_root, &config, &plan, auto, cancel).await,
        Commands::Run { plan, auto, allow_dirty, skip_quality, start_phase } => {
            cmd_run(&project_root, &config, &plan, auto, allow_dirty, skip_quality, start_phase, cancel).await
        }
        Commands::Worktree { action } => cmd_worktree(action).await,
    }
}

async fn cmd_status(project_root: &PathBuf, plan: &PathBuf) -> Result<()> {
    let db_path = project_root.join(".phaseloop").join("phaseloop.db");
    let store = Store::open(&db_path).await?;
    let canonical = plan.canonicalize().map_err(phaseloop::Error::Io)?;
    let plan_path = canonical.to_string_lossy().into_owned();

    match store.get_active_run(&plan_path, phaseloop::store::RunCommand::Run).await? {
        Some(run) => println!(
            "active run {} — state {:?}, phase {:?}",
            run.id, run.current_state, run.current_phase
        ),
        None => println!("no active run for {plan_path}"),
    }
    Ok(())
}

async fn cmd_plan(plan: &PathBuf) -> Result<()> {
    let canonical = plan.canonicalize().map_err(phaseloop::Error::Io)?;
    let content = std::fs::read_to_string(&canonical)?;
    let parsed = phaseloop::plan::Plan::parse(&canonical, &content)?;
    for phase in &parsed.phases {
        let done = phase.checklist.iter().filter(|c| c.checked).count();
        println!("Phase {}: {} ({}/{} checked)", phase.number, phase.title, done, phase.checklist.len());
    }
    Ok(())
}

async fn cmd_plan_review(
    project_root: &PathBuf,
    config: &Config,
    plan: &PathBuf,
    auto: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let db_path = project_root.join(".phaseloop").join("phaseloop.db");
    let store = Store::open(&db_path).await?;
    let adapter = Arc::new(ProcessAgentAdapter::new(config.adapter.binary.clone()));
    let gates: Arc<dyn phaseloop::gates::Gates> = if auto { Arc::new(HeadlessGates) } else { Arc::new(CliGate) };

    let options = PlanReviewOptions {
        auto,
        workdir: project_root.clone(),
        project_root: project_root.clone(),
        quiet: QuietMode::Never,
        cancel,
        on_session_created: None,
    };

    let loop_runner = PlanReviewLoop::new(store, adapter, gates, config.clone(), options);
    match loop_runner.run(plan).await? {
        PlanReviewOutcome::Approved => {
            println!("plan approved");
            Ok(())
        }
        PlanReviewOutcome::Aborted { reason } => {
            eprintln!("plan review aborted: {reason}");
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    project_root: &PathBuf,
    config: &Config,
    plan: &PathBuf,
    auto: bool,
    allow_dirty: bool,
    skip_quality: bool,
    start_phase: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    if !allow_dirty {
        // Dirty-worktree detection is a thin external collaborator concern
        // (git plumbing); this CLI only honors the flag, it does not shell
        // out to git itself.
        tracing::debug!("allow_dirty not set; dirty-worktree detection left to the caller's CI wrapper");
    }

    let db_path = project_root.join(".phaseloop").join("phaseloop.db");
    let store = Store::open(&db_path).await?;
    let adapter = Arc::new(ProcessAgentAdapter::new(config.adapter.binary.clone()));
    let quality = Arc::new(ShellQualityRunner);
    let gates: Arc<dyn phaseloop::gates::Gates> = if auto { Arc::new(HeadlessGates) } else { Arc::new(CliGate) };

    let options = PhaseLoopOptions {
        auto,
        skip_quality,
        start_phase: start_phase.as_deref().map(normalize_start_phase),
        workdir: project_root.clone(),
        project_root: project_root.clone(),
        quiet: QuietMode::Never,
        cancel,
        on_session_created: None,
    };

    let loop_runner = PhaseExecutionLoop::new(store, adapter, quality, gates, config.clone(), options);
    match loop_runner.run(plan).await? {
        PhaseLoopOutcome::Completed => {
            println!("run complete");
            Ok(())
        }
        PhaseLoopOutcome::Aborted { reason } => {
            eprintln!("run aborted: {reason}");
            std::process::exit(1);
        }
    }
}

async fn cmd_worktree(action: WorktreeAction) -> Result<()> {
    match action {
        WorktreeAction::Create { name } => {
            println!("worktree mechanics are out of scope for this engine; run: git worktree add .phaseloop/worktrees/{name} -b {name}");
        }
        WorktreeAction::Remove { name } => {
            println!("run: git worktree remove .phaseloop/worktrees/{name}");
        }
    }
    Ok(())
}
