mod agent;
mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::run::{CommonArgs, ModeArgs, RunArgs, StageFlags};
use specrun_core::types::Stage;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "specrun",
    about = "Drive a feature from spec to implementation through a fixed stage pipeline",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .specrun/ or .git/)
    #[arg(long, global = true, env = "SPECRUN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Debug logging
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .specrun/config.yaml and the specs directory
    Init,

    /// Run the selected stages in canonical order
    Run(RunArgs),

    /// Check which artifacts the selected stages need, without running anything
    Deps {
        #[command(flatten)]
        stages: StageFlags,
        #[arg(long, env = "SPECRUN_FEATURE")]
        feature: Option<String>,
    },

    /// Show the task breakdown of a feature
    Status {
        #[arg(long, env = "SPECRUN_FEATURE")]
        feature: Option<String>,
    },

    /// Write or update the project constitution
    Constitution(CommonArgs),
    /// Create a new feature spec from a description
    Specify(CommonArgs),
    /// Resolve open questions in the current spec
    Clarify(CommonArgs),
    /// Produce the implementation plan
    Plan(CommonArgs),
    /// Break the plan into phased tasks
    Tasks(CommonArgs),
    /// Generate a requirements checklist
    Checklist(CommonArgs),
    /// Cross-check spec, plan and tasks for consistency
    Analyze(CommonArgs),
    /// Implement the tasks
    Implement {
        #[command(flatten)]
        mode: ModeArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Init | Commands::Deps { .. } | Commands::Status { .. } => tracing::Level::WARN,
            _ => tracing::Level::INFO,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let single = |stage: Stage, common: CommonArgs| RunArgs::single(stage, common, ModeArgs::default());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::Deps { stages, feature } => cmd::deps::run(&root, stages, feature, cli.json),
        Commands::Status { feature } => cmd::status::run(&root, feature, cli.json),
        Commands::Constitution(c) => cmd::run::run(&root, single(Stage::Constitution, c), cli.json),
        Commands::Specify(c) => cmd::run::run(&root, single(Stage::Specify, c), cli.json),
        Commands::Clarify(c) => cmd::run::run(&root, single(Stage::Clarify, c), cli.json),
        Commands::Plan(c) => cmd::run::run(&root, single(Stage::Plan, c), cli.json),
        Commands::Tasks(c) => cmd::run::run(&root, single(Stage::Tasks, c), cli.json),
        Commands::Checklist(c) => cmd::run::run(&root, single(Stage::Checklist, c), cli.json),
        Commands::Analyze(c) => cmd::run::run(&root, single(Stage::Analyze, c), cli.json),
        Commands::Implement { mode, common } => {
            cmd::run::run(&root, RunArgs::single(Stage::Implement, common, mode), cli.json)
        }
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
