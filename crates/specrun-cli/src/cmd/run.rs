use crate::agent::CliAgent;
use crate::cmd::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use specrun_core::orchestrator::{Pipeline, RunReport, RunRequest};
use specrun_core::schedule::ModeFlags;
use specrun_core::selector::StageSelector;
use specrun_core::types::Stage;
use specrun_core::validate::YamlValidator;
use specrun_core::SpecrunError;
use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(clap::Args, Debug, Default, Clone)]
pub struct StageFlags {
    /// All core stages: specify, plan, tasks, implement
    #[arg(short = 'a', long = "all")]
    pub all: bool,
    /// constitution
    #[arg(short = 'n')]
    pub constitution: bool,
    /// specify
    #[arg(short = 's')]
    pub specify: bool,
    /// clarify
    #[arg(short = 'r')]
    pub clarify: bool,
    /// plan
    #[arg(short = 'p')]
    pub plan: bool,
    /// tasks
    #[arg(short = 't', id = "stage_tasks")]
    pub tasks: bool,
    /// checklist
    #[arg(short = 'l')]
    pub checklist: bool,
    /// analyze
    #[arg(short = 'z')]
    pub analyze: bool,
    /// implement
    #[arg(short = 'i')]
    pub implement: bool,
}

impl StageFlags {
    pub fn selector(&self) -> StageSelector {
        let mut s = StageSelector::new();
        if self.all {
            s.set_all();
        }
        let flags = [
            (self.constitution, Stage::Constitution),
            (self.specify, Stage::Specify),
            (self.clarify, Stage::Clarify),
            (self.plan, Stage::Plan),
            (self.tasks, Stage::Tasks),
            (self.checklist, Stage::Checklist),
            (self.analyze, Stage::Analyze),
            (self.implement, Stage::Implement),
        ];
        for (set, stage) in flags {
            if set {
                s.insert(stage);
            }
        }
        s
    }
}

/// How the implement stage is split into agent sessions.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ModeArgs {
    /// One session for the whole implementation
    #[arg(long)]
    pub single_session: bool,
    /// One session per phase
    #[arg(long)]
    pub phases: bool,
    /// Run only phase N
    #[arg(long, value_name = "N")]
    pub phase: Option<u32>,
    /// Run phase N and every later phase
    #[arg(long, value_name = "N")]
    pub from_phase: Option<u32>,
    /// One session per task
    #[arg(long)]
    pub tasks: bool,
    /// Run task ID and every task after it in dependency order
    #[arg(long, value_name = "ID")]
    pub from_task: Option<String>,
    /// Re-run units whose tasks are already completed
    #[arg(long)]
    pub force_restart: bool,
}

impl ModeArgs {
    fn flags(&self) -> ModeFlags {
        ModeFlags {
            single_session: self.single_session,
            phases: self.phases,
            phase: self.phase,
            from_phase: self.from_phase,
            tasks: self.tasks,
            from_task: self.from_task.clone(),
        }
    }
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct CommonArgs {
    /// Feature directory under the specs dir (default: highest numbered)
    #[arg(long, env = "SPECRUN_FEATURE")]
    pub feature: Option<String>,
    /// Override max_retries from config
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,
    /// Proceed without asking when existing artifacts would be overwritten
    #[arg(long, short = 'y')]
    pub yes: bool,
    /// Free-text guidance passed to every agent session
    #[arg(trailing_var_arg = true)]
    pub guidance: Vec<String>,
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub stages: StageFlags,
    #[command(flatten)]
    pub mode: ModeArgs,
    #[command(flatten)]
    pub common: CommonArgs,
}

impl RunArgs {
    /// Arguments for a single-stage shorthand such as `specrun plan`.
    pub fn single(stage: Stage, common: CommonArgs, mode: ModeArgs) -> Self {
        let mut stages = StageFlags::default();
        match stage {
            Stage::Constitution => stages.constitution = true,
            Stage::Specify => stages.specify = true,
            Stage::Clarify => stages.clarify = true,
            Stage::Plan => stages.plan = true,
            Stage::Tasks => stages.tasks = true,
            Stage::Checklist => stages.checklist = true,
            Stage::Analyze => stages.analyze = true,
            Stage::Implement => stages.implement = true,
        }
        Self {
            stages,
            mode,
            common,
        }
    }

    fn request(&self) -> RunRequest {
        let guidance = self.common.guidance.join(" ");
        RunRequest {
            stages: self.stages.selector(),
            guidance: (!guidance.trim().is_empty()).then_some(guidance),
            feature: self.common.feature.clone(),
            mode_flags: self.mode.flags(),
            force_restart: self.mode.force_restart,
            max_retries: self.common.max_retries,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let request = args.request();
    if request.stages.is_empty() {
        anyhow::bail!(
            "no stages selected: pass -a or stage flags ({}) or use a stage subcommand",
            stage_flag_help()
        );
    }
    if request.stages.contains(Stage::Specify) && request.guidance.is_none() {
        anyhow::bail!("the specify stage needs a feature description: specrun specify \"<feature description>\"");
    }

    let config = load_config(root)?;
    let agent = CliAgent::new(root.to_path_buf(), config.agent.clone())?;
    let mut pipeline = Pipeline::new(root, config, agent, YamlValidator);

    let plan = pipeline.check(&request).map_err(tagged)?;
    if !plan.dependencies.is_satisfied() {
        // surfaces MissingPrerequisite with remediation
        plan.dependencies.clone().into_result().map_err(tagged)?;
    }
    if plan.dependencies.requires_confirmation && !args.common.yes {
        let names: Vec<&str> = plan.dependencies.overwrites.iter().map(|a| a.as_str()).collect();
        let question = format!("The selected stages will overwrite: {}. Continue?", names.join(", "));
        if !confirm(&question)? {
            anyhow::bail!("aborted: existing artifacts left untouched");
        }
    }

    pipeline.agent().preflight().context("agent preflight failed")?;
    let cancel = pipeline.cancel_flag();
    pipeline.agent().install_interrupt_handler(cancel.clone());

    let report = match pipeline.run(&request) {
        Ok(report) => report,
        Err(e) if cancel.is_cancelled() => {
            eprintln!("error: {e}");
            eprintln!("run interrupted; completed units are kept on disk");
            std::process::exit(130);
        }
        Err(e) => return Err(tagged(e)),
    };

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    if report.is_cancelled() {
        std::process::exit(130);
    }
    Ok(())
}

/// `-n constitution, -s specify, ...` in canonical order.
fn stage_flag_help() -> String {
    Stage::all()
        .iter()
        .map(|s| format!("-{} {s}", s.run_flag()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prefix the failure class, e.g. `retry_exhausted: plan: ...`. Preflight
/// failures also say that no agent session was started.
fn tagged(e: SpecrunError) -> anyhow::Error {
    let context = if e.is_preflight() {
        format!("{} (no agent session started)", e.kind())
    } else {
        e.kind().to_string()
    };
    anyhow::Error::new(e).context(context)
}

fn print_report(report: &RunReport) {
    if let Some(feature) = &report.feature {
        println!("Feature: {feature}");
    }
    if let Some(mode) = &report.mode {
        println!("Implementation: {mode}");
    }
    let rows = report
        .outcomes
        .iter()
        .map(|o| {
            vec![
                o.label.clone(),
                o.attempts.to_string(),
                if o.validated { "yes" } else { "-" }.to_string(),
                format!("{}s", (o.finished_at - o.started_at).num_seconds()),
            ]
        })
        .collect();
    print_table(&["UNIT", "ATTEMPTS", "VALIDATED", "TIME"], rows);
    for s in &report.skipped {
        println!("skipped {}: {}", s.label, s.reason);
    }
    if let Some(next) = &report.cancelled_before {
        println!("\nCancelled before {next}. Re-run the same command to resume.");
    }
}

/// Ask a yes/no question on stdin. A non-interactive stdin proceeds with a
/// warning.
fn confirm(question: &str) -> anyhow::Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        eprintln!("warning: {question} (non-interactive, proceeding)");
        return Ok(true);
    }
    eprint!("{question} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
