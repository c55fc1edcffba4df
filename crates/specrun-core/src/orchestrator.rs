//! Pipeline orchestration: preflight checks, then stages in canonical order,
//! then the implementation units.

use crate::catalog::{validated_output, OutputFile};
use crate::config::Config;
use crate::deps::{self, DependencyCheckResult};
use crate::error::{Result, SpecrunError};
use crate::executor::{execute, unit_label, AgentInvoker, RetryPolicy, UnitOutcome, UnitRequest};
use crate::paths::{feature_dir, latest_feature, list_features, ArtifactLocations};
use crate::schedule::{plan_units, resolve_mode, ModeFlags, PhaseExecutionMode, Schedule, SkippedUnit};
use crate::selector::StageSelector;
use crate::task::TaskGraph;
use crate::types::{ArtifactKind, Stage, TaskStatus};
use crate::validate::{ArtifactValidator, ValidationIssue, ValidationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag checked between units. Setting it never interrupts a running
/// agent session.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Request / plan / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub stages: StageSelector,
    pub guidance: Option<String>,
    /// Explicit feature directory name; latest `NNN-name` otherwise.
    pub feature: Option<String>,
    pub mode_flags: ModeFlags,
    pub force_restart: bool,
    /// Overrides the configured bound.
    pub max_retries: Option<u32>,
}

/// Everything decided before the first agent invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub stages: Vec<Stage>,
    pub feature: Option<String>,
    pub dependencies: DependencyCheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PhaseExecutionMode>,
    /// Present when implement runs against a tasks artifact already on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub feature: Option<String>,
    pub stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PhaseExecutionMode>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<UnitOutcome>,
    pub skipped: Vec<SkippedUnit>,
    /// Label of the first unit not started because of cancellation.
    pub cancelled_before: Option<String>,
}

impl RunReport {
    fn new(plan: &RunPlan) -> Self {
        let now = Utc::now();
        Self {
            feature: plan.feature.clone(),
            stages: plan.stages.clone(),
            mode: plan.mode.clone(),
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
            skipped: Vec::new(),
            cancelled_before: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_before.is_some()
    }

    pub fn total_attempts(&self) -> u32 {
        self.outcomes.iter().map(|o| o.attempts).sum()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<A, V> {
    root: PathBuf,
    config: Config,
    agent: A,
    validator: V,
    cancel: CancelFlag,
}

impl<A: AgentInvoker, V: ArtifactValidator> Pipeline<A, V> {
    pub fn new(root: impl Into<PathBuf>, config: Config, agent: A, validator: V) -> Self {
        Self {
            root: root.into(),
            config,
            agent,
            validator,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Preflight without side effects; see [`plan_run`].
    pub fn check(&self, request: &RunRequest) -> Result<RunPlan> {
        plan_run(&self.root, &self.config, request)
    }

    /// Run the selected stages. Fails before any invocation on preflight
    /// errors; afterwards the first fatal stage error ends the run with
    /// earlier artifacts left on disk.
    pub fn run(&mut self, request: &RunRequest) -> Result<RunReport> {
        let plan = self.check(request)?;
        plan.dependencies.clone().into_result()?;

        let max_retries = request.max_retries.unwrap_or(self.config.max_retries);
        tracing::info!(
            stages = %request.stages,
            feature = plan.feature.as_deref().unwrap_or("-"),
            max_retries,
            "starting pipeline"
        );

        let dir = resolve_feature_dir(
            &self.root,
            &self.config,
            request.feature.as_deref(),
            request.stages.contains(Stage::Specify),
        )?;
        let mut session = Session {
            root: &self.root,
            config: &self.config,
            agent: &mut self.agent,
            validator: &self.validator,
            cancel: &self.cancel,
            policy: RetryPolicy::new(max_retries),
            request,
            locations: ArtifactLocations::new(&self.root, dir),
            report: RunReport::new(&plan),
        };

        for stage in plan.stages.iter().copied() {
            if session.cancel.is_cancelled() {
                session.cancelled(stage.to_string());
                break;
            }
            match (stage, &plan.mode) {
                (Stage::Implement, Some(mode)) => session.run_implement(mode)?,
                _ => session.run_stage(stage)?,
            }
            if session.report.is_cancelled() {
                break;
            }
        }

        let mut report = session.report;
        report.finished_at = Utc::now();
        tracing::info!(
            units = report.outcomes.len(),
            attempts = report.total_attempts(),
            cancelled = report.is_cancelled(),
            "pipeline finished"
        );
        Ok(report)
    }
}

/// Everything a run decides before invoking the agent, without side effects:
/// feature resolution, dependency check, mode resolution and, when the tasks
/// artifact already exists and the tasks stage is not selected, cycle and
/// target validation.
pub fn plan_run(root: &Path, config: &Config, request: &RunRequest) -> Result<RunPlan> {
    let stages = request.stages;
    let dir = resolve_feature_dir(
        root,
        config,
        request.feature.as_deref(),
        stages.contains(Stage::Specify),
    )?;
    let locations = ArtifactLocations::new(root, dir);
    let dependencies = deps::check(&stages, &locations);

    let (mode, schedule) = if stages.contains(Stage::Implement) {
        let mode = resolve_mode(&request.mode_flags, config.implement_method)?;
        let schedule = match locations.path_of(ArtifactKind::TasksBreakdown) {
            Some(path) if !stages.contains(Stage::Tasks) && path.is_file() => {
                let graph = TaskGraph::parse(&path)?;
                Some(plan_units(&mode, &graph, request.force_restart)?)
            }
            _ => None,
        };
        (Some(mode), schedule)
    } else {
        if request.mode_flags.is_set() {
            tracing::warn!("execution mode flags ignored: implement stage not selected");
        }
        (None, None)
    };

    Ok(RunPlan {
        stages: stages.canonical_order(),
        feature: locations.feature_name(),
        dependencies,
        mode,
        schedule,
    })
}

/// Feature directory for a run. An explicit name must exist unless specify
/// will create it; without a name the latest feature is used, or none when
/// specify is about to create a new one.
fn resolve_feature_dir(
    root: &Path,
    config: &Config,
    feature: Option<&str>,
    specify_selected: bool,
) -> Result<Option<PathBuf>> {
    match feature {
        Some(name) => {
            let dir = feature_dir(root, &config.specs_dir, name);
            if !dir.is_dir() && !specify_selected {
                return Err(SpecrunError::FeatureNotFound(name.to_string()));
            }
            Ok(Some(dir))
        }
        None if specify_selected => Ok(None),
        None => latest_dir(root, config),
    }
}

fn latest_dir(root: &Path, config: &Config) -> Result<Option<PathBuf>> {
    Ok(latest_feature(&root.join(&config.specs_dir))?
        .map(|name| feature_dir(root, &config.specs_dir, &name)))
}

/// Feature directories present before specify runs without an explicit
/// feature. Only a directory created since, or a spec rewritten since, counts
/// as specify's output.
struct FeatureBaseline {
    known: BTreeSet<String>,
    started: SystemTime,
}

impl FeatureBaseline {
    fn capture(root: &Path, config: &Config) -> Result<Self> {
        Ok(Self {
            known: list_features(&root.join(&config.specs_dir))?.into_iter().collect(),
            started: SystemTime::now(),
        })
    }

    /// Locations of the latest feature, or a failed validation when specify
    /// left no new output behind.
    fn locate(
        &self,
        root: &Path,
        config: &Config,
        output: OutputFile,
    ) -> std::result::Result<ArtifactLocations, ValidationResult> {
        let dir = latest_dir(root, config)
            .map_err(|e| ValidationResult::from_errors(vec![ValidationIssue::new("", e.to_string())]))?;
        let locations = ArtifactLocations::new(root, dir);
        if locations.feature_name().is_some() && !self.is_fresh(&locations) {
            return Err(ValidationResult::from_errors(vec![ValidationIssue::new(
                "",
                format!(
                    "specify did not create a new feature directory under {}",
                    config.specs_dir
                ),
            )
            .with_hint(format!(
                "create {}/NNN-short-name/{} numbered above every existing feature",
                config.specs_dir,
                output.filename()
            ))]));
        }
        Ok(locations)
    }

    fn is_fresh(&self, locations: &ArtifactLocations) -> bool {
        let Some(name) = locations.feature_name() else {
            return false;
        };
        if !self.known.contains(&name) {
            return true;
        }
        locations
            .path_of(ArtifactKind::Spec)
            .and_then(|p| std::fs::metadata(p).ok())
            .and_then(|m| m.modified().ok())
            .is_some_and(|modified| modified >= self.started)
    }
}

// ---------------------------------------------------------------------------
// Session: state for one run
// ---------------------------------------------------------------------------

struct Session<'p, A, V> {
    root: &'p Path,
    config: &'p Config,
    agent: &'p mut A,
    validator: &'p V,
    cancel: &'p CancelFlag,
    policy: RetryPolicy,
    request: &'p RunRequest,
    locations: ArtifactLocations,
    report: RunReport,
}

impl<A: AgentInvoker, V: ArtifactValidator> Session<'_, A, V> {
    fn cancelled(&mut self, before: String) {
        tracing::warn!(next = %before, "run cancelled");
        self.report.cancelled_before = Some(before);
    }

    fn unit_request(&self, stage: Stage, output: Option<OutputFile>) -> UnitRequest {
        UnitRequest {
            stage,
            feature: self.locations.feature_name(),
            unit: None,
            guidance: self.request.guidance.clone(),
            output_name: output.map(|o| o.filename().to_string()),
        }
    }

    fn run_stage(&mut self, stage: Stage) -> Result<()> {
        let output = validated_output(stage);
        let request = self.unit_request(stage, output);
        let redetect = stage == Stage::Specify && self.request.feature.is_none();
        let baseline = if redetect {
            Some(FeatureBaseline::capture(self.root, self.config)?)
        } else {
            None
        };

        let outcome = match output {
            Some(output) => {
                let (root, config, validator) = (self.root, self.config, self.validator);
                let locations = &self.locations;
                let baseline = baseline.as_ref();
                let mut check = || {
                    let found;
                    let locs = match baseline {
                        Some(baseline) => match baseline.locate(root, config, output) {
                            Ok(l) => {
                                found = l;
                                &found
                            }
                            Err(rejected) => return rejected,
                        },
                        None => locations,
                    };
                    match locs.output_path(output) {
                        Some(path) => validator.validate(output, &path),
                        None => ValidationResult::from_errors(vec![ValidationIssue::new(
                            "",
                            format!("no feature directory found under {}", config.specs_dir),
                        )
                        .with_hint(format!(
                            "create {}/NNN-short-name/ and write {} there",
                            config.specs_dir,
                            output.filename()
                        ))]),
                    }
                };
                execute(&mut *self.agent, self.policy, &request, Some(&mut check))?
            }
            None => execute(&mut *self.agent, self.policy, &request, None)?,
        };
        self.report.outcomes.push(outcome);

        if redetect {
            let dir = latest_dir(self.root, self.config)?;
            self.locations = ArtifactLocations::new(self.root, dir);
            self.report.feature = self.locations.feature_name();
            tracing::info!(feature = self.report.feature.as_deref().unwrap_or("-"), "feature detected");
        }
        Ok(())
    }

    fn run_implement(&mut self, mode: &PhaseExecutionMode) -> Result<()> {
        let tasks_path = self
            .locations
            .path_of(ArtifactKind::TasksBreakdown)
            .ok_or_else(|| SpecrunError::FeatureNotFound("no feature directory for implement".into()))?;
        let graph = TaskGraph::parse(&tasks_path)?;
        let schedule = plan_units(mode, &graph, self.request.force_restart)?;
        tracing::info!(
            mode = %mode,
            units = schedule.units.len(),
            skipped = schedule.skipped.len(),
            progress = %graph.summarize(),
            "implementation scheduled"
        );
        self.report.skipped.extend(schedule.skipped);

        let output = OutputFile::Artifact(ArtifactKind::TasksBreakdown);
        for unit in schedule.units {
            if self.cancel.is_cancelled() {
                self.cancelled(unit_label(Stage::Implement, Some(&unit)));
                return Ok(());
            }
            let expected = unit.task_ids(&graph);
            let request = UnitRequest {
                unit: Some(unit),
                ..self.unit_request(Stage::Implement, Some(output))
            };
            let validator = self.validator;
            let path = tasks_path.as_path();
            let mut check = || verify_progress(validator, path, &expected);
            let outcome = execute(&mut *self.agent, self.policy, &request, Some(&mut check))?;
            self.report.outcomes.push(outcome);
        }
        Ok(())
    }
}

/// The tasks artifact must stay valid and every expected task must now be
/// `Completed` (or explicitly `Blocked`).
fn verify_progress<V: ArtifactValidator>(
    validator: &V,
    path: &Path,
    expected: &[String],
) -> ValidationResult {
    let result = validator.validate(OutputFile::Artifact(ArtifactKind::TasksBreakdown), path);
    if !result.valid {
        return result;
    }
    let graph = match TaskGraph::parse(path) {
        Ok(g) => g,
        Err(e) => return ValidationResult::from_errors(vec![ValidationIssue::new("", e.to_string())]),
    };
    let errors = expected
        .iter()
        .filter_map(|id| match graph.get(id) {
            None => Some(
                ValidationIssue::new(format!("tasks[{id}]"), format!("task {id} is missing"))
                    .with_hint("do not remove tasks from the breakdown"),
            ),
            Some(t) if matches!(t.status, TaskStatus::Completed | TaskStatus::Blocked) => None,
            Some(t) => Some(
                ValidationIssue::new(
                    format!("tasks[{id}].status"),
                    format!("task {id} is still {}", t.status),
                )
                .with_hint("set status: Completed when done, or Blocked with a blocked_reason"),
            ),
        })
        .collect();
    ValidationResult::from_errors(errors)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
