//! Implementation-stage scheduling: which execution units run, in what order.

use crate::config::ImplementMethod;
use crate::error::{Result, SpecrunError};
use crate::task::{PhaseTasks, Task, TaskGraph};
use crate::types::TaskStatus;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// PhaseExecutionMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "target", rename_all = "snake_case")]
pub enum PhaseExecutionMode {
    SingleSession,
    AllPhases,
    SinglePhase(u32),
    FromPhase(u32),
    AllTasks,
    FromTask(String),
}

impl From<ImplementMethod> for PhaseExecutionMode {
    fn from(method: ImplementMethod) -> Self {
        match method {
            ImplementMethod::Phases => Self::AllPhases,
            ImplementMethod::Tasks => Self::AllTasks,
            ImplementMethod::SingleSession => Self::SingleSession,
        }
    }
}

impl fmt::Display for PhaseExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleSession => f.write_str("single session"),
            Self::AllPhases => f.write_str("all phases"),
            Self::SinglePhase(n) => write!(f, "phase {n} only"),
            Self::FromPhase(n) => write!(f, "from phase {n}"),
            Self::AllTasks => f.write_str("all tasks"),
            Self::FromTask(id) => write!(f, "from task {id}"),
        }
    }
}

/// Execution-mode flags as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub single_session: bool,
    pub phases: bool,
    pub phase: Option<u32>,
    pub from_phase: Option<u32>,
    pub tasks: bool,
    pub from_task: Option<String>,
}

impl ModeFlags {
    fn set_flags(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.single_session {
            set.push("--single-session");
        }
        if self.phases {
            set.push("--phases");
        }
        if self.phase.is_some() {
            set.push("--phase");
        }
        if self.from_phase.is_some() {
            set.push("--from-phase");
        }
        if self.tasks {
            set.push("--tasks");
        }
        if self.from_task.is_some() {
            set.push("--from-task");
        }
        set
    }

    pub fn is_set(&self) -> bool {
        !self.set_flags().is_empty()
    }
}

/// Pick the execution mode. An explicit flag wins outright; the configured
/// method only applies when no flag was given.
pub fn resolve_mode(flags: &ModeFlags, default: ImplementMethod) -> Result<PhaseExecutionMode> {
    let set = flags.set_flags();
    if set.len() > 1 {
        return Err(SpecrunError::ConflictingModes(set.join(", ")));
    }
    let mode = if flags.single_session {
        PhaseExecutionMode::SingleSession
    } else if flags.phases {
        PhaseExecutionMode::AllPhases
    } else if let Some(n) = flags.phase {
        PhaseExecutionMode::SinglePhase(n)
    } else if let Some(n) = flags.from_phase {
        PhaseExecutionMode::FromPhase(n)
    } else if flags.tasks {
        PhaseExecutionMode::AllTasks
    } else if let Some(id) = &flags.from_task {
        PhaseExecutionMode::FromTask(id.clone())
    } else {
        PhaseExecutionMode::from(default)
    };
    tracing::debug!(mode = %mode, explicit = !set.is_empty(), "implementation mode resolved");
    Ok(mode)
}

// ---------------------------------------------------------------------------
// ExecutionUnit
// ---------------------------------------------------------------------------

/// One isolated agent session within the implement stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum ExecutionUnit {
    Everything,
    Phase {
        number: u32,
        title: String,
        task_ids: Vec<String>,
    },
    Task {
        id: String,
        phase_number: u32,
        title: String,
    },
}

impl ExecutionUnit {
    pub fn label(&self) -> String {
        match self {
            Self::Everything => "all tasks".to_string(),
            Self::Phase { number, .. } => format!("phase {number}"),
            Self::Task { id, .. } => format!("task {id}"),
        }
    }

    /// Arguments appended to the agent prompt to scope the session.
    pub fn prompt_args(&self) -> Vec<String> {
        match self {
            Self::Everything => Vec::new(),
            Self::Phase { number, .. } => vec!["--phase".to_string(), number.to_string()],
            Self::Task { id, .. } => vec!["--task".to_string(), id.clone()],
        }
    }

    /// Tasks this unit is expected to leave `Completed`.
    pub fn task_ids(&self, graph: &TaskGraph) -> Vec<String> {
        match self {
            Self::Everything => {
                let order = graph.topological_order().unwrap_or_default();
                let held = held_tasks(&order, None);
                order
                    .iter()
                    .filter(|t| !held.contains(t.id.as_str()))
                    .map(|t| t.id.clone())
                    .collect()
            }
            Self::Phase { task_ids, .. } => task_ids.clone(),
            Self::Task { id, .. } => vec![id.clone()],
        }
    }

    fn from_phase(p: PhaseTasks) -> Self {
        Self::Phase {
            number: p.number,
            title: p.title,
            task_ids: p.task_ids,
        }
    }
}

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUnit {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub units: Vec<ExecutionUnit>,
    pub skipped: Vec<SkippedUnit>,
}

impl Schedule {
    fn skip(&mut self, label: String, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(unit = %label, reason = %reason, "skipping execution unit");
        self.skipped.push(SkippedUnit { label, reason });
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Turn a mode and a task graph into the ordered units to execute.
///
/// Fails on cycles in every mode, on an unknown `FromTask` id and on an
/// unknown phase number. Completed units are skipped in the whole-run modes
/// unless `force_restart`; an explicitly targeted phase or task always runs.
pub fn plan_units(
    mode: &PhaseExecutionMode,
    graph: &TaskGraph,
    force_restart: bool,
) -> Result<Schedule> {
    let mut schedule = Schedule::default();
    match mode {
        PhaseExecutionMode::SingleSession => {
            graph.topological_order()?;
            schedule.units.push(ExecutionUnit::Everything);
        }
        PhaseExecutionMode::AllPhases => {
            for phase in graph.phase_order()? {
                push_phase(&mut schedule, graph, phase, force_restart);
            }
        }
        PhaseExecutionMode::SinglePhase(n) => {
            let phase = graph
                .phase_order()?
                .into_iter()
                .find(|p| p.number == *n)
                .ok_or(SpecrunError::UnknownPhase(*n))?;
            schedule.units.push(ExecutionUnit::from_phase(phase));
        }
        PhaseExecutionMode::FromPhase(n) => {
            let phases = graph.phase_order()?;
            let start = phases
                .iter()
                .position(|p| p.number == *n)
                .ok_or(SpecrunError::UnknownPhase(*n))?;
            for (i, phase) in phases.into_iter().enumerate().skip(start) {
                if i == start {
                    schedule.units.push(ExecutionUnit::from_phase(phase));
                } else {
                    push_phase(&mut schedule, graph, phase, force_restart);
                }
            }
        }
        PhaseExecutionMode::AllTasks => {
            plan_tasks(&mut schedule, graph, None, force_restart)?;
        }
        PhaseExecutionMode::FromTask(id) => {
            plan_tasks(&mut schedule, graph, Some(id), force_restart)?;
        }
    }
    Ok(schedule)
}

fn push_phase(schedule: &mut Schedule, graph: &TaskGraph, phase: PhaseTasks, force_restart: bool) {
    let statuses: Vec<TaskStatus> = phase
        .task_ids
        .iter()
        .filter_map(|id| graph.get(id).map(|t| t.status))
        .collect();
    let all_completed = statuses.iter().all(|s| *s == TaskStatus::Completed);
    let settled = statuses
        .iter()
        .all(|s| matches!(s, TaskStatus::Completed | TaskStatus::Blocked));
    let all_blocked = !statuses.is_empty() && statuses.iter().all(|s| *s == TaskStatus::Blocked);

    // A forced restart treats completed tasks as pending again; blocked ones
    // stay blocked.
    let label = format!("phase {}", phase.number);
    if all_completed && !force_restart {
        schedule.skip(label, "already completed");
    } else if settled && !all_completed && (!force_restart || all_blocked) {
        schedule.skip(label, "only blocked tasks remain");
    } else {
        schedule.units.push(ExecutionUnit::from_phase(phase));
    }
}

/// Blocked tasks and everything downstream of them, except `target`.
/// `order` must list dependencies before dependents.
fn held_tasks<'g>(order: &[&'g Task], target: Option<&str>) -> HashSet<&'g str> {
    let mut held = HashSet::new();
    for &task in order {
        if target == Some(task.id.as_str()) {
            continue;
        }
        if task.status == TaskStatus::Blocked
            || task.dependencies.iter().any(|d| held.contains(d.as_str()))
        {
            held.insert(task.id.as_str());
        }
    }
    held
}

fn plan_tasks(
    schedule: &mut Schedule,
    graph: &TaskGraph,
    from: Option<&String>,
    force_restart: bool,
) -> Result<()> {
    let order = graph.topological_order()?;
    let start = match from {
        Some(id) => order
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| SpecrunError::UnknownTaskId(id.clone()))?,
        None => 0,
    };

    let held = held_tasks(&order, from.map(String::as_str));

    for (i, task) in order.iter().enumerate().skip(start) {
        let label = format!("task {}", task.id);
        let explicit = i == start && from.is_some();
        if !explicit {
            if task.status == TaskStatus::Blocked {
                let reason = task.blocked_reason.as_deref().unwrap_or("no reason given");
                tracing::warn!(task = %task.id, reason = %reason, "blocked task skipped");
                schedule.skip(label, format!("blocked: {reason}"));
                continue;
            }
            if held.contains(task.id.as_str()) {
                tracing::warn!(task = %task.id, "task depends on a blocked task, skipped");
                schedule.skip(label, "depends on a blocked task");
                continue;
            }
            if task.status == TaskStatus::Completed && !force_restart {
                schedule.skip(label, "already completed");
                continue;
            }
        }
        schedule.units.push(ExecutionUnit::Task {
            id: task.id.clone(),
            phase_number: task.phase_number,
            title: task.title.clone(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
