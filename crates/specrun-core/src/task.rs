//! Task graph parsed from the tasks-breakdown artifact (`tasks.yaml`).
//!
//! ```yaml
//! phases:
//!   - number: 1
//!     title: Setup
//!     tasks:
//!       - id: T001
//!         title: Create project skeleton
//!         status: Completed
//!       - id: T002
//!         title: Add config loader
//!         status: Pending
//!         dependencies: [T001]
//! ```

use crate::error::{Result, SpecrunError};
use crate::types::TaskStatus;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksDocument {
    pub phases: Vec<PhaseEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub title: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

// ---------------------------------------------------------------------------
// Task / Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub phase_number: u32,
    pub title: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub number: u32,
    pub title: String,
}

/// One phase with its tasks in dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTasks {
    pub number: u32,
    pub title: String,
    pub task_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// TaskGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaskGraph {
    phases: Vec<Phase>,
    /// Phase order, then declaration order within each phase.
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

impl TaskGraph {
    pub fn parse(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| SpecrunError::TaskParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse_str(&data).map_err(|e| match e {
            SpecrunError::TaskParse { message, .. } => SpecrunError::TaskParse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn parse_str(data: &str) -> Result<Self> {
        let doc: TasksDocument = serde_yaml::from_str(data).map_err(|e| SpecrunError::TaskParse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: TasksDocument) -> Result<Self> {
        let parse_err = |message: String| SpecrunError::TaskParse {
            path: "<inline>".to_string(),
            message,
        };

        let mut entries = doc.phases;
        entries.sort_by_key(|p| p.number);

        let mut phases = Vec::with_capacity(entries.len());
        let mut tasks = Vec::new();
        let mut index = HashMap::new();

        for entry in entries {
            if phases.iter().any(|p: &Phase| p.number == entry.number) {
                return Err(parse_err(format!("duplicate phase number {}", entry.number)));
            }
            phases.push(Phase {
                number: entry.number,
                title: entry.title,
            });
            for t in entry.tasks {
                if index.contains_key(&t.id) {
                    return Err(parse_err(format!("duplicate task id {}", t.id)));
                }
                let mut seen = HashSet::new();
                let dependencies: Vec<String> = t
                    .dependencies
                    .into_iter()
                    .filter(|d| seen.insert(d.clone()))
                    .collect();
                let blocked_reason = match t.status {
                    TaskStatus::Blocked => t.blocked_reason,
                    _ => None,
                };
                index.insert(t.id.clone(), tasks.len());
                tasks.push(Task {
                    id: t.id,
                    phase_number: entry.number,
                    title: t.title,
                    status: t.status,
                    blocked_reason,
                    dependencies,
                });
            }
        }

        let graph = Self {
            phases,
            tasks,
            index,
        };
        for (task, dep) in graph.dangling_dependencies() {
            tracing::warn!(task = %task, dependency = %dep, "dependency on unknown task ignored");
        }
        Ok(graph)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn phase(&self, number: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.number == number)
    }

    /// `(task, dependency)` pairs whose dependency is not in the graph.
    pub fn dangling_dependencies(&self) -> Vec<(&str, &str)> {
        self.tasks
            .iter()
            .flat_map(|t| {
                t.dependencies
                    .iter()
                    .filter(|d| !self.index.contains_key(d.as_str()))
                    .map(move |d| (t.id.as_str(), d.as_str()))
            })
            .collect()
    }

    /// Tasks ordered so every task follows the tasks it depends on.
    ///
    /// Depth-first over declaration order, so tasks without a mutual
    /// dependency keep their relative order. Reaching a task that is still
    /// on the DFS stack is a [`SpecrunError::Cycle`] naming the loop.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let mut marks = vec![Mark::White; self.tasks.len()];
        let mut out = Vec::with_capacity(self.tasks.len());
        for i in 0..self.tasks.len() {
            if marks[i] == Mark::White {
                self.visit(i, &mut marks, &mut out)?;
            }
        }
        Ok(out.into_iter().map(|i| &self.tasks[i]).collect())
    }

    /// Iterative DFS from `root`. Each frame is a task and the index of its
    /// next dependency, so chain length is bounded by memory, not the call
    /// stack.
    fn visit(&self, root: usize, marks: &mut [Mark], out: &mut Vec<usize>) -> Result<()> {
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::Gray;
        while let Some(frame) = frames.last_mut() {
            let (i, next) = *frame;
            let Some(dep) = self.tasks[i].dependencies.get(next) else {
                frames.pop();
                marks[i] = Mark::Black;
                out.push(i);
                continue;
            };
            frame.1 += 1;
            let Some(&j) = self.index.get(dep) else {
                continue;
            };
            match marks[j] {
                Mark::Black => {}
                Mark::White => {
                    marks[j] = Mark::Gray;
                    frames.push((j, 0));
                }
                Mark::Gray => {
                    let start = frames.iter().position(|&(k, _)| k == j).unwrap_or(0);
                    let mut ids: Vec<String> = frames[start..]
                        .iter()
                        .map(|&(k, _)| self.tasks[k].id.clone())
                        .collect();
                    ids.push(self.tasks[j].id.clone());
                    return Err(SpecrunError::Cycle { ids });
                }
            }
        }
        Ok(())
    }

    /// Phases by number, each with its tasks in topological order.
    pub fn phase_order(&self) -> Result<Vec<PhaseTasks>> {
        let order = self.topological_order()?;
        let mut result: Vec<PhaseTasks> = self
            .phases
            .iter()
            .map(|p| PhaseTasks {
                number: p.number,
                title: p.title.clone(),
                task_ids: Vec::new(),
            })
            .collect();
        for task in order {
            for dep in &task.dependencies {
                if let Some(d) = self.get(dep) {
                    if d.phase_number > task.phase_number {
                        tracing::warn!(
                            task = %task.id,
                            dependency = %d.id,
                            "task depends on a task in a later phase"
                        );
                    }
                }
            }
            if let Some(p) = result.iter_mut().find(|p| p.number == task.phase_number) {
                p.task_ids.push(task.id.clone());
            }
        }
        Ok(result)
    }

    pub fn is_phase_complete(&self, number: u32) -> bool {
        self.tasks
            .iter()
            .filter(|t| t.phase_number == number)
            .all(|t| t.status.is_done())
    }

    /// First task in dependency order that can be started now.
    pub fn next_runnable(&self) -> Result<Option<&Task>> {
        let order = self.topological_order()?;
        Ok(order.into_iter().find(|t| {
            matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress)
                && t.dependencies.iter().all(|d| {
                    self.get(d).map_or(true, |dep| dep.status.is_done())
                })
        }))
    }

    /// Human-readable summary: "3/5 completed, 1 in progress, 1 blocked"
    pub fn summarize(&self) -> String {
        let count = |s: TaskStatus| self.tasks.iter().filter(|t| t.status == s).count();
        format!(
            "{}/{} completed, {} in progress, {} blocked",
            count(TaskStatus::Completed),
            self.tasks.len(),
            count(TaskStatus::InProgress),
            count(TaskStatus::Blocked)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
