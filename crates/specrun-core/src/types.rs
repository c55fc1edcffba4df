use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the pipeline. Declaration order is the canonical execution
/// order and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Constitution,
    Specify,
    Clarify,
    Plan,
    Tasks,
    Checklist,
    Analyze,
    Implement,
}

impl Stage {
    pub const COUNT: usize = 8;

    pub fn all() -> &'static [Stage] {
        &[
            Stage::Constitution,
            Stage::Specify,
            Stage::Clarify,
            Stage::Plan,
            Stage::Tasks,
            Stage::Checklist,
            Stage::Analyze,
            Stage::Implement,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Constitution => "constitution",
            Stage::Specify => "specify",
            Stage::Clarify => "clarify",
            Stage::Plan => "plan",
            Stage::Tasks => "tasks",
            Stage::Checklist => "checklist",
            Stage::Analyze => "analyze",
            Stage::Implement => "implement",
        }
    }

    /// Core stages are the ones `run -a` selects.
    pub fn is_core(self) -> bool {
        matches!(
            self,
            Stage::Specify | Stage::Plan | Stage::Tasks | Stage::Implement
        )
    }

    /// The single-stage CLI command that runs only this stage.
    pub fn command(self) -> String {
        format!("specrun {}", self.as_str())
    }

    /// Short flag used by `specrun run` to select this stage.
    pub fn run_flag(self) -> char {
        match self {
            Stage::Constitution => 'n',
            Stage::Specify => 's',
            Stage::Clarify => 'r',
            Stage::Plan => 'p',
            Stage::Tasks => 't',
            Stage::Checklist => 'l',
            Stage::Analyze => 'z',
            Stage::Implement => 'i',
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::SpecrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| crate::error::SpecrunError::InvalidStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    ConstitutionFile,
    Spec,
    Plan,
    TasksBreakdown,
}

impl ArtifactKind {
    pub fn all() -> &'static [ArtifactKind] {
        &[
            ArtifactKind::ConstitutionFile,
            ArtifactKind::Spec,
            ArtifactKind::Plan,
            ArtifactKind::TasksBreakdown,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::ConstitutionFile => "constitution-file",
            ArtifactKind::Spec => "spec",
            ArtifactKind::Plan => "plan",
            ArtifactKind::TasksBreakdown => "tasks-breakdown",
        }
    }

    pub fn filename(self) -> &'static str {
        match self {
            ArtifactKind::ConstitutionFile => "constitution.yaml",
            ArtifactKind::Spec => "spec.yaml",
            ArtifactKind::Plan => "plan.yaml",
            ArtifactKind::TasksBreakdown => "tasks.yaml",
        }
    }

    /// The constitution lives at project level; everything else is per feature.
    pub fn is_project_level(self) -> bool {
        matches!(self, ArtifactKind::ConstitutionFile)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "in_progress", alias = "in-progress")]
    InProgress,
    #[serde(alias = "completed", alias = "done")]
    Completed,
    #[serde(alias = "blocked")]
    Blocked,
}

impl TaskStatus {
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Blocked => "Blocked",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_ordering_is_canonical() {
        assert!(Stage::Constitution < Stage::Specify);
        assert!(Stage::Checklist < Stage::Analyze);
        assert!(Stage::Analyze < Stage::Implement);
        assert_eq!(Stage::all().len(), Stage::COUNT);
        for (i, stage) in Stage::all().iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn stage_roundtrip() {
        for stage in Stage::all() {
            assert_eq!(Stage::from_str(stage.as_str()).unwrap(), *stage);
        }
        assert!(Stage::from_str("deploy").is_err());
    }

    #[test]
    fn core_stages() {
        let core: Vec<_> = Stage::all().iter().filter(|s| s.is_core()).collect();
        assert_eq!(
            core,
            vec![&Stage::Specify, &Stage::Plan, &Stage::Tasks, &Stage::Implement]
        );
    }

    #[test]
    fn task_status_accepts_aliases() {
        let s: TaskStatus = serde_yaml::from_str("in_progress").unwrap();
        assert_eq!(s, TaskStatus::InProgress);
        let s: TaskStatus = serde_yaml::from_str("Completed").unwrap();
        assert!(s.is_done());
        assert!(serde_yaml::from_str::<TaskStatus>("Skipped").is_err());
    }
}
