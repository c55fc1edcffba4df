//! Static facts about what each stage consumes and produces.

use crate::types::{ArtifactKind, Stage};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactRequirement {
    pub produces: Option<ArtifactKind>,
    pub requires: &'static [ArtifactKind],
}

pub fn requirement(stage: Stage) -> ArtifactRequirement {
    use ArtifactKind::*;
    let (produces, requires): (Option<ArtifactKind>, &'static [ArtifactKind]) = match stage {
        Stage::Constitution => (Some(ConstitutionFile), &[]),
        Stage::Specify => (Some(Spec), &[ConstitutionFile]),
        Stage::Clarify => (None, &[Spec]),
        Stage::Plan => (Some(Plan), &[Spec]),
        Stage::Tasks => (Some(TasksBreakdown), &[Plan]),
        Stage::Checklist => (None, &[Spec]),
        Stage::Analyze => (None, &[Spec, Plan, TasksBreakdown]),
        Stage::Implement => (None, &[TasksBreakdown]),
    };
    ArtifactRequirement { produces, requires }
}

/// The stage whose single-stage invocation creates `kind`.
pub fn producer(kind: ArtifactKind) -> Stage {
    match kind {
        ArtifactKind::ConstitutionFile => Stage::Constitution,
        ArtifactKind::Spec => Stage::Specify,
        ArtifactKind::Plan => Stage::Plan,
        ArtifactKind::TasksBreakdown => Stage::Tasks,
    }
}

// ---------------------------------------------------------------------------
// OutputFile
// ---------------------------------------------------------------------------

/// A file the validator checks after a stage's agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFile {
    Artifact(ArtifactKind),
    Checklist,
    Analysis,
}

impl OutputFile {
    pub fn filename(self) -> &'static str {
        match self {
            OutputFile::Artifact(kind) => kind.filename(),
            OutputFile::Checklist => "checklist.yaml",
            OutputFile::Analysis => "analysis.yaml",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OutputFile::Artifact(kind) => kind.as_str(),
            OutputFile::Checklist => "checklist",
            OutputFile::Analysis => "analysis",
        }
    }
}

/// What gets validated after `stage` runs. `None` means the stage moves
/// straight to success after a clean invocation.
pub fn validated_output(stage: Stage) -> Option<OutputFile> {
    match stage {
        Stage::Constitution | Stage::Clarify => None,
        Stage::Specify => Some(OutputFile::Artifact(ArtifactKind::Spec)),
        Stage::Plan => Some(OutputFile::Artifact(ArtifactKind::Plan)),
        Stage::Tasks | Stage::Implement => Some(OutputFile::Artifact(ArtifactKind::TasksBreakdown)),
        Stage::Checklist => Some(OutputFile::Checklist),
        Stage::Analyze => Some(OutputFile::Analysis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producers_agree_with_table() {
        for kind in ArtifactKind::all() {
            let stage = producer(*kind);
            assert_eq!(requirement(stage).produces, Some(*kind));
        }
    }

    #[test]
    fn analyze_requires_three_artifacts() {
        let req = requirement(Stage::Analyze);
        assert_eq!(req.produces, None);
        assert_eq!(
            req.requires,
            &[ArtifactKind::Spec, ArtifactKind::Plan, ArtifactKind::TasksBreakdown]
        );
    }

    #[test]
    fn only_constitution_has_no_requirements() {
        for stage in Stage::all() {
            let empty = requirement(*stage).requires.is_empty();
            assert_eq!(empty, *stage == Stage::Constitution, "{stage}");
        }
    }

    #[test]
    fn unvalidated_stages() {
        assert!(validated_output(Stage::Constitution).is_none());
        assert!(validated_output(Stage::Clarify).is_none());
        assert_eq!(
            validated_output(Stage::Implement),
            Some(OutputFile::Artifact(ArtifactKind::TasksBreakdown))
        );
    }
}
