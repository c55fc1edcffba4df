//! Dependency resolution: which artifacts a stage selection needs from disk.

use crate::catalog::{producer, requirement};
use crate::error::{Result, SpecrunError};
use crate::paths::ArtifactLocations;
use crate::selector::StageSelector;
use crate::types::{ArtifactKind, Stage};
use serde::Serialize;
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// DependencyCheckResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCheckResult {
    /// Artifacts needed before the run starts, in artifact order.
    pub external_requirements: Vec<ArtifactKind>,
    /// External requirements that are absent on disk. Non-empty is a hard failure.
    pub missing_artifacts: Vec<ArtifactKind>,
    /// Artifacts the selected stages will regenerate although they already exist.
    pub overwrites: Vec<ArtifactKind>,
    /// Soft condition: the run may proceed once the caller confirms.
    pub requires_confirmation: bool,
    /// One line per missing artifact naming the stage that produces it.
    pub remediation_message: String,
}

impl DependencyCheckResult {
    pub fn is_satisfied(&self) -> bool {
        self.missing_artifacts.is_empty()
    }

    /// Convert missing artifacts into a [`SpecrunError::MissingPrerequisite`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_satisfied() {
            return Ok(self);
        }
        Err(SpecrunError::MissingPrerequisite {
            missing: self
                .missing_artifacts
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
            remediation: self.remediation_message,
        })
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Artifacts the selection consumes without producing them earlier in the run.
///
/// Folds over the selected stages in canonical order, carrying the set of
/// artifacts that will exist by the time each stage starts.
pub fn external_requirements(selector: &StageSelector) -> BTreeSet<ArtifactKind> {
    let (external, _) = selector.canonical_order().into_iter().fold(
        (BTreeSet::new(), BTreeSet::new()),
        |(mut external, mut will_exist), stage| {
            let req = requirement(stage);
            for needed in req.requires {
                if !will_exist.contains(needed) {
                    external.insert(*needed);
                }
            }
            if let Some(produced) = req.produces {
                will_exist.insert(produced);
            }
            (external, will_exist)
        },
    );
    external
}

/// Whether the project-wide constitution precondition applies to `selector`.
///
/// Any stage other than constitution needs the constitution on disk before
/// the run starts, even when the constitution stage is selected alongside it.
/// Only a constitution-only run is exempt.
pub fn needs_constitution(selector: &StageSelector) -> bool {
    !selector.is_empty() && !selector.is_constitution_only()
}

/// Check the selection against the files currently on disk.
///
/// Read-only; calling it twice against an unchanged directory yields the
/// same result.
pub fn check(selector: &StageSelector, locations: &ArtifactLocations) -> DependencyCheckResult {
    let mut external = external_requirements(selector);
    if needs_constitution(selector) {
        external.insert(ArtifactKind::ConstitutionFile);
    }

    let missing: Vec<ArtifactKind> = external
        .iter()
        .copied()
        .filter(|kind| !locations.exists(*kind))
        .collect();

    let overwrites: Vec<ArtifactKind> = selector
        .iter()
        .filter_map(|s| requirement(s).produces)
        .filter(|kind| locations.exists(*kind))
        .collect();

    tracing::debug!(
        stages = %selector,
        external = ?external,
        missing = ?missing,
        "dependency check"
    );

    let remediation_message = missing
        .iter()
        .map(|kind| remediation_line(*kind, locations))
        .collect::<Vec<_>>()
        .join("\n");

    DependencyCheckResult {
        external_requirements: external.into_iter().collect(),
        requires_confirmation: missing.is_empty() && !overwrites.is_empty(),
        missing_artifacts: missing,
        overwrites,
        remediation_message,
    }
}

/// `"missing spec (specs/001-x/spec.yaml) — run the specify stage first: specrun specify \"<feature description>\""`
pub fn remediation_line(kind: ArtifactKind, locations: &ArtifactLocations) -> String {
    let stage = producer(kind);
    let location = locations
        .path_of(kind)
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default();
    format!(
        "missing {kind}{location} — run the {stage} stage first: {}",
        remediation_command(stage)
    )
}

fn remediation_command(stage: Stage) -> String {
    match stage {
        Stage::Specify => format!("{} \"<feature description>\"", stage.command()),
        _ => stage.command(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("specs/001-auth")).unwrap();
            Self { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn locations(&self) -> ArtifactLocations {
            ArtifactLocations::new(self.root(), Some(self.root().join("specs/001-auth")))
        }

        fn touch(&self, kind: ArtifactKind) {
            let path = self.locations().path_of(kind).unwrap();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "x: 1\n").unwrap();
        }
    }

    fn sel(stages: &[Stage]) -> StageSelector {
        stages.iter().copied().collect()
    }

    #[test]
    fn plan_tasks_implement_only_needs_spec() {
        let req = external_requirements(&sel(&[Stage::Plan, Stage::Tasks, Stage::Implement]));
        assert_eq!(req.into_iter().collect::<Vec<_>>(), vec![ArtifactKind::Spec]);

        let fx = Fixture::new();
        fx.touch(ArtifactKind::ConstitutionFile);
        fx.touch(ArtifactKind::Spec);
        let result = check(
            &sel(&[Stage::Plan, Stage::Tasks, Stage::Implement]),
            &fx.locations(),
        );
        assert!(result.missing_artifacts.is_empty());
        assert!(result.is_satisfied());
        assert!(result.remediation_message.is_empty());
    }

    #[test]
    fn tasks_implement_needs_plan() {
        let fx = Fixture::new();
        fx.touch(ArtifactKind::ConstitutionFile);
        let result = check(&sel(&[Stage::Tasks, Stage::Implement]), &fx.locations());
        assert_eq!(result.missing_artifacts, vec![ArtifactKind::Plan]);
        assert!(result.remediation_message.contains("run the plan stage first"));
        assert!(result.remediation_message.contains("specrun plan"));
    }

    #[test]
    fn analyze_alone_lists_every_missing_artifact() {
        let fx = Fixture::new();
        fx.touch(ArtifactKind::ConstitutionFile);
        let result = check(&sel(&[Stage::Analyze]), &fx.locations());
        assert_eq!(
            result.missing_artifacts,
            vec![
                ArtifactKind::Spec,
                ArtifactKind::Plan,
                ArtifactKind::TasksBreakdown
            ]
        );
        assert_eq!(result.remediation_message.lines().count(), 3);
        assert!(result.remediation_message.contains("specrun specify"));
        assert!(result.remediation_message.contains("specrun tasks"));
    }

    #[test]
    fn constitution_is_global_precondition() {
        let fx = Fixture::new();
        fx.touch(ArtifactKind::Spec);
        let result = check(&sel(&[Stage::Clarify]), &fx.locations());
        assert_eq!(result.missing_artifacts, vec![ArtifactKind::ConstitutionFile]);
        assert!(result.remediation_message.contains("specrun constitution"));
    }

    #[test]
    fn constitution_only_skips_precondition() {
        let fx = Fixture::new();
        let s = sel(&[Stage::Constitution]);
        assert!(!needs_constitution(&s));
        let result = check(&s, &fx.locations());
        assert!(result.is_satisfied());
        assert!(result.external_requirements.is_empty());
    }

    #[test]
    fn constitution_selected_with_specify_still_needs_file() {
        let fx = Fixture::new();
        let s = sel(&[Stage::Constitution, Stage::Specify]);
        assert!(needs_constitution(&s));
        let result = check(&s, &fx.locations());
        assert_eq!(result.missing_artifacts, vec![ArtifactKind::ConstitutionFile]);
        assert!(result.remediation_message.contains("specrun constitution"));

        fx.touch(ArtifactKind::ConstitutionFile);
        let result = check(&s, &fx.locations());
        assert!(result.is_satisfied());
        assert_eq!(result.overwrites, vec![ArtifactKind::ConstitutionFile]);
    }

    #[test]
    fn empty_selector_is_noop() {
        let fx = Fixture::new();
        let result = check(&StageSelector::new(), &fx.locations());
        assert!(result.is_satisfied());
        assert!(result.external_requirements.is_empty());
        assert!(!result.requires_confirmation);
    }

    #[test]
    fn missing_feature_dir_counts_as_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".specrun/memory")).unwrap();
        std::fs::write(dir.path().join(".specrun/memory/constitution.yaml"), "a: 1").unwrap();
        let loc = ArtifactLocations::new(dir.path(), None);
        let result = check(&sel(&[Stage::Plan]), &loc);
        assert_eq!(result.missing_artifacts, vec![ArtifactKind::Spec]);
        assert!(result.remediation_message.starts_with("missing spec —"));
    }

    #[test]
    fn overwriting_existing_artifact_requires_confirmation() {
        let fx = Fixture::new();
        fx.touch(ArtifactKind::ConstitutionFile);
        fx.touch(ArtifactKind::Spec);
        fx.touch(ArtifactKind::Plan);
        let result = check(&sel(&[Stage::Plan]), &fx.locations());
        assert!(result.is_satisfied());
        assert_eq!(result.overwrites, vec![ArtifactKind::Plan]);
        assert!(result.requires_confirmation);
    }

    #[test]
    fn resolution_is_idempotent() {
        let fx = Fixture::new();
        fx.touch(ArtifactKind::Spec);
        for mask in 0u16..(1 << Stage::COUNT) {
            let s: StageSelector = Stage::all()
                .iter()
                .copied()
                .filter(|st| mask & (1 << st.index()) != 0)
                .collect();
            assert_eq!(check(&s, &fx.locations()), check(&s, &fx.locations()));
        }
    }

    #[test]
    fn into_result_maps_missing_to_error() {
        let fx = Fixture::new();
        let err = check(&sel(&[Stage::Implement]), &fx.locations())
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), "missing_prerequisite");
        let msg = err.to_string();
        assert!(msg.contains("constitution-file, tasks-breakdown"));
        assert!(msg.contains("specrun tasks"));
    }
}
