//! Artifact validation: a pass/fail verdict plus structured issues the
//! agent can be handed on retry.

use crate::catalog::OutputFile;
use crate::task::{TaskGraph, TasksDocument};
use crate::types::{ArtifactKind, TaskStatus};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Field path inside the document, e.g. `phases[0].tasks[2].status`.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.path.is_empty() {
            write!(f, "{}", self.path)?;
            if let Some(line) = self.line {
                write!(f, " (line {line})")?;
            }
            f.write_str(": ")?;
        } else if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// First issue plus a count of the rest, for one-line error messages.
    pub fn summary(&self) -> String {
        match self.errors.as_slice() {
            [] => "no issues".to_string(),
            [only] => only.to_string(),
            [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
        }
    }

    /// Retry guidance listing every issue for the agent to fix.
    pub fn as_guidance(&self, file: &str) -> String {
        let mut out = format!("The previous attempt left {file} invalid. Fix these issues:");
        for issue in &self.errors {
            out.push_str("\n- ");
            out.push_str(&issue.to_string());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ArtifactValidator
// ---------------------------------------------------------------------------

pub trait ArtifactValidator {
    fn validate(&self, output: OutputFile, path: &Path) -> ValidationResult;
}

/// Default validator: YAML syntax, required top-level keys, and structural
/// checks for the tasks breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlValidator;

impl YamlValidator {
    pub fn required_keys(output: OutputFile) -> &'static [&'static str] {
        match output {
            OutputFile::Artifact(ArtifactKind::Spec) => &["feature", "user_stories", "requirements"],
            OutputFile::Artifact(ArtifactKind::Plan) => &["summary", "technical_context"],
            OutputFile::Artifact(ArtifactKind::TasksBreakdown) => &["phases"],
            OutputFile::Artifact(ArtifactKind::ConstitutionFile) => &[],
            OutputFile::Checklist => &["items"],
            OutputFile::Analysis => &["summary", "findings"],
        }
    }

    pub fn validate_str(&self, output: OutputFile, text: &str) -> ValidationResult {
        let value: serde_yaml::Value = match serde_yaml::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                return ValidationResult::from_errors(vec![ValidationIssue::new(
                    "",
                    format!("invalid YAML: {e}"),
                )
                .at_line(e.location().map(|l| l.line()))
                .with_hint("the file must be a single well-formed YAML document")]);
            }
        };

        let Some(map) = value.as_mapping() else {
            return ValidationResult::from_errors(vec![ValidationIssue::new(
                "",
                "top level is not a mapping",
            )
            .with_hint("start the document with the required keys")]);
        };

        let mut errors: Vec<ValidationIssue> = Self::required_keys(output)
            .iter()
            .filter(|key| !map.contains_key(**key))
            .map(|key| {
                ValidationIssue::new(*key, "required key is missing")
                    .with_hint(format!("add a top-level `{key}:` section"))
            })
            .collect();

        if errors.is_empty() && output == OutputFile::Artifact(ArtifactKind::TasksBreakdown) {
            errors.extend(check_tasks(value, text));
        }

        ValidationResult::from_errors(errors)
    }
}

impl ArtifactValidator for YamlValidator {
    fn validate(&self, output: OutputFile, path: &Path) -> ValidationResult {
        match std::fs::read_to_string(path) {
            Ok(text) => self.validate_str(output, &text),
            Err(e) => ValidationResult::from_errors(vec![ValidationIssue::new(
                "",
                format!("cannot read {}: {e}", path.display()),
            )
            .with_hint(format!(
                "the agent session must write the {} file",
                output.label()
            ))]),
        }
    }
}

fn check_tasks(value: serde_yaml::Value, text: &str) -> Vec<ValidationIssue> {
    let doc: TasksDocument = match serde_yaml::from_value(value) {
        Ok(doc) => doc,
        Err(e) => {
            return vec![ValidationIssue::new("phases", e.to_string())
                .with_hint("each phase needs `number` and `tasks`; each task needs `id`, `title` and a status of Pending, InProgress, Completed or Blocked")];
        }
    };

    let mut errors = Vec::new();
    let known: HashSet<&str> = doc
        .phases
        .iter()
        .flat_map(|p| p.tasks.iter().map(|t| t.id.as_str()))
        .collect();
    let mut seen = HashSet::new();

    for (pi, phase) in doc.phases.iter().enumerate() {
        for (ti, task) in phase.tasks.iter().enumerate() {
            let field = format!("phases[{pi}].tasks[{ti}]");
            let line = find_line(text, &task.id);
            if !seen.insert(task.id.as_str()) {
                errors.push(
                    ValidationIssue::new(format!("{field}.id"), format!("duplicate task id {}", task.id))
                        .at_line(line)
                        .with_hint("task ids must be unique across all phases"),
                );
            }
            for dep in &task.dependencies {
                if !known.contains(dep.as_str()) {
                    errors.push(
                        ValidationIssue::new(
                            format!("{field}.dependencies"),
                            format!("{} depends on unknown task {dep}", task.id),
                        )
                        .at_line(line)
                        .with_hint("reference an existing task id or remove the dependency"),
                    );
                }
            }
            if task.status == TaskStatus::Blocked
                && task.blocked_reason.as_deref().map_or(true, |r| r.trim().is_empty())
            {
                errors.push(
                    ValidationIssue::new(
                        format!("{field}.blocked_reason"),
                        format!("{} is Blocked without a reason", task.id),
                    )
                    .at_line(line)
                    .with_hint("set `blocked_reason` explaining what unblocks the task"),
                );
            }
        }
    }

    if errors.is_empty() {
        if let Err(e) = TaskGraph::from_document(doc).and_then(|g| g.topological_order().map(|_| ())) {
            errors.push(
                ValidationIssue::new("phases", e.to_string())
                    .with_hint("remove one dependency edge so the tasks form a DAG"),
            );
        }
    }

    errors
}

fn find_line(text: &str, needle: &str) -> Option<usize> {
    text.lines()
        .position(|l| l.contains(needle))
        .map(|i| i + 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
