use crate::catalog::OutputFile;
use crate::error::{Result, SpecrunError};
use crate::types::ArtifactKind;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SPECRUN_DIR: &str = ".specrun";
pub const MEMORY_DIR: &str = ".specrun/memory";
pub const CONFIG_FILE: &str = ".specrun/config.yaml";
pub const CONSTITUTION_FILE: &str = ".specrun/memory/constitution.yaml";
pub const DEFAULT_SPECS_DIR: &str = "specs";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn specrun_dir(root: &Path) -> PathBuf {
    root.join(SPECRUN_DIR)
}

pub fn memory_dir(root: &Path) -> PathBuf {
    root.join(MEMORY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn constitution_path(root: &Path) -> PathBuf {
    root.join(CONSTITUTION_FILE)
}

pub fn feature_dir(root: &Path, specs_dir: &str, feature: &str) -> PathBuf {
    root.join(specs_dir).join(feature)
}

// ---------------------------------------------------------------------------
// ArtifactLocations
// ---------------------------------------------------------------------------

/// Where each artifact kind lives for one pipeline run.
///
/// `feature_dir` is `None` before the feature exists (e.g. ahead of the
/// specify stage); per-feature artifacts then count as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocations {
    pub constitution: PathBuf,
    pub feature_dir: Option<PathBuf>,
}

impl ArtifactLocations {
    pub fn new(root: &Path, feature_dir: Option<PathBuf>) -> Self {
        Self {
            constitution: constitution_path(root),
            feature_dir,
        }
    }

    pub fn path_of(&self, kind: ArtifactKind) -> Option<PathBuf> {
        if kind.is_project_level() {
            return Some(self.constitution.clone());
        }
        self.feature_dir.as_ref().map(|d| d.join(kind.filename()))
    }

    pub fn output_path(&self, output: OutputFile) -> Option<PathBuf> {
        match output {
            OutputFile::Artifact(kind) => self.path_of(kind),
            _ => self.feature_dir.as_ref().map(|d| d.join(output.filename())),
        }
    }

    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path_of(kind).is_some_and(|p| p.is_file())
    }

    /// Human-readable name of the feature, taken from the directory name.
    pub fn feature_name(&self) -> Option<String> {
        self.feature_dir
            .as_ref()
            .and_then(|d| d.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

// ---------------------------------------------------------------------------
// Feature detection
// ---------------------------------------------------------------------------

static FEATURE_RE: OnceLock<Regex> = OnceLock::new();

fn feature_re() -> &'static Regex {
    FEATURE_RE.get_or_init(|| Regex::new(r"^(\d{3,})-[a-z0-9][a-z0-9\-]*$").unwrap())
}

/// Sequence number of a feature directory name (`"004-auth"` → `4`).
pub fn feature_number(name: &str) -> Option<u32> {
    feature_re()
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Every `NNN-name` directory under `specs_root`, in no particular order.
pub fn list_features(specs_root: &Path) -> Result<Vec<String>> {
    if !specs_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(specs_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if feature_number(&name).is_some() {
            names.push(name);
        }
    }
    Ok(names)
}

/// The highest-numbered `NNN-name` directory under `specs_root`.
pub fn latest_feature(specs_root: &Path) -> Result<Option<String>> {
    Ok(list_features(specs_root)?
        .into_iter()
        .filter_map(|name| feature_number(&name).map(|n| (n, name)))
        .max()
        .map(|(_, name)| name))
}

/// Resolve an explicit feature name against the specs directory.
pub fn existing_feature_dir(root: &Path, specs_dir: &str, feature: &str) -> Result<PathBuf> {
    let dir = feature_dir(root, specs_dir, feature);
    if !dir.is_dir() {
        return Err(SpecrunError::FeatureNotFound(feature.to_string()));
    }
    Ok(dir)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
