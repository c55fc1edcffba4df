use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecrunError {
    #[error("not initialized: run 'specrun init'")]
    NotInitialized,

    #[error("missing prerequisite artifacts: {}\n{remediation}", missing.join(", "))]
    MissingPrerequisite {
        missing: Vec<String>,
        remediation: String,
    },

    #[error("{unit}: agent process failed: {message}")]
    Process { unit: String, message: String },

    #[error("{unit}: validation still failing after {attempts} attempt(s): {summary}")]
    RetryExhausted {
        unit: String,
        attempts: u32,
        summary: String,
    },

    #[error("dependency cycle between tasks: {}", ids.join(" -> "))]
    Cycle { ids: Vec<String> },

    #[error("task not found in tasks artifact: {0}")]
    UnknownTaskId(String),

    #[error("phase not found in tasks artifact: {0}")]
    UnknownPhase(u32),

    #[error("conflicting execution modes: {0}")]
    ConflictingModes(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid execution mode '{0}': expected phases, tasks or single-session")]
    InvalidMode(String),

    #[error("failed to parse tasks artifact {path}: {message}")]
    TaskParse { path: String, message: String },

    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    #[error("run cancelled before {0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpecrunError {
    /// Short machine-readable label for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            SpecrunError::NotInitialized => "not_initialized",
            SpecrunError::MissingPrerequisite { .. } => "missing_prerequisite",
            SpecrunError::Process { .. } => "process_error",
            SpecrunError::RetryExhausted { .. } => "retry_exhausted",
            SpecrunError::Cycle { .. } => "cycle_error",
            SpecrunError::UnknownTaskId(_) => "unknown_task_id",
            SpecrunError::UnknownPhase(_) => "unknown_phase",
            SpecrunError::ConflictingModes(_) => "conflicting_modes",
            SpecrunError::InvalidConfig(_) => "invalid_config",
            SpecrunError::InvalidStage(_) => "invalid_stage",
            SpecrunError::InvalidMode(_) => "invalid_mode",
            SpecrunError::TaskParse { .. } => "task_parse_error",
            SpecrunError::FeatureNotFound(_) => "feature_not_found",
            SpecrunError::Cancelled(_) => "cancelled",
            SpecrunError::Io(_) => "io_error",
            SpecrunError::Yaml(_) => "yaml_error",
            SpecrunError::Json(_) => "json_error",
        }
    }

    /// True for failures detected before any agent invocation.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            SpecrunError::MissingPrerequisite { .. }
                | SpecrunError::Cycle { .. }
                | SpecrunError::UnknownTaskId(_)
                | SpecrunError::UnknownPhase(_)
                | SpecrunError::ConflictingModes(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpecrunError>;
