use crate::error::{Result, SpecrunError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ImplementMethod
// ---------------------------------------------------------------------------

/// Configured default granularity for the implement stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImplementMethod {
    #[default]
    Phases,
    Tasks,
    SingleSession,
}

impl ImplementMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ImplementMethod::Phases => "phases",
            ImplementMethod::Tasks => "tasks",
            ImplementMethod::SingleSession => "single-session",
        }
    }
}

impl fmt::Display for ImplementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImplementMethod {
    type Err = SpecrunError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "phases" => Ok(ImplementMethod::Phases),
            "tasks" => Ok(ImplementMethod::Tasks),
            "single-session" | "single_session" => Ok(ImplementMethod::SingleSession),
            _ => Err(SpecrunError::InvalidMode(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["-p".to_string(), "--dangerously-skip-permissions".to_string()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            timeout_minutes: None,
            env: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_specs_dir")]
    pub specs_dir: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub implement_method: ImplementMethod,
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_version() -> u32 {
    1
}

fn default_specs_dir() -> String {
    paths::DEFAULT_SPECS_DIR.to_string()
}

fn default_max_retries() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            specs_dir: default_specs_dir(),
            max_retries: default_max_retries(),
            implement_method: ImplementMethod::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(SpecrunError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but falls back to defaults when the project
    /// has no config file yet.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        match Self::load(root) {
            Err(SpecrunError::NotInitialized) => {
                let mut cfg = Config::default();
                cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
                Ok(cfg)
            }
            other => other,
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Apply `SPECRUN_*` overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(v) = lookup("SPECRUN_MAX_RETRIES") {
            self.max_retries = v.trim().parse().map_err(|_| {
                SpecrunError::InvalidConfig(format!(
                    "SPECRUN_MAX_RETRIES must be a non-negative integer, got '{v}'"
                ))
            })?;
        }
        if let Some(v) = lookup("SPECRUN_IMPLEMENT_METHOD") {
            self.implement_method = v.trim().parse()?;
        }
        if let Some(v) = lookup("SPECRUN_AGENT_COMMAND") {
            self.agent.command = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.agent.command.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent.command is empty".to_string(),
            });
        }

        if self.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "max_retries={} (>10 is unusual)",
                    self.max_retries
                ),
            });
        }

        if self.specs_dir.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "specs_dir is empty".to_string(),
            });
        }

        if self.agent.timeout_minutes == Some(0) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "agent.timeout_minutes=0 kills every session immediately".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
