use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentRunnerError {
    #[error("agent command not found on PATH: {command}")]
    NotFound { command: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Process(String),

    #[error("agent process timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}
