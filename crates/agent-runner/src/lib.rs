//! `agent-runner`: drives one coding-agent CLI session as a subprocess.
//!
//! ```text
//! RunConfig ──► preflight (`which`) ──► AgentProcess ──► RunResult
//!                                        │  stdout: logged + collected
//!                                        │  stderr: buffered for errors
//!                                        └─ exit status / timeout
//! ```
//!
//! Only the process outcome matters to callers; the agent edits files on
//! disk and the caller validates them.

pub mod error;
pub mod runner;

pub(crate) mod process;

pub use error::AgentRunnerError;
pub use runner::{preflight, run, RunConfig, RunResult};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentRunnerError>;
