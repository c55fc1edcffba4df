use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::process::AgentProcess;
use crate::{AgentRunnerError, Result};

// ─── RunConfig ────────────────────────────────────────────────────────────

/// One agent session: `command args… prompt`.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Executable name (resolved on `PATH`) or path.
    pub command: String,
    pub args: Vec<String>,
    /// Passed as the final argument.
    pub prompt: String,
    /// Extra environment for the subprocess, on top of the inherited one.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Kill the process when it runs longer than this.
    pub timeout: Option<Duration>,
}

// ─── RunResult ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunResult {
    /// Everything the agent printed on stdout.
    pub output: String,
    pub duration: Duration,
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Check that `command` can be spawned, returning its resolved path.
pub fn preflight(command: &str) -> Result<PathBuf> {
    which::which(command).map_err(|_| AgentRunnerError::NotFound {
        command: command.to_string(),
    })
}

/// Run one agent session to completion.
///
/// Fails with [`AgentRunnerError::NotFound`] before spawning when the
/// command cannot be resolved, [`AgentRunnerError::Process`] on a non-zero
/// exit, and [`AgentRunnerError::Timeout`] after killing an overdue process.
pub async fn run(config: RunConfig) -> Result<RunResult> {
    let program = preflight(&config.command)?;
    let mut args = config.args;
    args.push(config.prompt);

    tracing::debug!(command = %program.display(), args = args.len(), "spawning agent");
    let started = Instant::now();
    let mut process = AgentProcess::spawn(&program, &args, &config.env, config.cwd.as_deref())?;

    let output = match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, process.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                process.kill().await;
                tracing::warn!(timeout_secs = limit.as_secs(), "agent process killed after timeout");
                return Err(AgentRunnerError::Timeout(limit));
            }
        },
        None => process.wait().await?,
    };

    let duration = started.elapsed();
    tracing::debug!(duration_ms = duration.as_millis() as u64, "agent finished");
    Ok(RunResult { output, duration })
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, prompt: &str) -> RunConfig {
        RunConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_collects_stdout() {
        let result = run(sh("echo one; echo two", "p")).await.unwrap();
        assert_eq!(result.output, "one\ntwo");
    }

    #[tokio::test]
    async fn prompt_is_final_argument() {
        // with `sh -c script arg0`, the prompt lands in $0
        let result = run(sh("echo \"$0\"", "/specrun.plan --phase 2")).await.unwrap();
        assert_eq!(result.output, "/specrun.plan --phase 2");
    }

    #[tokio::test]
    async fn env_and_cwd_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = sh("echo \"$SPECRUN_STAGE\"; pwd", "p");
        cfg.env = vec![("SPECRUN_STAGE".into(), "tasks".into())];
        cfg.cwd = Some(dir.path().to_path_buf());
        let result = run(cfg).await.unwrap();
        let mut lines = result.output.lines();
        assert_eq!(lines.next(), Some("tasks"));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn non_zero_exit_reports_code_and_stderr() {
        let err = run(sh("echo boom >&2; exit 3", "p")).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, AgentRunnerError::Process(_)));
        assert!(msg.starts_with("agent process exited with code 3"), "{msg}");
        assert!(msg.contains("stderr: boom"), "{msg}");
    }

    #[tokio::test]
    async fn missing_command_fails_preflight() {
        let cfg = RunConfig {
            command: "specrun-no-such-agent-binary".into(),
            ..Default::default()
        };
        let err = run(cfg).await.unwrap_err();
        assert!(matches!(err, AgentRunnerError::NotFound { .. }));
        assert!(err.to_string().contains("specrun-no-such-agent-binary"));
    }

    #[tokio::test]
    async fn overdue_process_is_killed() {
        let mut cfg = sh("sleep 5", "p");
        cfg.timeout = Some(Duration::from_millis(200));
        let started = Instant::now();
        let err = run(cfg).await.unwrap_err();
        assert!(matches!(err, AgentRunnerError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
