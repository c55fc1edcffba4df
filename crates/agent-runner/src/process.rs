use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::{AgentRunnerError, Result};

// ─── AgentProcess ─────────────────────────────────────────────────────────

/// A running agent subprocess. Stdout lines are logged and collected;
/// stderr is drained into a buffer and surfaced when the exit is abnormal.
pub(crate) struct AgentProcess {
    child: Child,
    stdout_task: Option<JoinHandle<String>>,
    stderr_task: Option<JoinHandle<()>>,
    stderr_buf: Arc<Mutex<String>>,
}

impl AgentProcess {
    pub(crate) fn spawn(
        program: &Path,
        args: &[String],
        env: &[(String, String)],
        cwd: Option<&Path>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(async move {
                let mut collected = String::new();
                drain_lines(out, |line| {
                    tracing::info!(target: "agent", "{line}");
                    if !collected.is_empty() {
                        collected.push('\n');
                    }
                    collected.push_str(line);
                })
                .await;
                collected
            })
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|err| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                drain_lines(err, |line| {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(line);
                    }
                })
                .await;
            })
        });

        Ok(Self {
            child,
            stdout_task,
            stderr_task,
            stderr_buf,
        })
    }

    /// Wait for exit. `Ok(output)` on a zero status, otherwise a process
    /// error carrying the exit code (or signal) and captured stderr.
    pub(crate) async fn wait(&mut self) -> Result<String> {
        let status = self.child.wait().await?;
        let output = match self.stdout_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }

        if status.success() {
            return Ok(output);
        }

        let stderr = self
            .stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();

        let head = match status.code() {
            Some(code) => format!("agent process exited with code {code}"),
            None => "agent process terminated by signal".to_string(),
        };
        let msg = if stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {stderr}")
        };
        Err(AgentRunnerError::Process(msg))
    }

    /// Kill the subprocess (best-effort).
    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

async fn drain_lines<R: AsyncRead + Unpin>(reader: R, mut on_line: impl FnMut(&str)) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        on_line(&line);
    }
}
