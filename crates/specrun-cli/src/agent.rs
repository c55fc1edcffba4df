//! Bridges the synchronous pipeline to the async agent runner.

use agent_runner::RunConfig;
use specrun_core::config::AgentConfig;
use specrun_core::executor::{AgentInvoker, Invocation, ProcessFailure};
use specrun_core::orchestrator::CancelFlag;
use std::path::PathBuf;
use std::time::Duration;

pub struct CliAgent {
    root: PathBuf,
    config: AgentConfig,
    runtime: tokio::runtime::Runtime,
}

impl CliAgent {
    pub fn new(root: PathBuf, config: AgentConfig) -> anyhow::Result<Self> {
        Ok(Self {
            root,
            config,
            runtime: tokio::runtime::Runtime::new()?,
        })
    }

    /// Fail early when the agent command is not installed.
    pub fn preflight(&self) -> anyhow::Result<PathBuf> {
        Ok(agent_runner::preflight(&self.config.command)?)
    }

    /// First Ctrl-C requests cancellation after the running unit; a second
    /// one exits immediately.
    pub fn install_interrupt_handler(&self, cancel: CancelFlag) {
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            cancel.cancel();
            eprintln!("\ninterrupt received: stopping after the current unit (Ctrl-C again to abort)");
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    }

    fn run_config(&self, invocation: &Invocation) -> RunConfig {
        let mut env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env.push(("SPECRUN_STAGE".into(), invocation.stage.to_string()));
        env.push(("SPECRUN_UNIT".into(), invocation.unit_label()));
        env.push(("SPECRUN_ATTEMPT".into(), invocation.attempt.to_string()));
        if let Some(feature) = &invocation.feature {
            env.push(("SPECRUN_FEATURE".into(), feature.clone()));
        }

        RunConfig {
            command: self.config.command.clone(),
            args: self.config.args.clone(),
            prompt: invocation.prompt(),
            env,
            cwd: Some(self.root.clone()),
            timeout: self
                .config
                .timeout_minutes
                .map(|m| Duration::from_secs(u64::from(m) * 60)),
        }
    }
}

impl AgentInvoker for CliAgent {
    fn invoke(&mut self, invocation: &Invocation) -> Result<(), ProcessFailure> {
        let cfg = self.run_config(invocation);
        tracing::info!(unit = %invocation.unit_label(), attempt = invocation.attempt, "invoking agent");
        match self.runtime.block_on(agent_runner::run(cfg)) {
            Ok(result) => {
                tracing::debug!(duration_ms = result.duration.as_millis() as u64, "agent session finished");
                Ok(())
            }
            Err(e) => Err(ProcessFailure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specrun_core::schedule::ExecutionUnit;
    use specrun_core::types::Stage;

    #[test]
    fn run_config_exports_unit_context() {
        let mut config = AgentConfig::default();
        config.env.insert("EXTRA".into(), "1".into());
        config.timeout_minutes = Some(2);
        let agent = CliAgent::new(PathBuf::from("/tmp/p"), config).unwrap();
        let inv = Invocation {
            stage: Stage::Implement,
            feature: Some("001-auth".into()),
            unit: Some(ExecutionUnit::Task {
                id: "T002".into(),
                phase_number: 1,
                title: "x".into(),
            }),
            guidance: None,
            attempt: 2,
        };
        let cfg = agent.run_config(&inv);
        assert_eq!(cfg.command, "claude");
        assert_eq!(cfg.prompt, "/specrun.implement --task T002");
        assert_eq!(cfg.timeout, Some(Duration::from_secs(120)));
        let get = |k: &str| cfg.env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("EXTRA"), Some("1"));
        assert_eq!(get("SPECRUN_STAGE"), Some("implement"));
        assert_eq!(get("SPECRUN_UNIT"), Some("implement task T002"));
        assert_eq!(get("SPECRUN_ATTEMPT"), Some("2"));
        assert_eq!(get("SPECRUN_FEATURE"), Some("001-auth"));
    }
}
