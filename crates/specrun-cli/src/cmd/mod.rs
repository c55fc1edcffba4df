pub mod deps;
pub mod init;
pub mod run;
pub mod status;

use anyhow::Context;
use specrun_core::config::{Config, WarnLevel};
use std::path::Path;

/// Load the project config, printing warnings and refusing to continue on
/// configuration errors.
pub(crate) fn load_config(root: &Path) -> anyhow::Result<Config> {
    let config = Config::load(root).context("failed to load .specrun/config.yaml")?;
    let mut errors = Vec::new();
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => eprintln!("warning: {}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }
    Ok(config)
}
