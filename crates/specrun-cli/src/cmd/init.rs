use anyhow::Context;
use specrun_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing specrun in: {}", root.display());

    let memory = paths::memory_dir(root);
    std::fs::create_dir_all(&memory)
        .with_context(|| format!("failed to create {}", memory.display()))?;

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to read existing config")?
    } else {
        let cfg = Config::default();
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    let specs = root.join(&config.specs_dir);
    if specs.is_dir() {
        println!("  exists:  {}/", config.specs_dir);
    } else {
        std::fs::create_dir_all(&specs)
            .with_context(|| format!("failed to create {}", specs.display()))?;
        println!("  created: {}/", config.specs_dir);
    }

    let gitkeep = specs.join(".gitkeep");
    io::write_if_missing(&gitkeep, b"")?;

    if !paths::constitution_path(root).exists() {
        println!("\nNext: write the project constitution with `specrun constitution`.");
    }
    Ok(())
}
