use crate::cmd::run::StageFlags;
use crate::output::{print_json, print_table};
use specrun_core::config::Config;
use specrun_core::orchestrator::{plan_run, RunRequest};
use std::path::Path;

pub fn run(
    root: &Path,
    stages: StageFlags,
    feature: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load_or_default(root)?;
    let request = RunRequest {
        stages: stages.selector(),
        feature,
        ..Default::default()
    };
    let plan = plan_run(root, &config, &request)?;
    let deps = &plan.dependencies;

    if json {
        print_json(&plan)?;
    } else {
        let order: Vec<String> = plan.stages.iter().map(|s| s.to_string()).collect();
        println!(
            "Stages:  {}",
            if order.is_empty() { "(none)".to_string() } else { order.join(" -> ") }
        );
        println!("Feature: {}", plan.feature.as_deref().unwrap_or("(new)"));

        if deps.external_requirements.is_empty() {
            println!("\nNo artifacts required from disk.");
        } else {
            let rows = deps
                .external_requirements
                .iter()
                .map(|kind| {
                    let state = if deps.missing_artifacts.contains(kind) { "missing" } else { "present" };
                    vec![kind.to_string(), state.to_string()]
                })
                .collect();
            println!();
            print_table(&["ARTIFACT", "STATUS"], rows);
        }
        if !deps.overwrites.is_empty() {
            let names: Vec<String> = deps.overwrites.iter().map(|k| k.to_string()).collect();
            println!("\nWill overwrite: {} (confirmation required)", names.join(", "));
        }
        if !deps.remediation_message.is_empty() {
            println!("\n{}", deps.remediation_message);
        }
    }

    if !deps.is_satisfied() {
        anyhow::bail!(
            "{} prerequisite artifact(s) missing",
            deps.missing_artifacts.len()
        );
    }
    Ok(())
}
