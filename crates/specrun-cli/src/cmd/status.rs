use crate::cmd::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use serde::Serialize;
use specrun_core::paths::{existing_feature_dir, latest_feature};
use specrun_core::task::{Phase, Task, TaskGraph};
use specrun_core::types::ArtifactKind;
use specrun_core::SpecrunError;
use std::path::Path;

#[derive(Serialize)]
struct StatusView<'a> {
    feature: String,
    summary: String,
    next: Option<&'a str>,
    phases: &'a [Phase],
    tasks: Vec<&'a Task>,
}

pub fn run(root: &Path, feature: Option<String>, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let feature = match feature {
        Some(f) => f,
        None => latest_feature(&root.join(&config.specs_dir))?.ok_or_else(|| {
            SpecrunError::FeatureNotFound(format!("no NNN-name directory under {}", config.specs_dir))
        })?,
    };
    let dir = existing_feature_dir(root, &config.specs_dir, &feature)?;
    let path = dir.join(ArtifactKind::TasksBreakdown.filename());
    let graph = TaskGraph::parse(&path)
        .with_context(|| format!("no usable tasks artifact for {feature}"))?;

    let ordered = graph.topological_order()?;
    let next = graph.next_runnable()?.map(|t| t.id.as_str());
    let summary = graph.summarize();

    if json {
        return print_json(&StatusView {
            feature,
            summary,
            next,
            phases: graph.phases(),
            tasks: ordered,
        });
    }

    println!("Feature: {feature}");
    for phase in graph.phases() {
        let mut rows = Vec::new();
        for task in ordered.iter().filter(|t| t.phase_number == phase.number) {
            let status = match &task.blocked_reason {
                Some(reason) => format!("{} ({reason})", task.status),
                None => task.status.to_string(),
            };
            rows.push(vec![
                task.id.clone(),
                status,
                task.dependencies.join(","),
                task.title.clone(),
            ]);
        }
        let title = if phase.title.is_empty() { String::new() } else { format!(": {}", phase.title) };
        let done = if graph.is_phase_complete(phase.number) { " (complete)" } else { "" };
        println!("\nPhase {}{title}{done}", phase.number);
        print_table(&["TASK", "STATUS", "DEPENDS", "TITLE"], rows);
    }
    println!("\n{summary}");
    match next {
        Some(id) => println!("Next: {id}"),
        None => println!("Next: nothing runnable"),
    }
    Ok(())
}
