#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Fake agent: writes each stage's artifact and logs its prompt. The prompt
/// arrives as `$0` because it follows the `-c` script.
const FAKE_AGENT: &str = r#"
echo "$0" >> prompts.log
dir="specs/$SPECRUN_FEATURE"
case "$SPECRUN_STAGE" in
  constitution)
    mkdir -p .specrun/memory
    printf 'principles: []\n' > .specrun/memory/constitution.yaml ;;
  specify)
    mkdir -p specs/001-demo
    printf 'feature: demo\nuser_stories: []\nrequirements: []\n' > specs/001-demo/spec.yaml ;;
  plan)
    printf 'summary: s\ntechnical_context: {}\n' > "$dir/plan.yaml" ;;
  tasks)
    printf 'phases:\n  - number: 1\n    tasks:\n      - id: T001\n        title: a\n        status: Pending\n  - number: 2\n    tasks:\n      - id: T002\n        title: b\n        status: Pending\n        dependencies: [T001]\n' > "$dir/tasks.yaml" ;;
  implement)
    sed -i.bak 's/status: Pending/status: Completed/' "$dir/tasks.yaml" ;;
esac
"#;

/// Always leaves an incomplete plan behind.
const SLOPPY_AGENT: &str = r#"
echo "$0" >> prompts.log
printf 'summary: only\n' > "specs/$SPECRUN_FEATURE/plan.yaml"
"#;

fn specrun(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("specrun").unwrap();
    cmd.current_dir(dir.path())
        .env("SPECRUN_ROOT", dir.path())
        .env_remove("SPECRUN_FEATURE")
        .env_remove("SPECRUN_MAX_RETRIES")
        .env_remove("SPECRUN_IMPLEMENT_METHOD")
        .env_remove("SPECRUN_AGENT_COMMAND");
    cmd
}

fn write(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// `specrun init`, then point the agent at a shell script.
fn init_with_agent(dir: &TempDir, script: &str) {
    specrun(dir).arg("init").assert().success();
    let path = dir.path().join(".specrun/config.yaml");
    let mut cfg: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    cfg["agent"]["command"] = "sh".into();
    cfg["agent"]["args"] = serde_yaml::to_value(vec!["-c", script]).unwrap();
    std::fs::write(&path, serde_yaml::to_string(&cfg).unwrap()).unwrap();
}

fn seed_feature(dir: &TempDir) {
    write(dir, ".specrun/memory/constitution.yaml", "principles: []\n");
    write(
        dir,
        "specs/001-demo/spec.yaml",
        "feature: demo\nuser_stories: []\nrequirements: []\n",
    );
}

fn prompts(root: &Path) -> Vec<String> {
    std::fs::read_to_string(root.join("prompts.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// specrun init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_specs_dir() {
    let dir = TempDir::new().unwrap();
    specrun(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .specrun/config.yaml"));
    assert!(dir.path().join(".specrun/config.yaml").is_file());
    assert!(dir.path().join(".specrun/memory").is_dir());
    assert!(dir.path().join("specs").is_dir());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    specrun(&dir).arg("init").assert().success();
    specrun(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .specrun/config.yaml"));
}

#[test]
fn run_requires_init() {
    let dir = TempDir::new().unwrap();
    specrun(&dir)
        .args(["run", "-n"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// specrun deps
// ---------------------------------------------------------------------------

#[test]
fn deps_reports_every_missing_artifact() {
    let dir = TempDir::new().unwrap();
    specrun(&dir).arg("init").assert().success();
    specrun(&dir)
        .args(["deps", "-z"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("missing spec"))
        .stdout(predicate::str::contains("missing plan"))
        .stdout(predicate::str::contains("missing tasks-breakdown"))
        .stdout(predicate::str::contains("specrun specify \"<feature description>\""))
        .stderr(predicate::str::contains("4 prerequisite artifact(s) missing"));
}

#[test]
fn deps_counts_artifacts_produced_in_the_run() {
    let dir = TempDir::new().unwrap();
    specrun(&dir).arg("init").assert().success();
    seed_feature(&dir);
    specrun(&dir)
        .args(["deps", "-p", "-t", "-i", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"missing_artifacts\": []"));
    specrun(&dir)
        .args(["deps", "-t", "-i"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("specrun plan"));
}

// ---------------------------------------------------------------------------
// specrun run
// ---------------------------------------------------------------------------

#[test]
fn full_pipeline_with_fake_agent() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    specrun(&dir).arg("constitution").assert().success();
    specrun(&dir)
        .args(["run", "-a", "--yes", "demo", "feature"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Feature: 001-demo"))
        .stdout(predicate::str::contains("implement phase 2"));

    assert_eq!(
        prompts(dir.path()),
        vec![
            "/specrun.constitution",
            "/specrun.specify demo feature",
            "/specrun.plan demo feature",
            "/specrun.tasks demo feature",
            "/specrun.implement --phase 1 demo feature",
            "/specrun.implement --phase 2 demo feature",
        ]
    );
    let tasks = std::fs::read_to_string(dir.path().join("specs/001-demo/tasks.yaml")).unwrap();
    assert!(!tasks.contains("Pending"));
}

#[test]
fn constitution_must_exist_before_other_stages() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    specrun(&dir)
        .args(["run", "-n", "-s", "--yes", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing_prerequisite"))
        .stderr(predicate::str::contains("specrun constitution"));
    assert!(prompts(dir.path()).is_empty());
}

#[test]
fn per_task_mode_and_resume() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    seed_feature(&dir);
    write(
        &dir,
        "specs/001-demo/tasks.yaml",
        "phases:\n  - number: 1\n    tasks:\n      - {id: T001, title: a, status: Completed}\n      - {id: T002, title: b, status: Pending, dependencies: [T001]}\n",
    );
    specrun(&dir)
        .args(["implement", "--tasks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped task T001: already completed"));
    assert_eq!(prompts(dir.path()), vec!["/specrun.implement --task T002"]);
}

#[test]
fn exhausted_retries_fail_with_kind() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, SLOPPY_AGENT);
    seed_feature(&dir);
    specrun(&dir)
        .args(["plan", "--max-retries", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("retry_exhausted"))
        .stderr(predicate::str::contains("technical_context"));
    assert_eq!(prompts(dir.path()).len(), 2);
}

#[test]
fn cyclic_tasks_rejected_before_agent_runs() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    seed_feature(&dir);
    write(
        &dir,
        "specs/001-demo/tasks.yaml",
        "phases:\n  - number: 1\n    tasks:\n      - {id: T001, title: a, dependencies: [T002]}\n      - {id: T002, title: b, dependencies: [T001]}\n",
    );
    specrun(&dir)
        .arg("implement")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle_error"))
        .stderr(predicate::str::contains("T001 -> T002 -> T001"));
    assert!(prompts(dir.path()).is_empty());
}

#[test]
fn unknown_from_task_rejected() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    seed_feature(&dir);
    write(
        &dir,
        "specs/001-demo/tasks.yaml",
        "phases:\n  - number: 1\n    tasks:\n      - {id: T001, title: a}\n",
    );
    specrun(&dir)
        .args(["implement", "--from-task", "T999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown_task_id"));
    assert!(prompts(dir.path()).is_empty());
}

#[test]
fn conflicting_mode_flags_rejected() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    seed_feature(&dir);
    write(&dir, "specs/001-demo/tasks.yaml", "phases: []\n");
    specrun(&dir)
        .args(["implement", "--tasks", "--phases"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("conflicting_modes"));
}

#[test]
fn missing_prerequisite_names_remediation() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    seed_feature(&dir);
    specrun(&dir)
        .arg("tasks")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing_prerequisite"))
        .stderr(predicate::str::contains("specrun plan"));
    assert!(prompts(dir.path()).is_empty());
}

#[test]
fn specify_needs_description() {
    let dir = TempDir::new().unwrap();
    init_with_agent(&dir, FAKE_AGENT);
    specrun(&dir)
        .arg("specify")
        .assert()
        .failure()
        .stderr(predicate::str::contains("feature description"));
}

#[test]
fn missing_agent_binary_fails_preflight() {
    let dir = TempDir::new().unwrap();
    specrun(&dir).arg("init").assert().success();
    specrun(&dir)
        .arg("constitution")
        .env("SPECRUN_AGENT_COMMAND", "specrun-no-such-agent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("specrun-no-such-agent"));
}

// ---------------------------------------------------------------------------
// specrun status
// ---------------------------------------------------------------------------

#[test]
fn status_lists_tasks_and_next() {
    let dir = TempDir::new().unwrap();
    specrun(&dir).arg("init").assert().success();
    seed_feature(&dir);
    write(
        &dir,
        "specs/001-demo/tasks.yaml",
        "phases:\n  - number: 1\n    title: Setup\n    tasks:\n      - {id: T001, title: scaffold, status: Completed}\n      - {id: T002, title: wire, dependencies: [T001]}\n",
    );
    specrun(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Phase 1: Setup"))
        .stdout(predicate::str::contains("1/2 completed"))
        .stdout(predicate::str::contains("Next: T002"));
}
