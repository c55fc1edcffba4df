//! Retry-until-valid execution of a single stage or execution unit.
//!
//! Each attempt walks `Invoking -> Validating -> {Success | RetryPending |
//! Exhausted}`. Process failures end the unit immediately; validation
//! failures are retried up to the policy's bound with the validator's
//! issues appended to the guidance. The failed file is left in place and
//! the agent is told to overwrite it.

use crate::error::{Result, SpecrunError};
use crate::schedule::ExecutionUnit;
use crate::types::Stage;
use crate::validate::{ValidationIssue, ValidationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Agent seam
// ---------------------------------------------------------------------------

/// The agent process failed to start or exited abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure(pub String);

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One agent session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: Stage,
    pub feature: Option<String>,
    pub unit: Option<ExecutionUnit>,
    pub guidance: Option<String>,
    /// 1-based.
    pub attempt: u32,
}

impl Invocation {
    /// `/specrun.<stage> [--phase N | --task ID] [guidance]`
    pub fn prompt(&self) -> String {
        let mut parts = vec![format!("/specrun.{}", self.stage)];
        if let Some(unit) = &self.unit {
            parts.extend(unit.prompt_args());
        }
        if let Some(g) = self.guidance.as_deref().filter(|g| !g.trim().is_empty()) {
            parts.push(g.to_string());
        }
        parts.join(" ")
    }

    pub fn unit_label(&self) -> String {
        unit_label(self.stage, self.unit.as_ref())
    }
}

/// Runs one agent session. Only success or failure of the process matters;
/// output locations are known from the artifact catalog.
pub trait AgentInvoker {
    fn invoke(&mut self, invocation: &Invocation) -> std::result::Result<(), ProcessFailure>;
}

pub fn unit_label(stage: Stage, unit: Option<&ExecutionUnit>) -> String {
    match unit {
        Some(u) => format!("{stage} {}", u.label()),
        None => stage.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Policy and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Invoking,
    Validating,
    Success,
    RetryPending,
    Exhausted,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptState::Invoking => "invoking",
            AttemptState::Validating => "validating",
            AttemptState::Success => "success",
            AttemptState::RetryPending => "retry_pending",
            AttemptState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub state: AttemptState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationIssue>,
}

/// Result of a unit that reached `Success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub stage: Stage,
    pub label: String,
    pub attempts: u32,
    pub validated: bool,
    pub history: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRequest {
    pub stage: Stage,
    pub feature: Option<String>,
    pub unit: Option<ExecutionUnit>,
    pub guidance: Option<String>,
    /// File name quoted in retry guidance.
    pub output_name: Option<String>,
}

impl UnitRequest {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            feature: None,
            unit: None,
            guidance: None,
            output_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run one unit to `Success`, or fail with `Process` / `RetryExhausted`.
///
/// Without a validator the unit succeeds as soon as the agent exits cleanly.
pub fn execute<A: AgentInvoker + ?Sized>(
    agent: &mut A,
    policy: RetryPolicy,
    request: &UnitRequest,
    mut validate: Option<&mut dyn FnMut() -> ValidationResult>,
) -> Result<UnitOutcome> {
    let label = unit_label(request.stage, request.unit.as_ref());
    let started_at = Utc::now();
    let max_attempts = policy.max_attempts();
    let mut history = Vec::new();
    let mut guidance = request.guidance.clone();
    let mut attempt = 1;

    loop {
        tracing::info!(unit = %label, attempt, max_attempts, state = %AttemptState::Invoking, "starting agent session");
        let invocation = Invocation {
            stage: request.stage,
            feature: request.feature.clone(),
            unit: request.unit.clone(),
            guidance: guidance.clone(),
            attempt,
        };
        agent
            .invoke(&invocation)
            .map_err(|e| SpecrunError::Process {
                unit: label.clone(),
                message: e.0,
            })?;

        let Some(check) = validate.as_deref_mut() else {
            history.push(AttemptRecord {
                attempt,
                state: AttemptState::Success,
                errors: Vec::new(),
            });
            tracing::info!(unit = %label, attempt, state = %AttemptState::Success, "unit complete");
            return Ok(UnitOutcome {
                stage: request.stage,
                label,
                attempts: attempt,
                validated: false,
                history,
                started_at,
                finished_at: Utc::now(),
            });
        };

        tracing::debug!(unit = %label, attempt, state = %AttemptState::Validating, "validating output");
        let result = check();
        if result.valid {
            history.push(AttemptRecord {
                attempt,
                state: AttemptState::Success,
                errors: Vec::new(),
            });
            tracing::info!(unit = %label, attempt, state = %AttemptState::Success, "unit complete");
            return Ok(UnitOutcome {
                stage: request.stage,
                label,
                attempts: attempt,
                validated: true,
                history,
                started_at,
                finished_at: Utc::now(),
            });
        }

        if attempt >= max_attempts {
            tracing::warn!(unit = %label, attempt, state = %AttemptState::Exhausted, errors = result.errors.len(), "validation failed, no retries left");
            return Err(SpecrunError::RetryExhausted {
                unit: label,
                attempts: attempt,
                summary: result.summary(),
            });
        }

        tracing::warn!(unit = %label, attempt, state = %AttemptState::RetryPending, first_error = %result.summary(), "validation failed, retrying");
        let file = request.output_name.as_deref().unwrap_or("the output");
        let retry = result.as_guidance(file);
        guidance = Some(match &request.guidance {
            Some(g) if !g.trim().is_empty() => format!("{g}\n\n{retry}"),
            _ => retry,
        });
        history.push(AttemptRecord {
            attempt,
            state: AttemptState::RetryPending,
            errors: result.errors,
        });
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingAgent {
        calls: Vec<Invocation>,
        fail_on: Option<u32>,
    }

    impl AgentInvoker for CountingAgent {
        fn invoke(&mut self, invocation: &Invocation) -> std::result::Result<(), ProcessFailure> {
            self.calls.push(invocation.clone());
            if self.fail_on == Some(invocation.attempt) {
                return Err(ProcessFailure("process exited with code 2".into()));
            }
            Ok(())
        }
    }

    fn invalid() -> ValidationResult {
        ValidationResult::from_errors(vec![ValidationIssue::new("summary", "required key is missing")])
    }

    fn plan_request() -> UnitRequest {
        UnitRequest {
            guidance: Some("keep it short".into()),
            output_name: Some("plan.yaml".into()),
            ..UnitRequest::new(Stage::Plan)
        }
    }

    #[test]
    fn always_invalid_stops_after_three_attempts() {
        let mut agent = CountingAgent::default();
        let mut checks = 0;
        let mut validate = || {
            checks += 1;
            invalid()
        };
        let err = execute(&mut agent, RetryPolicy::new(2), &plan_request(), Some(&mut validate))
            .unwrap_err();
        assert_eq!(agent.calls.len(), 3);
        assert_eq!(checks, 3);
        match err {
            SpecrunError::RetryExhausted { unit, attempts, summary } => {
                assert_eq!(unit, "plan");
                assert_eq!(attempts, 3);
                assert!(summary.contains("summary"));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[test]
    fn fail_once_then_succeed_takes_two_attempts() {
        let mut agent = CountingAgent::default();
        let mut results = vec![ValidationResult::ok(), invalid()];
        let mut validate = || results.pop().unwrap();
        let outcome =
            execute(&mut agent, RetryPolicy::new(2), &plan_request(), Some(&mut validate)).unwrap();
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.validated);
        assert_eq!(agent.calls.len(), 2);
        assert_eq!(outcome.history[0].state, AttemptState::RetryPending);
        assert_eq!(outcome.history[1].state, AttemptState::Success);
    }

    #[test]
    fn retry_guidance_carries_validation_errors() {
        let mut agent = CountingAgent::default();
        let mut results = vec![ValidationResult::ok(), invalid()];
        let mut validate = || results.pop().unwrap();
        execute(&mut agent, RetryPolicy::new(1), &plan_request(), Some(&mut validate)).unwrap();
        assert_eq!(agent.calls[0].guidance.as_deref(), Some("keep it short"));
        let retry = agent.calls[1].guidance.as_deref().unwrap();
        assert!(retry.starts_with("keep it short\n\n"));
        assert!(retry.contains("plan.yaml invalid"));
        assert!(retry.contains("- summary: required key is missing"));
    }

    #[test]
    fn process_failure_is_not_retried() {
        let mut agent = CountingAgent {
            fail_on: Some(1),
            ..Default::default()
        };
        let mut validate = ValidationResult::ok;
        let err = execute(&mut agent, RetryPolicy::new(5), &plan_request(), Some(&mut validate))
            .unwrap_err();
        assert_eq!(agent.calls.len(), 1);
        assert_eq!(err.kind(), "process_error");
        assert!(err.to_string().starts_with("plan: agent process failed"));
    }

    #[test]
    fn process_failure_on_retry_still_fatal() {
        let mut agent = CountingAgent {
            fail_on: Some(2),
            ..Default::default()
        };
        let mut validate = invalid;
        let err = execute(&mut agent, RetryPolicy::new(5), &plan_request(), Some(&mut validate))
            .unwrap_err();
        assert_eq!(agent.calls.len(), 2);
        assert_eq!(err.kind(), "process_error");
    }

    #[test]
    fn unvalidated_stage_succeeds_after_invocation() {
        let mut agent = CountingAgent::default();
        let outcome =
            execute(&mut agent, RetryPolicy::new(2), &UnitRequest::new(Stage::Clarify), None).unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.validated);
        assert_eq!(agent.calls[0].prompt(), "/specrun.clarify");
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let mut agent = CountingAgent::default();
        let mut validate = invalid;
        let err = execute(&mut agent, RetryPolicy::new(0), &plan_request(), Some(&mut validate))
            .unwrap_err();
        assert_eq!(agent.calls.len(), 1);
        assert_eq!(err.kind(), "retry_exhausted");
    }

    #[test]
    fn prompt_includes_unit_scope_and_guidance() {
        let inv = Invocation {
            stage: Stage::Implement,
            feature: Some("001-auth".into()),
            unit: Some(ExecutionUnit::Task {
                id: "T003".into(),
                phase_number: 2,
                title: "Build".into(),
            }),
            guidance: Some("use sqlite".into()),
            attempt: 1,
        };
        assert_eq!(inv.prompt(), "/specrun.implement --task T003 use sqlite");
        assert_eq!(inv.unit_label(), "implement task T003");
    }
}
