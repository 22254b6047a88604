//! Types for test run results.

use serde::{Deserialize, Serialize};

use crate::plan::CanonicalAction;

/// What failed inside a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailedStep {
    /// A normalized plan step
    Action(CanonicalAction),

    /// A phase outside the step list (e.g. "Navigation")
    Phase(String),
}

impl FailedStep {
    pub fn navigation() -> Self {
        FailedStep::Phase("Navigation".to_string())
    }

    /// Short label for progress output
    pub fn describe(&self) -> String {
        match self {
            FailedStep::Action(action) => action.describe(),
            FailedStep::Phase(phase) => phase.clone(),
        }
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Scenario name
    pub scenario: String,

    /// Step or phase that failed
    pub action: FailedStep,

    /// Human-readable reason
    pub error: String,
}

/// Result of a complete plan run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether every counted step passed
    pub success: bool,

    /// Steps counted toward the total (all but network listeners)
    pub total_tests: usize,

    /// Counted steps that passed
    pub passed_tests: usize,

    /// Failures in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,

    /// Run-fatal reason (plan load, server start, no tests executed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A run that stopped before any scenario executed
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Render failures as a numbered list for prompts and summaries
    pub fn failure_summary(&self) -> String {
        if let Some(error) = &self.error {
            if self.failures.is_empty() {
                return format!("1. {}", error);
            }
        }
        self.failures
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. [{}] {}: {}", i + 1, f.scenario, f.action.describe(), f.error))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_skips_empty() {
        let result = ExecutionResult {
            success: true,
            total_tests: 3,
            passed_tests: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalTests"], 3);
        assert_eq!(json["passedTests"], 3);
        assert!(json.get("failures").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn navigation_failure_serializes_as_string() {
        let record = FailureRecord {
            scenario: "Login".into(),
            action: FailedStep::navigation(),
            error: "Could not load /login".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["action"], "Navigation");
    }

    #[test]
    fn action_failure_round_trips() {
        let record = FailureRecord {
            scenario: "Home".into(),
            action: FailedStep::Action(CanonicalAction::See { value: "Hi".into() }),
            error: "Text \"Hi\" not found.".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: FailureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn unknown_step_failure_round_trips() {
        let original: crate::plan::RawStep = serde_yaml::from_str("{hover: Menu}").unwrap();
        let record = FailureRecord {
            scenario: "Home".into(),
            action: FailedStep::Action(CanonicalAction::Unknown { original }),
            error: "Unrecognized step: {\"hover\":\"Menu\"}".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: FailureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn summary_lists_failures() {
        let result = ExecutionResult {
            failures: vec![FailureRecord {
                scenario: "Home".into(),
                action: FailedStep::navigation(),
                error: "Could not load /".into(),
            }],
            ..Default::default()
        };
        assert_eq!(result.failure_summary(), "1. [Home] Navigation: Could not load /");
        assert_eq!(ExecutionResult::fatal("No tests executed").failure_summary(), "1. No tests executed");
    }
}
