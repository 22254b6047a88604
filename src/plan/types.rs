use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::config::DEFAULT_BASE_URL;

/// A complete test plan parsed from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestPlan {
    /// Plan-wide settings
    #[serde(default)]
    pub meta: PlanMeta,

    /// Scenarios in execution order
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

/// The `meta` block of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMeta {
    /// Root URL every scenario path is appended to
    #[serde(rename = "baseUrl", default = "default_base_url")]
    pub base_url: String,
}

impl Default for PlanMeta {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// One named, path-scoped sequence of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Human-readable scenario name (used in failure records)
    pub name: String,

    /// URL path appended to `meta.baseUrl`
    #[serde(default)]
    pub path: String,

    /// Raw shorthand steps, executed in order
    #[serde(default)]
    pub tests: Vec<RawStep>,
}

/// An untyped plan step, exactly as written in the YAML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawStep(pub serde_yaml::Mapping);

impl RawStep {
    /// Look up a key and render its scalar value as a string.
    ///
    /// Null values, empty strings and non-scalar values count as absent, which
    /// mirrors how the DSL treats a key with no usable value.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let value = self.0.get(key)?;
        let text = match value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(true) => "true".to_string(),
            _ => return None,
        };
        if text.is_empty() { None } else { Some(text) }
    }
}

impl TestPlan {
    /// Parse a plan from a YAML string
    pub fn from_yaml(yaml: &str) -> PlanResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let plan: Option<TestPlan> = serde_yaml::from_str(yaml)?;
        Ok(plan.unwrap_or_default())
    }

    /// Parse a plan from a YAML file
    pub fn from_file(path: &Path) -> PlanResult<Self> {
        if !path.exists() {
            return Err(PlanError::Missing(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Base URL with any trailing slash removed, ready for path concatenation
    pub fn base_url(&self) -> &str {
        self.meta.base_url.trim_end_matches('/')
    }

    /// Total number of raw steps across all scenarios
    pub fn step_count(&self) -> usize {
        self.scenarios.iter().map(|s| s.tests.len()).sum()
    }
}

/// Result type for plan operations
pub type PlanResult<T> = Result<T, PlanError>;

/// Error types for loading a plan
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan file does not exist
    #[error("Could not find test plan at {0}")]
    Missing(String),

    /// I/O error while reading the plan
    #[error("I/O error reading test plan: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid plan YAML
    #[error("Error parsing test plan: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_with_defaults() {
        let yaml = r#"
scenarios:
  - name: Home
    path: /
    tests:
      - see: "Welcome"
"#;
        let plan = TestPlan::from_yaml(yaml).unwrap();
        assert_eq!(plan.meta.base_url, "http://localhost:3000");
        assert_eq!(plan.scenarios.len(), 1);
        assert_eq!(plan.step_count(), 1);
        assert_eq!(plan.scenarios[0].tests[0].get_str("see").as_deref(), Some("Welcome"));
    }

    #[test]
    fn test_parse_plan_meta_base_url() {
        let yaml = r#"
meta:
  baseUrl: "http://127.0.0.1:4000/"
scenarios: []
"#;
        let plan = TestPlan::from_yaml(yaml).unwrap();
        assert_eq!(plan.base_url(), "http://127.0.0.1:4000");
        assert!(plan.scenarios.is_empty());
    }

    #[test]
    fn test_empty_document_is_an_empty_plan() {
        let plan = TestPlan::from_yaml("").unwrap();
        assert!(plan.scenarios.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(matches!(TestPlan::from_yaml("scenarios: [oops"), Err(PlanError::Yaml(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = TestPlan::from_file(Path::new("/definitely/not/here/vibe.yaml")).unwrap_err();
        assert!(matches!(err, PlanError::Missing(_)));
    }

    #[test]
    fn test_raw_step_scalars() {
        let step: RawStep = serde_yaml::from_str("{wait: 500, see: '', flag: false}").unwrap();
        assert_eq!(step.get_str("wait").as_deref(), Some("500"));
        assert_eq!(step.get_str("see"), None);
        assert_eq!(step.get_str("flag"), None);
        assert_eq!(step.get_str("missing"), None);
    }
}
