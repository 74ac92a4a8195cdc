//! Workflow plan types.
//!
//! A definition is immutable once planned for a conversation. Besides the
//! planner, definitions can be authored externally as YAML:
//!
//! ```yaml
//! workflow_type: sequential
//! steps:
//!   - id: "understanding"
//!     description: "Build a shared understanding of the request"
//!     required_capabilities: ["analysis"]
//!     validation:
//!       - kind: completeness
//!         criteria: "must include summary"
//! fallback:
//!   max_retries: 2
//!   alternates:
//!     understanding:
//!       id: "understanding_lite"
//!       description: "Summarize the request in one paragraph"
//!       required_capabilities: ["analysis"]
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::worker::CapabilitySet;

/// The execution topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    Sequential,
    Parallel,
    Collaborative,
    Expedited,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Collaborative => "collaborative",
            Self::Expedited => "expedited",
        }
    }

    /// Blocking topologies halt on escalation; concurrent ones let
    /// sibling steps finish independently.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Sequential | Self::Expedited)
    }

    pub fn is_concurrent(&self) -> bool {
        !self.is_blocking()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Completeness,
    Coherence,
    Relevance,
    Consistency,
    Format,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::Coherence => "coherence",
            Self::Relevance => "relevance",
            Self::Consistency => "consistency",
            Self::Format => "format",
        }
    }
}

/// A declared output check for a step.
///
/// Criteria grammar:
/// - `must include <text>` — case-insensitive substring
/// - `matches <regex>` — regex match
/// - `min length <n>` — at least n characters
/// - anything else — output must be non-blank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub kind: RuleKind,
    #[serde(default)]
    pub criteria: String,
}

impl ValidationRule {
    pub fn new(kind: RuleKind, criteria: impl Into<String>) -> Self {
        Self {
            kind,
            criteria: criteria.into(),
        }
    }

    /// The description carried into `StepValidation` failures.
    pub fn describe(&self) -> String {
        if self.criteria.is_empty() {
            format!("{}: output must not be empty", self.kind.as_str())
        } else {
            format!("{}: {}", self.kind.as_str(), self.criteria)
        }
    }

    pub fn check(&self, output: &str) -> bool {
        let criteria = self.criteria.trim();
        if let Some(needle) = criteria.strip_prefix("must include ") {
            return output.to_lowercase().contains(&needle.trim().to_lowercase());
        }
        if let Some(pattern) = criteria.strip_prefix("matches ") {
            return match regex::Regex::new(pattern.trim()) {
                Ok(re) => re.is_match(output),
                Err(e) => {
                    tracing::warn!("[Validation] Bad pattern '{}': {}", pattern, e);
                    false
                }
            };
        }
        if let Some(n) = criteria.strip_prefix("min length ") {
            return match n.trim().parse::<usize>() {
                Ok(min) => output.chars().count() >= min,
                Err(_) => false,
            };
        }
        !output.trim().is_empty()
    }
}

/// An atomic unit of work within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within a workflow.
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    /// Prerequisite step ids whose outputs feed this step.
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    #[serde(default)]
    pub output_format: Option<String>,
}

/// Structured recovery policy, validated at plan-build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Alternate step definitions keyed by the id of the step they replace.
    #[serde(default)]
    pub alternates: HashMap<String, WorkflowStep>,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            alternates: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_type: WorkflowType,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

impl WorkflowDefinition {
    /// Parse a definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let definition: Self = serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::InvalidPlan(format!("Failed to parse workflow YAML: {}", e)))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load a definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidPlan(format!("Failed to read workflow file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Structural checks done once, when the plan is built.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fallback.max_retries > 10 {
            return Err(CoreError::InvalidPlan(format!(
                "fallback max_retries must be <= 10, got {}",
                self.fallback.max_retries
            )));
        }

        let mut ids = std::collections::HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(CoreError::InvalidPlan("step with empty id".to_string()));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(CoreError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        // Prerequisites may only reference earlier steps, which also rules
        // out cycles.
        let mut earlier = std::collections::HashSet::new();
        for step in &self.steps {
            for input in &step.required_inputs {
                if !earlier.contains(input.as_str()) {
                    return Err(CoreError::InvalidPlan(format!(
                        "step '{}' requires input '{}' which is not an earlier step",
                        step.id, input
                    )));
                }
            }
            earlier.insert(step.id.as_str());
        }

        for (original_id, alternate) in &self.fallback.alternates {
            if !ids.contains(original_id.as_str()) {
                return Err(CoreError::InvalidPlan(format!(
                    "alternate keyed by unknown step '{}'",
                    original_id
                )));
            }
            if ids.contains(alternate.id.as_str()) {
                return Err(CoreError::InvalidPlan(format!(
                    "alternate id '{}' collides with a plan step",
                    alternate.id
                )));
            }
            for input in &alternate.required_inputs {
                if !ids.contains(input.as_str()) {
                    return Err(CoreError::InvalidPlan(format!(
                        "alternate '{}' requires unknown input '{}'",
                        alternate.id, input
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Result of a single executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub worker_id: String,
    pub output: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub elapsed_ms: u64,
}

/// Step results keyed by step id. Each slot is written once and replaced
/// only when a retry or alternate re-runs that step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowData {
    results: HashMap<String, StepResult>,
}

impl WorkflowData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: StepResult) {
        self.results.insert(result.step_id.clone(), result);
    }

    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.results.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Prerequisite outputs for a step, keyed by step id.
    pub fn inputs_for(&self, step: &WorkflowStep) -> HashMap<String, String> {
        step.required_inputs
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| (id.clone(), r.output.clone())))
            .collect()
    }

    /// Deterministic merge: ordered concatenation keyed by step id in
    /// definition order. Steps without a result (skipped) are omitted.
    pub fn aggregate(&self, steps: &[WorkflowStep]) -> String {
        let mut out = String::new();
        for step in steps {
            if let Some(result) = self.results.get(&step.id) {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(&format!("## {}\n{}", step.id, result.output));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, inputs: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.into(),
            description: format!("do {}", id),
            required_capabilities: CapabilitySet::new(),
            required_inputs: inputs.iter().map(|s| s.to_string()).collect(),
            validation: Vec::new(),
            output_format: None,
        }
    }

    #[test]
    fn test_must_include_rule() {
        let rule = ValidationRule::new(RuleKind::Completeness, "must include summary");
        assert!(rule.check("Summary: all good"));
        assert!(!rule.check("nothing to see"));
        assert_eq!(rule.describe(), "completeness: must include summary");
    }

    #[test]
    fn test_matches_and_min_length_rules() {
        let re_rule = ValidationRule::new(RuleKind::Format, "matches ^\\d+$");
        assert!(re_rule.check("12345"));
        assert!(!re_rule.check("abc"));

        let len_rule = ValidationRule::new(RuleKind::Completeness, "min length 10");
        assert!(len_rule.check("0123456789"));
        assert!(!len_rule.check("short"));
    }

    #[test]
    fn test_blank_criteria_means_non_blank_output() {
        let rule = ValidationRule::new(RuleKind::Relevance, "");
        assert!(rule.check("anything"));
        assert!(!rule.check("   \n"));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let definition = WorkflowDefinition {
            workflow_type: WorkflowType::Sequential,
            steps: vec![step("a", &[]), step("a", &[])],
            fallback: FallbackPolicy::default(),
        };
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_forward_references_rejected() {
        let definition = WorkflowDefinition {
            workflow_type: WorkflowType::Sequential,
            steps: vec![step("a", &["b"]), step("b", &[])],
            fallback: FallbackPolicy::default(),
        };
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_alternate_must_reference_plan_step() {
        let mut fallback = FallbackPolicy::default();
        fallback
            .alternates
            .insert("ghost".into(), step("ghost_alt", &[]));
        let definition = WorkflowDefinition {
            workflow_type: WorkflowType::Sequential,
            steps: vec![step("a", &[])],
            fallback,
        };
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
workflow_type: sequential
steps:
  - id: "understanding"
    description: "Build a shared understanding of the request"
    required_capabilities: ["analysis"]
    validation:
      - kind: completeness
        criteria: "must include summary"
  - id: "quality_check"
    description: "Check the combined output"
    required_inputs: ["understanding"]
fallback:
  max_retries: 2
"#;
        let definition = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(definition.workflow_type, WorkflowType::Sequential);
        assert_eq!(definition.steps.len(), 2);
        assert_eq!(definition.fallback.max_retries, 2);
        assert_eq!(definition.steps[0].validation.len(), 1);
    }

    #[test]
    fn test_aggregate_is_ordered_by_definition() {
        let steps = vec![step("a", &[]), step("b", &[]), step("c", &[])];
        let mut data = WorkflowData::new();
        data.record(StepResult {
            step_id: "c".into(),
            worker_id: "w".into(),
            output: "third".into(),
            metadata: HashMap::new(),
            elapsed_ms: 1,
        });
        data.record(StepResult {
            step_id: "a".into(),
            worker_id: "w".into(),
            output: "first".into(),
            metadata: HashMap::new(),
            elapsed_ms: 1,
        });

        let merged = data.aggregate(&steps);
        let a_pos = merged.find("first").unwrap();
        let c_pos = merged.find("third").unwrap();
        assert!(a_pos < c_pos);
        assert!(!merged.contains("## b"));
    }

    #[test]
    fn test_empty_data_aggregates_to_empty_string() {
        let data = WorkflowData::new();
        assert_eq!(data.aggregate(&[step("a", &[])]), "");
    }
}
