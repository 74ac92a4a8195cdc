//! RequestAnalyzer — turns raw request text into structured requirements.
//!
//! The underlying generation call is non-deterministic and may return
//! malformed structure; the parsed output is structurally validated
//! before use and `CoreError::Analysis` is raised otherwise. No retry is
//! performed here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::worker::CapabilitySet;
use crate::runtime::{TaskSpec, WorkerRuntime};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

/// One identified topic of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComponent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
}

/// Structured requirements extracted from a raw request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequirements {
    pub requires_delegation: bool,
    pub task_type: String,
    /// 1 (lowest) to 5 (highest).
    pub priority: u8,
    /// 1 (trivial) to 5 (hardest).
    pub complexity: u8,
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub components: Vec<TaskComponent>,
    #[serde(default)]
    pub urgency: Urgency,
}

impl TaskRequirements {
    /// Components deduplicated by lowercased name, in arrival order.
    pub fn distinct_topics(&self) -> Vec<&TaskComponent> {
        let mut seen = std::collections::HashSet::new();
        self.components
            .iter()
            .filter(|c| seen.insert(c.name.trim().to_lowercase()))
            .collect()
    }
}

const ANALYSIS_PROMPT: &str = "Analyze the request below and answer with a single JSON object:\n\
{\n\
  \"requiresDelegation\": bool,\n\
  \"taskType\": string,\n\
  \"priority\": 1-5,\n\
  \"complexity\": 1-5,\n\
  \"requiredCapabilities\": [string],\n\
  \"subtasks\": [string],\n\
  \"components\": [{\"name\": string, \"description\": string, \"requiredCapabilities\": [string]}],\n\
  \"urgency\": \"low\" | \"normal\" | \"high\"\n\
}\n\n\
Request:\n";

pub struct RequestAnalyzer {
    runtime: Arc<dyn WorkerRuntime>,
}

impl RequestAnalyzer {
    pub fn new(runtime: Arc<dyn WorkerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn analyze(
        &self,
        worker_id: &str,
        raw_text: &str,
    ) -> Result<TaskRequirements, CoreError> {
        let task = TaskSpec::new(format!("{}{}", ANALYSIS_PROMPT, raw_text));
        let response = self.runtime.execute(worker_id, task).await?;

        let requirements = parse_requirements(&response.output)?;
        validate_requirements(&requirements)?;

        tracing::debug!(
            "[Analyzer] type={} complexity={} topics={} delegation={}",
            requirements.task_type,
            requirements.complexity,
            requirements.distinct_topics().len(),
            requirements.requires_delegation
        );
        Ok(requirements)
    }
}

/// Parse the analyzer output, tolerating prose or fences around the JSON
/// object by slicing the outermost `{…}` span.
fn parse_requirements(output: &str) -> Result<TaskRequirements, CoreError> {
    let start = output
        .find('{')
        .ok_or_else(|| CoreError::Analysis("no JSON object in analyzer output".to_string()))?;
    let end = output
        .rfind('}')
        .ok_or_else(|| CoreError::Analysis("unterminated JSON object in analyzer output".to_string()))?;
    if end < start {
        return Err(CoreError::Analysis(
            "unterminated JSON object in analyzer output".to_string(),
        ));
    }

    serde_json::from_str(&output[start..=end])
        .map_err(|e| CoreError::Analysis(format!("malformed analyzer output: {}", e)))
}

fn validate_requirements(req: &TaskRequirements) -> Result<(), CoreError> {
    if !(1..=5).contains(&req.priority) {
        return Err(CoreError::Analysis(format!(
            "priority out of range: {}",
            req.priority
        )));
    }
    if !(1..=5).contains(&req.complexity) {
        return Err(CoreError::Analysis(format!(
            "complexity out of range: {}",
            req.complexity
        )));
    }
    if req.task_type.trim().is_empty() {
        return Err(CoreError::Analysis("empty taskType".to_string()));
    }
    if req.requires_delegation
        && req.required_capabilities.is_empty()
        && req.components.iter().all(|c| c.required_capabilities.is_empty())
    {
        return Err(CoreError::Analysis(
            "delegation required but no capabilities identified".to_string(),
        ));
    }
    Ok(())
}
