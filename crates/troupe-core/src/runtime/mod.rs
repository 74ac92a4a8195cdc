//! The worker execution boundary.
//!
//! The reasoning that actually produces a worker's output is opaque to
//! this crate: implementations wrap whatever generation provider backs
//! the workers and map its faults to `CoreError::Provider`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::worker::CapabilitySet;

/// The task handed to a worker's opaque execution capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub description: String,
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    /// Prerequisite step outputs keyed by step id.
    #[serde(default)]
    pub input: HashMap<String, String>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required_capabilities: CapabilitySet::new(),
            input: HashMap::new(),
        }
    }
}

/// What a worker hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    pub output: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Executes tasks on behalf of workers.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn execute(&self, worker_id: &str, task: TaskSpec) -> Result<TaskOutput, CoreError>;
}
