//! StepExecutor — runs one delegated step and validates its output.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::models::delegation::TaskDelegation;
use crate::runtime::{TaskOutput, TaskSpec, WorkerRuntime};

use super::schema::{StepResult, WorkflowStep};

pub struct StepExecutor {
    runtime: Arc<dyn WorkerRuntime>,
    config: EngineConfig,
}

impl StepExecutor {
    pub fn new(runtime: Arc<dyn WorkerRuntime>, config: EngineConfig) -> Self {
        Self { runtime, config }
    }

    /// Invoke the delegated worker and check every validation rule.
    ///
    /// Rules are not fail-fast: all failing rule descriptions are
    /// collected into a single `StepValidation` error so the caller sees
    /// the complete list.
    pub async fn execute(
        &self,
        delegation: &TaskDelegation,
        step: &WorkflowStep,
        inputs: HashMap<String, String>,
    ) -> Result<StepResult, CoreError> {
        let task = TaskSpec {
            description: step.description.clone(),
            required_capabilities: delegation.required_capabilities.clone(),
            input: inputs,
        };

        let started = Instant::now();
        let output = self
            .call_with_checkpoints(&delegation.to_worker_id, task, &step.id)
            .await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failures: Vec<String> = step
            .validation
            .iter()
            .filter(|rule| !rule.check(&output.output))
            .map(|rule| rule.describe())
            .collect();
        if !failures.is_empty() {
            return Err(CoreError::StepValidation { failures });
        }

        Ok(StepResult {
            step_id: step.id.clone(),
            worker_id: delegation.to_worker_id.clone(),
            output: output.output,
            metadata: output.metadata,
            elapsed_ms,
        })
    }

    /// Run the opaque worker call under the configured step deadline,
    /// logging liveness at every checkpoint interval. A deadline hit is a
    /// retryable `Timeout`.
    async fn call_with_checkpoints(
        &self,
        worker_id: &str,
        task: TaskSpec,
        step_id: &str,
    ) -> Result<TaskOutput, CoreError> {
        let deadline = Duration::from_secs(self.config.max_step_duration_secs);
        let checkpoint = Duration::from_secs(self.config.checkpoint_interval_secs);

        let call = self.runtime.execute(worker_id, task);
        tokio::pin!(call);
        let timeout = tokio::time::sleep(deadline);
        tokio::pin!(timeout);
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + checkpoint, checkpoint);

        loop {
            tokio::select! {
                result = &mut call => return result,
                _ = &mut timeout => {
                    tracing::warn!(
                        "[StepExecutor] Step '{}' exceeded {}s deadline on worker {}",
                        step_id,
                        self.config.max_step_duration_secs,
                        worker_id
                    );
                    return Err(CoreError::Timeout {
                        step_id: step_id.to_string(),
                        secs: self.config.max_step_duration_secs,
                    });
                }
                _ = ticker.tick() => {
                    tracing::debug!("[StepExecutor] Step '{}' still running on worker {}", step_id, worker_id);
                }
            }
        }
    }
}
