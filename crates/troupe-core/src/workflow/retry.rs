//! RetryFallbackController — the recovery state machine.
//!
//! A failed step attempt is recovered in a fixed order: retry while the
//! per-(execution, step) counter allows it, then the policy's alternate
//! step if one is defined, then escalation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::CoreError;
use crate::models::worker::CapabilitySet;

use super::schema::{FallbackPolicy, WorkflowStep};

/// Mutable state scoped to one workflow execution, owned by the
/// coordinator. Counters are keyed by step id so unrelated executions can
/// never observe each other's retries.
#[derive(Debug, Default)]
pub struct ExecutionState {
    retries: HashMap<String, u32>,
    alternates_used: HashSet<String>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_count(&self, step_id: &str) -> u32 {
        self.retries.get(step_id).copied().unwrap_or(0)
    }

    fn increment(&mut self, step_id: &str) -> u32 {
        let count = self.retries.entry(step_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Pluggable derivation of the requirement set for a step's next attempt.
pub trait NarrowingStrategy: Send + Sync {
    fn narrow(
        &self,
        step: &WorkflowStep,
        previous: &CapabilitySet,
        attempt: u32,
    ) -> CapabilitySet;
}

/// Default strategy: drop the lowest-priority (last-ordered) capability,
/// never going below one.
pub struct DropLowestPriority;

impl NarrowingStrategy for DropLowestPriority {
    fn narrow(
        &self,
        _step: &WorkflowStep,
        previous: &CapabilitySet,
        _attempt: u32,
    ) -> CapabilitySet {
        if previous.len() <= 1 {
            return previous.clone();
        }
        let mut narrowed = previous.clone();
        if let Some(last) = previous.iter().last().cloned() {
            narrowed.remove(&last);
        }
        narrowed
    }
}

/// What the coordinator should do about a failed step attempt.
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// Resubmit the step with (possibly narrowed) requirements. The only
    /// transition back to Active.
    Retry {
        attempt: u32,
        requirements: CapabilitySet,
    },
    /// Run the alternate definition in place of the original, as a fresh
    /// attempt with its own retry budget.
    Alternate { step: WorkflowStep },
    /// Both options exhausted; terminal for this step.
    Escalate,
}

pub struct RetryFallbackController {
    narrowing: Arc<dyn NarrowingStrategy>,
}

impl RetryFallbackController {
    pub fn new(narrowing: Arc<dyn NarrowingStrategy>) -> Self {
        Self { narrowing }
    }

    /// Decide recovery for a failed attempt of `step`. Callers only reach
    /// this for retryable errors; everything else propagates to the
    /// coordinator untouched.
    pub fn decide(
        &self,
        state: &Mutex<ExecutionState>,
        step: &WorkflowStep,
        previous_requirements: &CapabilitySet,
        policy: &FallbackPolicy,
        error: &CoreError,
    ) -> RecoveryAction {
        let mut state = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // 1. Retry check, always first.
        if state.retry_count(&step.id) < policy.max_retries {
            let count = state.increment(&step.id);
            let requirements = self.narrowing.narrow(step, previous_requirements, count + 1);
            tracing::info!(
                "[Retry] Step '{}' retry {}/{} after: {}",
                step.id,
                count,
                policy.max_retries,
                error
            );
            return RecoveryAction::Retry {
                attempt: count + 1,
                requirements,
            };
        }

        // 2. Alternate path, only once retries are exhausted and at most
        //    once per execution.
        if let Some(alternate) = policy.alternates.get(&step.id) {
            if state.alternates_used.insert(step.id.clone()) {
                tracing::info!(
                    "[Retry] Step '{}' retries exhausted, switching to alternate '{}'",
                    step.id,
                    alternate.id
                );
                return RecoveryAction::Alternate {
                    step: alternate.clone(),
                };
            }
        }

        // 3. Escalation.
        tracing::warn!(
            "[Retry] Step '{}' exhausted retry and alternate options",
            step.id
        );
        RecoveryAction::Escalate
    }
}
