//! WorkflowCoordinator — drives the step loop and finalizes the
//! conversation.
//!
//! Sequential and expedited plans run one step at a time. Parallel and
//! collaborative plans run in readiness waves: every step whose
//! prerequisites are settled is dispatched concurrently, each owning its
//! own `WorkflowData` slot.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::CoreError;
use crate::events::{EventBus, WorkflowEvent, WorkflowEventType};
use crate::models::conversation::{Conversation, ConversationStatus};
use crate::models::delegation::{DelegationStatus, TaskDelegation};
use crate::models::message::{Message, MessageRole};
use crate::router::DelegationRouter;
use crate::store::{ConversationStore, DelegationStore, MessageStore};

use super::executor::StepExecutor;
use super::retry::{ExecutionState, RecoveryAction, RetryFallbackController};
use super::schema::{WorkflowData, WorkflowDefinition, WorkflowStep, WorkflowType};

/// Terminal state of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Completed,
    /// Prerequisites were not completed; not a failure.
    Skipped,
    Escalated,
}

/// What a finished execution looks like to the caller.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub output: String,
}

pub struct WorkflowCoordinator {
    router: DelegationRouter,
    executor: StepExecutor,
    controller: RetryFallbackController,
    conversations: ConversationStore,
    messages: MessageStore,
    delegations: DelegationStore,
    events: EventBus,
}

impl WorkflowCoordinator {
    pub fn new(
        router: DelegationRouter,
        executor: StepExecutor,
        controller: RetryFallbackController,
        conversations: ConversationStore,
        messages: MessageStore,
        delegations: DelegationStore,
        events: EventBus,
    ) -> Self {
        Self {
            router,
            executor,
            controller,
            conversations,
            messages,
            delegations,
            events,
        }
    }

    /// Execute a planned definition for a conversation.
    pub async fn run(
        &self,
        conversation: &Conversation,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowOutcome, CoreError> {
        let state = Mutex::new(ExecutionState::new());
        let data = Mutex::new(WorkflowData::new());
        let mut outcomes: HashMap<String, StepOutcome> = HashMap::new();

        if definition.workflow_type.is_blocking() {
            self.run_ordered(conversation, definition, &state, &data, &mut outcomes)
                .await?;
        } else {
            self.run_waves(conversation, definition, &state, &data, &mut outcomes)
                .await?;
        }

        let data = into_inner(data);
        self.finalize(conversation, definition, data, &outcomes).await
    }

    /// Definition order, one step at a time; escalation halts the run.
    async fn run_ordered(
        &self,
        conversation: &Conversation,
        definition: &WorkflowDefinition,
        state: &Mutex<ExecutionState>,
        data: &Mutex<WorkflowData>,
        outcomes: &mut HashMap<String, StepOutcome>,
    ) -> Result<(), CoreError> {
        for step in &definition.steps {
            if self.is_cancelled(&conversation.id).await? {
                tracing::info!(
                    "[Coordinator] Conversation {} ended externally, no further dispatch",
                    conversation.id
                );
                break;
            }
            if !prerequisites_met(step, outcomes) {
                tracing::info!(
                    "[Coordinator] Skipping step '{}': prerequisites not completed",
                    step.id
                );
                outcomes.insert(step.id.clone(), StepOutcome::Skipped);
                continue;
            }

            let outcome = self
                .run_step(conversation, definition, step, state, data, None)
                .await?;
            outcomes.insert(step.id.clone(), outcome);
            if outcome == StepOutcome::Escalated {
                break;
            }
        }
        Ok(())
    }

    /// Readiness waves; sibling steps keep running when one escalates.
    async fn run_waves(
        &self,
        conversation: &Conversation,
        definition: &WorkflowDefinition,
        state: &Mutex<ExecutionState>,
        data: &Mutex<WorkflowData>,
        outcomes: &mut HashMap<String, StepOutcome>,
    ) -> Result<(), CoreError> {
        let mut remaining: Vec<WorkflowStep> = definition.steps.clone();

        while !remaining.is_empty() {
            if self.is_cancelled(&conversation.id).await? {
                tracing::info!(
                    "[Coordinator] Conversation {} ended externally, no further dispatch",
                    conversation.id
                );
                break;
            }

            let (ready, rest): (Vec<WorkflowStep>, Vec<WorkflowStep>) = remaining
                .into_iter()
                .partition(|s| s.required_inputs.iter().all(|i| outcomes.contains_key(i)));
            if ready.is_empty() {
                // Unreachable with a validated plan.
                return Err(CoreError::InvalidPlan(
                    "steps remain but none are ready".to_string(),
                ));
            }
            remaining = rest;

            let mut runnable = Vec::new();
            for step in ready {
                if prerequisites_met(&step, outcomes) {
                    runnable.push(step);
                } else {
                    tracing::info!(
                        "[Coordinator] Skipping step '{}': prerequisites not completed",
                        step.id
                    );
                    outcomes.insert(step.id.clone(), StepOutcome::Skipped);
                }
            }
            if runnable.is_empty() {
                continue;
            }

            // Collaborative waves pre-route the whole wave so every
            // delegation carries its sibling ids.
            let mut initial: HashMap<String, TaskDelegation> = HashMap::new();
            if definition.workflow_type == WorkflowType::Collaborative && runnable.len() > 1 {
                let mut wave = Vec::with_capacity(runnable.len());
                for step in &runnable {
                    let context = step_context(data, step);
                    wave.push(
                        self.router
                            .route(
                                step,
                                definition.workflow_type,
                                conversation,
                                1,
                                &step.required_capabilities,
                                context,
                            )
                            .await?,
                    );
                }
                self.router.link_siblings(&mut wave).await?;
                for delegation in wave {
                    initial.insert(delegation.step_id.clone(), delegation);
                }
            }

            let jobs: Vec<(WorkflowStep, Option<TaskDelegation>)> = runnable
                .into_iter()
                .map(|step| {
                    let delegation = initial.remove(&step.id);
                    (step, delegation)
                })
                .collect();

            let results = futures::future::join_all(jobs.iter().map(|(step, delegation)| {
                self.run_step(
                    conversation,
                    definition,
                    step,
                    state,
                    data,
                    delegation.clone(),
                )
            }))
            .await;

            let mut first_error = None;
            for ((step, _), result) in jobs.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        outcomes.insert(step.id.clone(), outcome);
                    }
                    Err(err) => {
                        // Let the rest of the wave settle, then surface.
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drive one step through route → execute → recover until it lands on
    /// a terminal outcome. `initial` carries a pre-routed delegation for
    /// collaborative waves.
    async fn run_step(
        &self,
        conversation: &Conversation,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        state: &Mutex<ExecutionState>,
        data: &Mutex<WorkflowData>,
        initial: Option<TaskDelegation>,
    ) -> Result<StepOutcome, CoreError> {
        let slot_id = step.id.clone();
        let mut current = step.clone();
        let mut required = current.required_capabilities.clone();
        let mut delegation_slot = initial;
        let mut attempt: u32 = 1;

        loop {
            let inputs = lock(data).inputs_for(&current);
            let delegation = match delegation_slot.take() {
                Some(d) => d,
                None => {
                    let context = step_context(data, &current);
                    self.router
                        .route(
                            &current,
                            definition.workflow_type,
                            conversation,
                            attempt,
                            &required,
                            context,
                        )
                        .await?
                }
            };

            match self.executor.execute(&delegation, &current, inputs).await {
                Ok(mut result) => {
                    self.delegations
                        .set_elapsed(&delegation.id, result.elapsed_ms)
                        .await?;
                    self.delegations
                        .update_status(&delegation.id, DelegationStatus::Completed)
                        .await?;

                    // Alternates fill the original step's slot.
                    result.step_id = slot_id.clone();
                    let elapsed_ms = result.elapsed_ms;
                    let worker_id = result.worker_id.clone();
                    lock(data).record(result);

                    self.events.emit(WorkflowEvent::new(
                        WorkflowEventType::StepCompleted,
                        &conversation.id,
                        serde_json::json!({
                            "stepId": slot_id,
                            "workerId": worker_id,
                            "attempt": attempt,
                            "elapsedMs": elapsed_ms,
                        }),
                    ));
                    tracing::info!(
                        "[Coordinator] Step '{}' completed by {} in {}ms (attempt {})",
                        slot_id,
                        worker_id,
                        elapsed_ms,
                        attempt
                    );
                    return Ok(StepOutcome::Completed);
                }
                Err(err) if err.is_retryable() => {
                    self.delegations
                        .update_status(&delegation.id, DelegationStatus::Failed)
                        .await?;
                    tracing::warn!(
                        "[Coordinator] Step '{}' attempt {} failed: {}",
                        current.id,
                        attempt,
                        err
                    );

                    match self.controller.decide(
                        state,
                        &current,
                        &required,
                        &definition.fallback,
                        &err,
                    ) {
                        RecoveryAction::Retry {
                            attempt: next,
                            requirements,
                        } => {
                            attempt = next;
                            required = requirements;
                        }
                        RecoveryAction::Alternate { step: alternate } => {
                            required = alternate.required_capabilities.clone();
                            current = alternate;
                            attempt = 1;
                        }
                        RecoveryAction::Escalate => {
                            self.delegations
                                .update_status(&delegation.id, DelegationStatus::Escalated)
                                .await?;
                            self.escalate(conversation, &slot_id, &err).await?;
                            return Ok(StepOutcome::Escalated);
                        }
                    }
                }
                Err(err) => {
                    self.delegations
                        .update_status(&delegation.id, DelegationStatus::Failed)
                        .await?;
                    return Err(err);
                }
            }
        }
    }

    /// Full internal context goes to logs; the user sees generic terms
    /// and their options.
    async fn escalate(
        &self,
        conversation: &Conversation,
        step_id: &str,
        err: &CoreError,
    ) -> Result<(), CoreError> {
        tracing::error!(
            "[Coordinator] Step '{}' escalated in conversation {}: {:?}",
            step_id,
            conversation.id,
            err
        );

        let content = format!(
            "Part of your request ('{}') could not be completed automatically. \
             You can proceed with reduced quality, request a human handoff, \
             or ask for an alternative approach.",
            step_id
        );
        self.messages
            .append(&Message::new(
                conversation.id.clone(),
                MessageRole::System,
                content,
            ))
            .await?;

        self.events.emit(WorkflowEvent::new(
            WorkflowEventType::StepEscalated,
            &conversation.id,
            serde_json::json!({ "stepId": step_id }),
        ));
        Ok(())
    }

    async fn finalize(
        &self,
        conversation: &Conversation,
        definition: &WorkflowDefinition,
        data: WorkflowData,
        outcomes: &HashMap<String, StepOutcome>,
    ) -> Result<WorkflowOutcome, CoreError> {
        let aggregate = data.aggregate(&definition.steps);

        // Externally finalized (cancelled) conversations keep their status.
        if let Some(current) = self.conversations.get(&conversation.id).await? {
            if current.status.is_terminal() {
                return Ok(WorkflowOutcome {
                    conversation_id: conversation.id.clone(),
                    status: current.status,
                    output: aggregate,
                });
            }
        }

        let mut metadata = conversation.metadata.clone();
        metadata.insert("aggregateResult".to_string(), aggregate.clone());
        self.conversations
            .update_metadata(&conversation.id, &metadata)
            .await?;

        let any_escalated = outcomes
            .values()
            .any(|o| matches!(o, StepOutcome::Escalated));
        if any_escalated {
            self.conversations
                .finalize(&conversation.id, ConversationStatus::Escalated)
                .await?;
            return Ok(WorkflowOutcome {
                conversation_id: conversation.id.clone(),
                status: ConversationStatus::Escalated,
                output: aggregate,
            });
        }

        let executed = outcomes
            .values()
            .filter(|o| matches!(o, StepOutcome::Completed))
            .count();
        let skipped = outcomes
            .values()
            .filter(|o| matches!(o, StepOutcome::Skipped))
            .count();

        self.conversations
            .finalize(&conversation.id, ConversationStatus::Completed)
            .await?;
        self.messages
            .append(&Message::new(
                conversation.id.clone(),
                MessageRole::System,
                format!(
                    "Workflow complete: {} of {} steps produced output ({} skipped).",
                    executed,
                    definition.steps.len(),
                    skipped
                ),
            ))
            .await?;
        self.events.emit(WorkflowEvent::new(
            WorkflowEventType::WorkflowCompleted,
            &conversation.id,
            serde_json::json!({
                "steps": definition.steps.len(),
                "executed": executed,
                "skipped": skipped,
            }),
        ));
        tracing::info!(
            "[Coordinator] Conversation {} completed ({}/{} steps, {} skipped)",
            conversation.id,
            executed,
            definition.steps.len(),
            skipped
        );

        Ok(WorkflowOutcome {
            conversation_id: conversation.id.clone(),
            status: ConversationStatus::Completed,
            output: aggregate,
        })
    }

    async fn is_cancelled(&self, conversation_id: &str) -> Result<bool, CoreError> {
        Ok(self
            .conversations
            .get(conversation_id)
            .await?
            .map(|c| c.status.is_terminal())
            .unwrap_or(true))
    }
}

fn prerequisites_met(step: &WorkflowStep, outcomes: &HashMap<String, StepOutcome>) -> bool {
    step.required_inputs
        .iter()
        .all(|id| matches!(outcomes.get(id), Some(StepOutcome::Completed)))
}

fn step_context(
    data: &Mutex<WorkflowData>,
    step: &WorkflowStep,
) -> HashMap<String, serde_json::Value> {
    let inputs = lock(data).inputs_for(step);
    let mut context = HashMap::new();
    context.insert("inputs".to_string(), serde_json::json!(inputs));
    context
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    match mutex.into_inner() {
        Ok(value) => value,
        Err(poisoned) => poisoned.into_inner(),
    }
}
