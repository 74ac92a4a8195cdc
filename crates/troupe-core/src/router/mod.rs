//! DelegationRouter — binds a step to a qualified worker.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::models::conversation::Conversation;
use crate::models::delegation::{DelegationStatus, TaskDelegation};
use crate::models::worker::CapabilitySet;
use crate::registry::CapabilityRegistry;
use crate::store::DelegationStore;
use crate::workflow::schema::{WorkflowStep, WorkflowType};

#[derive(Clone)]
pub struct DelegationRouter {
    registry: CapabilityRegistry,
    delegations: DelegationStore,
}

impl DelegationRouter {
    pub fn new(registry: CapabilityRegistry, delegations: DelegationStore) -> Self {
        Self {
            registry,
            delegations,
        }
    }

    /// Create a delegation for one step attempt.
    ///
    /// `required` is the requirement snapshot for this attempt — the
    /// step's own set on the first attempt, possibly narrowed on retries.
    /// `NoSuitableWorker` from the registry propagates unchanged.
    pub async fn route(
        &self,
        step: &WorkflowStep,
        workflow_type: WorkflowType,
        conversation: &Conversation,
        attempt: u32,
        required: &CapabilitySet,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<TaskDelegation, CoreError> {
        let worker = self.registry.select(required).await?;

        let status = match workflow_type {
            // One step at a time: only the first unexecuted step may go
            // active; anything routed while another delegation is active
            // waits as pending.
            WorkflowType::Sequential | WorkflowType::Expedited => {
                if self.delegations.has_active(&conversation.id).await? {
                    DelegationStatus::Pending
                } else {
                    DelegationStatus::Active
                }
            }
            WorkflowType::Collaborative | WorkflowType::Parallel => DelegationStatus::Active,
        };

        let reason = if attempt > 1 {
            format!("retry {} of step '{}'", attempt - 1, step.id)
        } else {
            format!("step '{}' of a {} workflow", step.id, workflow_type.as_str())
        };

        let delegation = TaskDelegation::new(
            conversation.id.clone(),
            step.id.clone(),
            attempt,
            conversation.worker_id.clone(),
            worker.id.clone(),
            reason,
            required.clone(),
            context,
            status,
        );
        self.delegations.save(&delegation).await?;

        tracing::info!(
            "[Router] Step '{}' (attempt {}) -> worker {} [{}]",
            step.id,
            attempt,
            worker.id,
            delegation.status.as_str()
        );
        Ok(delegation)
    }

    /// Record sibling delegation ids into each delegation of a
    /// collaborative wave so concurrently active workers are aware of
    /// each other.
    pub async fn link_siblings(
        &self,
        delegations: &mut [TaskDelegation],
    ) -> Result<(), CoreError> {
        if delegations.len() < 2 {
            return Ok(());
        }
        let ids: Vec<String> = delegations.iter().map(|d| d.id.clone()).collect();
        for delegation in delegations.iter_mut() {
            let siblings: Vec<&String> = ids.iter().filter(|id| **id != delegation.id).collect();
            delegation.context.insert(
                "siblingDelegations".to_string(),
                serde_json::json!(siblings),
            );
            self.delegations.save(delegation).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::conversation::Conversation;
    use crate::models::worker::Worker;
    use crate::store::{ConversationStore, WorkerStore};
    use crate::workflow::schema::WorkflowStep;

    async fn setup() -> (DelegationRouter, Conversation, DelegationStore) {
        let db = Database::open_in_memory().unwrap();
        let workers = WorkerStore::new(db.clone());
        workers
            .save(&Worker::new("req".into(), "requester".into(), ["chat"].into_iter().collect()))
            .await
            .unwrap();
        workers
            .save(&Worker::new("w1".into(), "a".into(), ["x", "y"].into_iter().collect()))
            .await
            .unwrap();

        let conversation = Conversation::new("c1".into(), "req".into());
        ConversationStore::new(db.clone())
            .save(&conversation)
            .await
            .unwrap();

        let delegations = DelegationStore::new(db.clone());
        let router = DelegationRouter::new(
            CapabilityRegistry::new(workers),
            delegations.clone(),
        );
        (router, conversation, delegations)
    }

    fn step(id: &str, caps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.into(),
            description: format!("do {}", id),
            required_capabilities: caps.iter().copied().collect(),
            required_inputs: Vec::new(),
            validation: Vec::new(),
            output_format: None,
        }
    }

    #[tokio::test]
    async fn test_target_covers_step_requirements() {
        let (router, conversation, _) = setup().await;
        let step = step("s1", &["x"]);
        let delegation = router
            .route(
                &step,
                WorkflowType::Sequential,
                &conversation,
                1,
                &step.required_capabilities,
                HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(delegation.to_worker_id, "w1");
        assert_eq!(delegation.from_worker_id, "req");
        assert_eq!(delegation.status, DelegationStatus::Active);
    }

    #[tokio::test]
    async fn test_sequential_second_route_is_pending_while_first_active() {
        let (router, conversation, _) = setup().await;
        let first = step("s1", &["x"]);
        let second = step("s2", &["x"]);

        router
            .route(
                &first,
                WorkflowType::Sequential,
                &conversation,
                1,
                &first.required_capabilities,
                HashMap::new(),
            )
            .await
            .unwrap();
        let d2 = router
            .route(
                &second,
                WorkflowType::Sequential,
                &conversation,
                1,
                &second.required_capabilities,
                HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(d2.status, DelegationStatus::Pending);
    }

    #[tokio::test]
    async fn test_no_suitable_worker_propagates() {
        let (router, conversation, _) = setup().await;
        let step = step("s1", &["nonexistent"]);
        let err = router
            .route(
                &step,
                WorkflowType::Sequential,
                &conversation,
                1,
                &step.required_capabilities,
                HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSuitableWorker { .. }));
    }

    #[tokio::test]
    async fn test_collaborative_siblings_are_linked() {
        let (router, conversation, store) = setup().await;
        let s1 = step("s1", &["x"]);
        let s2 = step("s2", &["x"]);

        let mut wave = vec![
            router
                .route(&s1, WorkflowType::Collaborative, &conversation, 1, &s1.required_capabilities, HashMap::new())
                .await
                .unwrap(),
            router
                .route(&s2, WorkflowType::Collaborative, &conversation, 1, &s2.required_capabilities, HashMap::new())
                .await
                .unwrap(),
        ];
        router.link_siblings(&mut wave).await.unwrap();

        let reloaded = store.get(&wave[0].id).await.unwrap().unwrap();
        let siblings = reloaded.context.get("siblingDelegations").unwrap();
        assert_eq!(siblings.as_array().unwrap().len(), 1);
        assert_eq!(
            siblings.as_array().unwrap()[0].as_str().unwrap(),
            wave[1].id
        );
    }
}
