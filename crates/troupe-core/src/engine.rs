//! The orchestration engine — wires the pieces and owns the entry point.
//!
//! One orchestration instance per conversation: `handle_request` creates
//! the conversation, analyzes the request, and either answers directly or
//! plans and coordinates a workflow.

use std::sync::Arc;

use crate::analyzer::RequestAnalyzer;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::metrics::MetricsAnalyzer;
use crate::models::conversation::{Conversation, ConversationStatus};
use crate::models::message::{Message, MessageRole};
use crate::registry::CapabilityRegistry;
use crate::router::DelegationRouter;
use crate::runtime::{TaskSpec, WorkerRuntime};
use crate::store::{ConversationStore, DelegationStore, MessageStore, WorkerStore};
use crate::workflow::{
    DropLowestPriority, NarrowingStrategy, RetryFallbackController, StepExecutor,
    WorkflowCoordinator, WorkflowPlanner,
};

/// What the caller gets back from `handle_request`.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub output: Option<String>,
}

pub struct Engine {
    runtime: Arc<dyn WorkerRuntime>,
    analyzer: RequestAnalyzer,
    planner: WorkflowPlanner,
    coordinator: WorkflowCoordinator,
    workers: WorkerStore,
    conversations: ConversationStore,
    messages: MessageStore,
    events: EventBus,
    metrics: MetricsAnalyzer,
}

impl Engine {
    pub fn new(
        db: Database,
        runtime: Arc<dyn WorkerRuntime>,
        config: EngineConfig,
    ) -> Result<Self, CoreError> {
        Self::with_narrowing(db, runtime, config, Arc::new(DropLowestPriority))
    }

    /// Build an engine with a custom requirement-narrowing strategy.
    pub fn with_narrowing(
        db: Database,
        runtime: Arc<dyn WorkerRuntime>,
        config: EngineConfig,
        narrowing: Arc<dyn NarrowingStrategy>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let workers = WorkerStore::new(db.clone());
        let conversations = ConversationStore::new(db.clone());
        let messages = MessageStore::new(db.clone());
        let delegations = DelegationStore::new(db);
        let events = EventBus::new();

        let registry = CapabilityRegistry::new(workers.clone());
        let router = DelegationRouter::new(registry, delegations.clone());
        let executor = StepExecutor::new(runtime.clone(), config.clone());
        let controller = RetryFallbackController::new(narrowing);
        let coordinator = WorkflowCoordinator::new(
            router,
            executor,
            controller,
            conversations.clone(),
            messages.clone(),
            delegations.clone(),
            events.clone(),
        );
        let metrics = MetricsAnalyzer::new(
            workers.clone(),
            conversations.clone(),
            messages.clone(),
            delegations,
        );

        Ok(Self {
            analyzer: RequestAnalyzer::new(runtime.clone()),
            planner: WorkflowPlanner::new(config),
            coordinator,
            runtime,
            workers,
            conversations,
            messages,
            events,
            metrics,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Offline analytics over the accumulated history.
    pub fn metrics(&self) -> &MetricsAnalyzer {
        &self.metrics
    }

    /// Coordinate execution of a raw natural-language request.
    pub async fn handle_request(
        &self,
        requester_id: &str,
        raw_text: &str,
    ) -> Result<ConversationHandle, CoreError> {
        let requester = self
            .workers
            .get(requester_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("worker {}", requester_id)))?;

        let conversation = Conversation::new(uuid::Uuid::new_v4().to_string(), requester.id.clone());
        self.conversations.save(&conversation).await?;
        self.messages
            .append(&Message::new(
                conversation.id.clone(),
                MessageRole::User,
                raw_text.to_string(),
            ))
            .await?;
        tracing::info!(
            "[Engine] Conversation {} opened for worker {}",
            conversation.id,
            requester.id
        );

        let requirements = match self.analyzer.analyze(&requester.id, raw_text).await {
            Ok(requirements) => requirements,
            Err(err) => {
                return self
                    .fail(
                        &conversation,
                        "The request could not be analyzed. Please rephrase and try again.",
                        err,
                    )
                    .await;
            }
        };

        if !requirements.requires_delegation {
            return self.respond_directly(&conversation, raw_text).await;
        }

        let definition = match self.planner.plan(&requirements) {
            Ok(definition) => definition,
            Err(err) => {
                return self
                    .fail(
                        &conversation,
                        "The request could not be broken into workable steps.",
                        err,
                    )
                    .await;
            }
        };

        match self.coordinator.run(&conversation, &definition).await {
            Ok(outcome) => Ok(ConversationHandle {
                conversation_id: outcome.conversation_id,
                status: outcome.status,
                output: Some(outcome.output),
            }),
            Err(err @ CoreError::NoSuitableWorker { .. }) => {
                self.fail(
                    &conversation,
                    "No worker is currently available for part of your request. \
                     You can wait and retry, reduce the scope, or request a human handoff.",
                    err,
                )
                .await
            }
            Err(err) => {
                self.fail(
                    &conversation,
                    "An internal error interrupted this request.",
                    err,
                )
                .await
            }
        }
    }

    /// No delegation: one direct runtime call, exactly one assistant
    /// message appended.
    async fn respond_directly(
        &self,
        conversation: &Conversation,
        raw_text: &str,
    ) -> Result<ConversationHandle, CoreError> {
        let task = TaskSpec::new(raw_text);
        let response = match self.runtime.execute(&conversation.worker_id, task).await {
            Ok(response) => response,
            Err(err) => {
                return self
                    .fail(
                        conversation,
                        "The request could not be answered right now. Please try again.",
                        err,
                    )
                    .await;
            }
        };

        self.messages
            .append(&Message::new(
                conversation.id.clone(),
                MessageRole::Assistant,
                response.output.clone(),
            ))
            .await?;
        self.conversations
            .finalize(&conversation.id, ConversationStatus::Completed)
            .await?;
        tracing::info!(
            "[Engine] Conversation {} answered directly",
            conversation.id
        );

        Ok(ConversationHandle {
            conversation_id: conversation.id.clone(),
            status: ConversationStatus::Completed,
            output: Some(response.output),
        })
    }

    /// Mark the conversation failed with a sanitized user-facing message;
    /// the full error goes to logs and back to the caller.
    async fn fail(
        &self,
        conversation: &Conversation,
        user_message: &str,
        err: CoreError,
    ) -> Result<ConversationHandle, CoreError> {
        tracing::error!(
            "[Engine] Conversation {} failed: {:?}",
            conversation.id,
            err
        );
        self.messages
            .append(&Message::new(
                conversation.id.clone(),
                MessageRole::System,
                user_message.to_string(),
            ))
            .await?;
        self.conversations
            .finalize(&conversation.id, ConversationStatus::Failed)
            .await?;
        Err(err)
    }
}
