//! Task delegations — the record binding a step to a worker.
//!
//! One row exists per (step, attempt); retries insert new rows rather
//! than mutating history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::worker::CapabilitySet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Escalated,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "escalated" => Self::Escalated,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDelegation {
    pub id: String,
    pub conversation_id: String,
    pub step_id: String,
    /// 1-based attempt number; retries and alternates bump this.
    pub attempt: u32,
    pub from_worker_id: String,
    pub to_worker_id: String,
    pub reason: String,
    /// Requirement snapshot the target was selected against.
    pub required_capabilities: CapabilitySet,
    /// Context snapshot: prerequisite outputs, sibling delegation ids, etc.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub status: DelegationStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskDelegation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: String,
        step_id: String,
        attempt: u32,
        from_worker_id: String,
        to_worker_id: String,
        reason: String,
        required_capabilities: CapabilitySet,
        context: HashMap<String, serde_json::Value>,
        status: DelegationStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            step_id,
            attempt,
            from_worker_id,
            to_worker_id,
            reason,
            required_capabilities,
            context,
            status,
            retry_count: attempt.saturating_sub(1),
            elapsed_ms: None,
            created_at: now,
            updated_at: now,
        }
    }
}
