//! Conversations — one per orchestrated request.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
    Escalated,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "escalated" => Self::Escalated,
            _ => Self::Active,
        }
    }

    /// Terminal statuses are never reactivated.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// The requester worker that owns this conversation.
    pub worker_id: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: String, worker_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            worker_id,
            status: ConversationStatus::Active,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ConversationStatus::Active,
            ConversationStatus::Completed,
            ConversationStatus::Failed,
            ConversationStatus::Escalated,
        ] {
            assert_eq!(ConversationStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_only_active_is_non_terminal() {
        assert!(!ConversationStatus::Active.is_terminal());
        assert!(ConversationStatus::Completed.is_terminal());
        assert!(ConversationStatus::Failed.is_terminal());
        assert!(ConversationStatus::Escalated.is_terminal());
    }
}
