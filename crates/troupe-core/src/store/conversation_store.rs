use std::collections::HashMap;

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::conversation::{Conversation, ConversationStatus};

#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, conversation: &Conversation) -> Result<(), CoreError> {
        let c = conversation.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO conversations (id, worker_id, status, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                       status = excluded.status,
                       metadata = excluded.metadata,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        c.id,
                        c.worker_id,
                        c.status.as_str(),
                        serde_json::to_string(&c.metadata).unwrap_or_default(),
                        c.created_at.timestamp_millis(),
                        c.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, CoreError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, worker_id, status, metadata, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_conversation(row)))
                    .optional()
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Conversation>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, worker_id, status, metadata, created_at, updated_at
                     FROM conversations ORDER BY created_at ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_conversation(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Move an active conversation to a terminal status.
    ///
    /// Transitions are monotonic: a conversation that already reached a
    /// terminal status is left untouched and `false` is returned.
    pub async fn finalize(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> Result<bool, CoreError> {
        let id = conversation_id.to_string();
        let status_str = status.as_str().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let changed = conn.execute(
                    "UPDATE conversations SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'active'",
                    rusqlite::params![status_str, now, id],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    pub async fn update_metadata(
        &self,
        conversation_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), CoreError> {
        let id = conversation_id.to_string();
        let meta = serde_json::to_string(metadata).unwrap_or_default();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE conversations SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![meta, now, id],
                )?;
                Ok(())
            })
            .await
    }
}

use rusqlite::Row;

fn row_to_conversation(row: &Row<'_>) -> Conversation {
    let metadata_str: String = row.get(3).unwrap_or_default();
    let metadata: HashMap<String, String> =
        serde_json::from_str(&metadata_str).unwrap_or_default();
    let created_ms: i64 = row.get(4).unwrap_or(0);
    let updated_ms: i64 = row.get(5).unwrap_or(0);

    Conversation {
        id: row.get(0).unwrap_or_default(),
        worker_id: row.get(1).unwrap_or_default(),
        status: ConversationStatus::from_str(&row.get::<_, String>(2).unwrap_or_default()),
        metadata,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::worker::Worker;
    use crate::store::WorkerStore;

    async fn seeded_store() -> ConversationStore {
        let db = Database::open_in_memory().unwrap();
        WorkerStore::new(db.clone())
            .save(&Worker::new("w1".into(), "a".into(), ["x"].into_iter().collect()))
            .await
            .unwrap();
        ConversationStore::new(db)
    }

    #[tokio::test]
    async fn test_finalize_is_monotonic() {
        let store = seeded_store().await;
        let conversation = Conversation::new("c1".into(), "w1".into());
        store.save(&conversation).await.unwrap();

        assert!(store
            .finalize("c1", ConversationStatus::Completed)
            .await
            .unwrap());
        // A second transition attempt on a terminal conversation is refused.
        assert!(!store
            .finalize("c1", ConversationStatus::Failed)
            .await
            .unwrap());

        let loaded = store.get("c1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::Completed);
    }
}
