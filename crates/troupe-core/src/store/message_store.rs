use chrono::Utc;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::message::{Message, MessageRole};

#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Messages are append-only; there is no update path.
    pub async fn append(&self, message: &Message) -> Result<(), CoreError> {
        let m = message.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO messages (id, conversation_id, role, content, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        m.id,
                        m.conversation_id,
                        m.role.as_str(),
                        m.content,
                        m.timestamp.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, CoreError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, timestamp
                     FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], |row| Ok(row_to_message(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

use rusqlite::Row;

fn row_to_message(row: &Row<'_>) -> Message {
    let ts_ms: i64 = row.get(4).unwrap_or(0);
    Message {
        id: row.get(0).unwrap_or_default(),
        conversation_id: row.get(1).unwrap_or_default(),
        role: MessageRole::from_str(&row.get::<_, String>(2).unwrap_or_default()),
        content: row.get(3).unwrap_or_default(),
        timestamp: chrono::DateTime::from_timestamp_millis(ts_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Conversation;
    use crate::models::worker::Worker;
    use crate::store::{ConversationStore, WorkerStore};

    #[tokio::test]
    async fn test_append_and_ordered_listing() {
        let db = Database::open_in_memory().unwrap();
        WorkerStore::new(db.clone())
            .save(&Worker::new("w1".into(), "a".into(), ["x"].into_iter().collect()))
            .await
            .unwrap();
        ConversationStore::new(db.clone())
            .save(&Conversation::new("c1".into(), "w1".into()))
            .await
            .unwrap();

        let store = MessageStore::new(db);
        let mut first = Message::new("c1".into(), MessageRole::User, "hello".into());
        first.timestamp = Utc::now() - chrono::Duration::seconds(5);
        store.append(&first).await.unwrap();
        store
            .append(&Message::new("c1".into(), MessageRole::Assistant, "hi".into()))
            .await
            .unwrap();

        let messages = store.list_by_conversation("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }
}
