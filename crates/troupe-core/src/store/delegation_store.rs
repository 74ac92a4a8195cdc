use std::collections::HashMap;

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::delegation::{DelegationStatus, TaskDelegation};
use crate::models::worker::CapabilitySet;

#[derive(Clone)]
pub struct DelegationStore {
    db: Database,
}

impl DelegationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, delegation: &TaskDelegation) -> Result<(), CoreError> {
        let d = delegation.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO delegations (id, conversation_id, step_id, attempt, from_worker_id,
                       to_worker_id, reason, required_capabilities, context, status, retry_count,
                       elapsed_ms, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT(id) DO UPDATE SET
                       context = excluded.context,
                       status = excluded.status,
                       elapsed_ms = excluded.elapsed_ms,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        d.id,
                        d.conversation_id,
                        d.step_id,
                        d.attempt,
                        d.from_worker_id,
                        d.to_worker_id,
                        d.reason,
                        serde_json::to_string(&d.required_capabilities).unwrap_or_default(),
                        serde_json::to_string(&d.context).unwrap_or_default(),
                        d.status.as_str(),
                        d.retry_count,
                        d.elapsed_ms,
                        d.created_at.timestamp_millis(),
                        d.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, delegation_id: &str) -> Result<Option<TaskDelegation>, CoreError> {
        let id = delegation_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM delegations WHERE id = ?1",
                    COLUMNS
                ))?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_delegation(row)))
                    .optional()
            })
            .await
    }

    pub async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TaskDelegation>, CoreError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM delegations WHERE conversation_id = ?1
                     ORDER BY created_at ASC, attempt ASC",
                    COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![id], |row| Ok(row_to_delegation(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<TaskDelegation>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM delegations ORDER BY created_at ASC",
                    COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_delegation(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Whether the conversation currently has an `active` delegation.
    pub async fn has_active(&self, conversation_id: &str) -> Result<bool, CoreError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM delegations
                     WHERE conversation_id = ?1 AND status = 'active'",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    pub async fn update_status(
        &self,
        delegation_id: &str,
        status: DelegationStatus,
    ) -> Result<(), CoreError> {
        let id = delegation_id.to_string();
        let status_str = status.as_str().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE delegations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status_str, now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_elapsed(&self, delegation_id: &str, elapsed_ms: u64) -> Result<(), CoreError> {
        let id = delegation_id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE delegations SET elapsed_ms = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![elapsed_ms as i64, now, id],
                )?;
                Ok(())
            })
            .await
    }
}

const COLUMNS: &str = "id, conversation_id, step_id, attempt, from_worker_id, to_worker_id, \
                       reason, required_capabilities, context, status, retry_count, elapsed_ms, \
                       created_at, updated_at";

use rusqlite::Row;

fn row_to_delegation(row: &Row<'_>) -> TaskDelegation {
    let caps_str: String = row.get(7).unwrap_or_default();
    let required_capabilities: CapabilitySet = serde_json::from_str(&caps_str).unwrap_or_default();
    let context_str: String = row.get(8).unwrap_or_default();
    let context: HashMap<String, serde_json::Value> =
        serde_json::from_str(&context_str).unwrap_or_default();
    let created_ms: i64 = row.get(12).unwrap_or(0);
    let updated_ms: i64 = row.get(13).unwrap_or(0);

    TaskDelegation {
        id: row.get(0).unwrap_or_default(),
        conversation_id: row.get(1).unwrap_or_default(),
        step_id: row.get(2).unwrap_or_default(),
        attempt: row.get::<_, i64>(3).unwrap_or(1) as u32,
        from_worker_id: row.get(4).unwrap_or_default(),
        to_worker_id: row.get(5).unwrap_or_default(),
        reason: row.get(6).unwrap_or_default(),
        required_capabilities,
        context,
        status: DelegationStatus::from_str(&row.get::<_, String>(9).unwrap_or_default()),
        retry_count: row.get::<_, i64>(10).unwrap_or(0) as u32,
        elapsed_ms: row.get::<_, Option<i64>>(11).unwrap_or(None).map(|v| v as u64),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
