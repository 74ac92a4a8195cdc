use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::worker::{CapabilitySet, Worker};

#[derive(Clone)]
pub struct WorkerStore {
    db: Database,
}

impl WorkerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, worker: &Worker) -> Result<(), CoreError> {
        let w = worker.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workers (id, name, capabilities, last_interaction, active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                       name = excluded.name,
                       capabilities = excluded.capabilities,
                       last_interaction = excluded.last_interaction,
                       active = excluded.active,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        w.id,
                        w.name,
                        serde_json::to_string(&w.capabilities).unwrap_or_default(),
                        w.last_interaction.timestamp_millis(),
                        w.active as i64,
                        w.created_at.timestamp_millis(),
                        w.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, worker_id: &str) -> Result<Option<Worker>, CoreError> {
        let id = worker_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, capabilities, last_interaction, active, created_at, updated_at
                     FROM workers WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_worker(row)))
                    .optional()
            })
            .await
    }

    /// All active workers, least-recently-used first.
    pub async fn list_active(&self) -> Result<Vec<Worker>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, capabilities, last_interaction, active, created_at, updated_at
                     FROM workers WHERE active = 1 ORDER BY last_interaction ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_worker(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Worker>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, capabilities, last_interaction, active, created_at, updated_at
                     FROM workers ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_worker(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Pick the least-recently-used active worker whose capability set is a
    /// superset of `required`, and touch its `last_interaction` in the same
    /// connection hold so concurrent selections cannot interleave.
    pub async fn select_least_recently_used(
        &self,
        required: &CapabilitySet,
    ) -> Result<Option<Worker>, CoreError> {
        let required = required.clone();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, capabilities, last_interaction, active, created_at, updated_at
                     FROM workers WHERE active = 1 ORDER BY last_interaction ASC, id ASC",
                )?;
                let candidates = stmt
                    .query_map([], |row| Ok(row_to_worker(row)))?
                    .collect::<Result<Vec<_>, _>>()?;

                let Some(mut worker) = candidates
                    .into_iter()
                    .find(|w| w.capabilities.is_superset_of(&required))
                else {
                    return Ok(None);
                };

                let now = Utc::now();
                conn.execute(
                    "UPDATE workers SET last_interaction = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![
                        now.timestamp_millis(),
                        now.timestamp_millis(),
                        worker.id
                    ],
                )?;
                worker.last_interaction = now;
                worker.updated_at = now;
                Ok(Some(worker))
            })
            .await
    }

    pub async fn set_capabilities(
        &self,
        worker_id: &str,
        capabilities: &CapabilitySet,
    ) -> Result<(), CoreError> {
        let id = worker_id.to_string();
        let caps = serde_json::to_string(capabilities).unwrap_or_default();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE workers SET capabilities = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![caps, now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_active(&self, worker_id: &str, active: bool) -> Result<(), CoreError> {
        let id = worker_id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE workers SET active = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![active as i64, now, id],
                )?;
                Ok(())
            })
            .await
    }
}

use rusqlite::Row;

fn row_to_worker(row: &Row<'_>) -> Worker {
    let caps_str: String = row.get(2).unwrap_or_default();
    let capabilities: CapabilitySet = serde_json::from_str(&caps_str).unwrap_or_default();
    let last_ms: i64 = row.get(3).unwrap_or(0);
    let created_ms: i64 = row.get(5).unwrap_or(0);
    let updated_ms: i64 = row.get(6).unwrap_or(0);

    Worker {
        id: row.get(0).unwrap_or_default(),
        name: row.get(1).unwrap_or_default(),
        capabilities,
        last_interaction: chrono::DateTime::from_timestamp_millis(last_ms)
            .unwrap_or_else(Utc::now),
        active: row.get::<_, i64>(4).unwrap_or(0) != 0,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
