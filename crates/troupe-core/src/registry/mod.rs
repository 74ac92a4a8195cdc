//! CapabilityRegistry — answers "who can do X".

use crate::error::CoreError;
use crate::models::worker::{CapabilitySet, Worker};
use crate::store::WorkerStore;

#[derive(Clone)]
pub struct CapabilityRegistry {
    workers: WorkerStore,
}

impl CapabilityRegistry {
    pub fn new(workers: WorkerStore) -> Self {
        Self { workers }
    }

    /// Active workers whose capability set covers `required`, ordered by
    /// ascending `last_interaction` to spread load. Read-only.
    pub async fn find_candidates(
        &self,
        required: &CapabilitySet,
    ) -> Result<Vec<Worker>, CoreError> {
        let candidates: Vec<Worker> = self
            .workers
            .list_active()
            .await?
            .into_iter()
            .filter(|w| w.capabilities.is_superset_of(required))
            .collect();

        if candidates.is_empty() {
            return Err(CoreError::NoSuitableWorker {
                required: required.describe(),
            });
        }
        Ok(candidates)
    }

    /// Pick the first candidate and touch its `last_interaction`; the
    /// select-and-touch happens in one store operation so concurrent
    /// routers cannot both observe the same least-recently-used worker.
    pub async fn select(&self, required: &CapabilitySet) -> Result<Worker, CoreError> {
        self.workers
            .select_least_recently_used(required)
            .await?
            .ok_or_else(|| CoreError::NoSuitableWorker {
                required: required.describe(),
            })
    }
}
