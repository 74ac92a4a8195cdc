//! MetricsAnalyzer — offline analytics over historical delegations.
//!
//! Pure read-side aggregation; nothing here is on the execution critical
//! path, and a failure here never affects orchestration.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::CoreError;
use crate::models::conversation::ConversationStatus;
use crate::models::message::MessageRole;
use crate::models::worker::Capability;
use crate::store::{ConversationStore, DelegationStore, MessageStore, WorkerStore};

/// A conversation's delegation chain, flagged when suspiciously long.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub conversation_id: String,
    pub chain_length: usize,
    pub bottleneck: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReport {
    pub per_worker: HashMap<String, usize>,
    pub normalized_std_dev: f64,
    pub imbalanced: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityUtilization {
    pub capability: String,
    pub rate: f64,
    pub under_utilized: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub completion_rate: f64,
    pub average_completion_ms: Option<f64>,
    pub chains: Vec<ChainReport>,
    pub worker_latency_ms: HashMap<String, f64>,
    pub workload: WorkloadReport,
    pub capability_utilization: Vec<CapabilityUtilization>,
}

const BOTTLENECK_CHAIN_LENGTH: usize = 3;
const IMBALANCE_THRESHOLD: f64 = 0.3;
const UNDER_UTILIZATION_THRESHOLD: f64 = 0.3;

#[derive(Clone)]
pub struct MetricsAnalyzer {
    workers: WorkerStore,
    conversations: ConversationStore,
    messages: MessageStore,
    delegations: DelegationStore,
}

impl MetricsAnalyzer {
    pub fn new(
        workers: WorkerStore,
        conversations: ConversationStore,
        messages: MessageStore,
        delegations: DelegationStore,
    ) -> Self {
        Self {
            workers,
            conversations,
            messages,
            delegations,
        }
    }

    /// completed / total, 0.0 when there is no history yet.
    pub async fn completion_rate(&self) -> Result<f64, CoreError> {
        let conversations = self.conversations.list_all().await?;
        if conversations.is_empty() {
            return Ok(0.0);
        }
        let completed = conversations
            .iter()
            .filter(|c| c.status == ConversationStatus::Completed)
            .count();
        Ok(completed as f64 / conversations.len() as f64)
    }

    /// Mean created→updated delta of completed conversations.
    pub async fn average_completion_ms(&self) -> Result<Option<f64>, CoreError> {
        let durations: Vec<f64> = self
            .conversations
            .list_all()
            .await?
            .into_iter()
            .filter(|c| c.status == ConversationStatus::Completed)
            .map(|c| (c.updated_at - c.created_at).num_milliseconds() as f64)
            .collect();
        if durations.is_empty() {
            return Ok(None);
        }
        Ok(Some(durations.iter().sum::<f64>() / durations.len() as f64))
    }

    /// Delegation-chain length per conversation; chains longer than 3 are
    /// flagged as bottlenecks.
    pub async fn delegation_chains(&self) -> Result<Vec<ChainReport>, CoreError> {
        let mut per_conversation: HashMap<String, usize> = HashMap::new();
        for delegation in self.delegations.list_all().await? {
            *per_conversation.entry(delegation.conversation_id).or_insert(0) += 1;
        }
        let mut chains: Vec<ChainReport> = per_conversation
            .into_iter()
            .map(|(conversation_id, chain_length)| ChainReport {
                conversation_id,
                chain_length,
                bottleneck: chain_length > BOTTLENECK_CHAIN_LENGTH,
            })
            .collect();
        chains.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        Ok(chains)
    }

    /// Mean gap between consecutive user→assistant message pairs,
    /// attributed to the conversation's owning worker.
    pub async fn worker_latency_ms(&self) -> Result<HashMap<String, f64>, CoreError> {
        let mut gaps: HashMap<String, Vec<f64>> = HashMap::new();
        for conversation in self.conversations.list_all().await? {
            let messages = self.messages.list_by_conversation(&conversation.id).await?;
            for pair in messages.windows(2) {
                if pair[0].role == MessageRole::User && pair[1].role == MessageRole::Assistant {
                    let delta = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64;
                    gaps.entry(conversation.worker_id.clone())
                        .or_default()
                        .push(delta);
                }
            }
        }
        Ok(gaps
            .into_iter()
            .map(|(worker, deltas)| {
                let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
                (worker, mean)
            })
            .collect())
    }

    /// Delegations per worker with the normalized standard deviation
    /// (std-dev / mean); above 0.3 counts as imbalanced.
    pub async fn workload_distribution(&self) -> Result<WorkloadReport, CoreError> {
        let mut per_worker: HashMap<String, usize> = HashMap::new();
        for worker in self.workers.list_all().await? {
            per_worker.insert(worker.id, 0);
        }
        for delegation in self.delegations.list_all().await? {
            *per_worker.entry(delegation.to_worker_id).or_insert(0) += 1;
        }

        let counts: Vec<f64> = per_worker.values().map(|c| *c as f64).collect();
        let normalized_std_dev = if counts.is_empty() {
            0.0
        } else {
            let mean = counts.iter().sum::<f64>() / counts.len() as f64;
            if mean == 0.0 {
                0.0
            } else {
                let variance =
                    counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
                variance.sqrt() / mean
            }
        };

        Ok(WorkloadReport {
            per_worker,
            imbalanced: normalized_std_dev > IMBALANCE_THRESHOLD,
            normalized_std_dev,
        })
    }

    /// For every capability advertised by any worker: the share of
    /// delegations that required it. Below 0.3 counts as under-utilized.
    pub async fn capability_utilization(&self) -> Result<Vec<CapabilityUtilization>, CoreError> {
        let mut advertised: Vec<Capability> = Vec::new();
        for worker in self.workers.list_all().await? {
            for capability in worker.capabilities.iter() {
                if !advertised.contains(capability) {
                    advertised.push(capability.clone());
                }
            }
        }
        advertised.sort();

        let delegations = self.delegations.list_all().await?;
        let total = delegations.len();

        Ok(advertised
            .into_iter()
            .map(|capability| {
                let rate = if total == 0 {
                    0.0
                } else {
                    let requiring = delegations
                        .iter()
                        .filter(|d| d.required_capabilities.contains(&capability))
                        .count();
                    requiring as f64 / total as f64
                };
                CapabilityUtilization {
                    capability: capability.as_str().to_string(),
                    rate,
                    under_utilized: rate < UNDER_UTILIZATION_THRESHOLD,
                }
            })
            .collect())
    }

    pub async fn analyze(&self) -> Result<MetricsReport, CoreError> {
        Ok(MetricsReport {
            completion_rate: self.completion_rate().await?,
            average_completion_ms: self.average_completion_ms().await?,
            chains: self.delegation_chains().await?,
            worker_latency_ms: self.worker_latency_ms().await?,
            workload: self.workload_distribution().await?,
            capability_utilization: self.capability_utilization().await?,
        })
    }
}
