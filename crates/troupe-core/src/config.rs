//! Engine configuration surface.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tunables consumed by the planner, executor, and retry controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum retries per (workflow execution, step).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Complexity above this selects the collaborative topology.
    #[serde(default = "default_complexity_threshold")]
    pub collaborative_complexity_threshold: u8,

    /// More distinct topics than this selects the parallel topology.
    #[serde(default = "default_topic_threshold")]
    pub parallel_topic_threshold: usize,

    /// A step running longer than this is a retryable timeout.
    #[serde(default = "default_max_step_secs")]
    pub max_step_duration_secs: u64,

    /// How often a running step reports liveness.
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_interval_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_complexity_threshold() -> u8 {
    4
}

fn default_topic_threshold() -> usize {
    3
}

fn default_max_step_secs() -> u64 {
    300
}

fn default_checkpoint_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            collaborative_complexity_threshold: default_complexity_threshold(),
            parallel_topic_threshold: default_topic_threshold(),
            max_step_duration_secs: default_max_step_secs(),
            checkpoint_interval_secs: default_checkpoint_secs(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_retries > 10 {
            return Err(CoreError::InvalidConfig(format!(
                "maxRetries must be <= 10, got {}",
                self.max_retries
            )));
        }
        if self.max_step_duration_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "maxStepDurationSecs must be nonzero".to_string(),
            ));
        }
        if self.checkpoint_interval_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "checkpointIntervalSecs must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.collaborative_complexity_threshold, 4);
        assert_eq!(config.parallel_topic_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"maxRetries": 1}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_step_duration_secs, 300);
    }

    #[test]
    fn test_rejects_unbounded_retries() {
        let config = EngineConfig {
            max_retries: 50,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
