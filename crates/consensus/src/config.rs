//! Timing and sizing parameters for the consensus components.
//!
//! Durations are stored as milliseconds so the structs serialize cleanly
//! into a node's JSON config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A config value outside its allowed range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid config: {0}")]
pub struct ConfigError(pub String);

/// Leader election timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Lower bound of the randomized follower timeout.
    pub election_timeout_min_ms: u64,
    /// Upper bound of the randomized follower timeout.
    pub election_timeout_max_ms: u64,
    /// Leader heartbeat period. Must be below `election_timeout_min_ms`.
    pub heartbeat_interval_ms: u64,
    /// Randomized pause after a failed candidacy.
    pub retry_delay_min_ms: u64,
    pub retry_delay_max_ms: u64,
    /// Per-call timeout for vote requests and heartbeats.
    pub rpc_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 1_500,
            election_timeout_max_ms: 3_000,
            heartbeat_interval_ms: 500,
            retry_delay_min_ms: 1_000,
            retry_delay_max_ms: 2_000,
            rpc_timeout_ms: 1_000,
        }
    }
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(ConfigError(format!(
                "election timeout range {}..{}ms is empty",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(ConfigError(format!(
                "heartbeat interval {}ms must be positive and below the election timeout {}ms",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.retry_delay_min_ms > self.retry_delay_max_ms {
            return Err(ConfigError(format!(
                "retry delay range {}..{}ms is empty",
                self.retry_delay_min_ms, self.retry_delay_max_ms
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Block proposal and voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// How often a leader tries to propose.
    pub block_interval_ms: u64,
    /// How long a proposal may collect votes before it is discarded.
    pub vote_timeout_ms: u64,
    /// Per-call timeout for proposal broadcast and vote delivery.
    pub rpc_timeout_ms: u64,
    /// Fewest pending transactions worth proposing.
    pub min_batch_size: usize,
    /// Most transactions taken into one block.
    pub max_batch_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: 10_000,
            vote_timeout_ms: 5_000,
            rpc_timeout_ms: 5_000,
            min_batch_size: 1,
            max_batch_size: 100,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_batch_size == 0 {
            return Err(ConfigError("min_batch_size must be at least 1".into()));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(ConfigError(format!(
                "batch size range {}..{} is empty",
                self.min_batch_size, self.max_batch_size
            )));
        }
        if self.block_interval_ms == 0 {
            return Err(ConfigError("block interval must be positive".into()));
        }
        Ok(())
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Follower catch-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub sync_interval_ms: u64,
    /// Pause before the first sync.
    pub startup_delay_ms: u64,
    pub rpc_timeout_ms: u64,
    /// Height query attempts per peer.
    pub max_retries: u32,
    /// Attempt `i` waits `i * base_backoff_ms` before the next one.
    pub base_backoff_ms: u64,
    /// Window size for range fetches.
    pub max_blocks_per_request: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 30_000,
            startup_delay_ms: 0,
            rpc_timeout_ms: 10_000,
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_blocks_per_request: 100,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError("max_retries must be at least 1".into()));
        }
        if self.max_blocks_per_request == 0 {
            return Err(ConfigError(
                "max_blocks_per_request must be at least 1".into(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError("sync interval must be positive".into()));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(attempt as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ElectionConfig::default().validate().is_ok());
        assert!(ConsensusConfig::default().validate().is_ok());
        assert!(RecoveryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_beat_timeout() {
        let config = ElectionConfig {
            heartbeat_interval_ms: 1_500,
            ..ElectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_ranges_rejected() {
        let election = ElectionConfig {
            election_timeout_min_ms: 3_000,
            election_timeout_max_ms: 2_000,
            ..ElectionConfig::default()
        };
        assert!(election.validate().is_err());

        let consensus = ConsensusConfig {
            min_batch_size: 10,
            max_batch_size: 5,
            ..ConsensusConfig::default()
        };
        assert!(consensus.validate().is_err());
    }

    #[test]
    fn test_empty_batches_not_allowed() {
        let consensus = ConsensusConfig {
            min_batch_size: 0,
            ..ConsensusConfig::default()
        };
        assert!(consensus.validate().is_err());
    }

    #[test]
    fn test_first_sync_is_immediate_by_default() {
        assert_eq!(RecoveryConfig::default().startup_delay(), Duration::ZERO);
    }

    #[test]
    fn test_linear_backoff() {
        let config = RecoveryConfig {
            base_backoff_ms: 250,
            ..RecoveryConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(250));
        assert_eq!(config.backoff(3), Duration::from_millis(750));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RecoveryConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.sync_interval_ms, 30_000);
    }
}
