//! Store configuration.

use crate::retry::RetryConfig;
use ocs_sequencer::SequencerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an [`OptimisticStore`](crate::OptimisticStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a document's listener stays up after its last subscriber
    /// leaves (in milliseconds).
    pub keep_alive_ms: u64,
    /// Capacity of each document's event channel.
    pub event_capacity: usize,
    /// Sequencing of remote events.
    pub sequencer: SequencerConfig,
    /// Backoff for failed connects, loads and submissions.
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: 2_000,
            event_capacity: 256,
            sequencer: SequencerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

/// Builder for store configuration.
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn keep_alive(mut self, ms: u64) -> Self {
        self.config.keep_alive_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.sequencer.max_buffer_size = size;
        self
    }

    pub fn resolve_chain_deadline(mut self, ms: u64) -> Self {
        self.config.sequencer.resolve_chain_deadline_ms = ms;
        self
    }

    pub fn retry_base_delay(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    pub fn retry_max_delay(mut self, ms: u64) -> Self {
        self.config.retry.max_delay_ms = ms;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfigBuilder::new()
            .keep_alive(500)
            .event_capacity(16)
            .max_buffer_size(4)
            .resolve_chain_deadline(1_000)
            .retry_base_delay(10)
            .retry_max_delay(100)
            .build();

        assert_eq!(config.keep_alive(), Duration::from_millis(500));
        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.sequencer.max_buffer_size, 4);
        assert_eq!(config.sequencer.resolve_chain_deadline_ms, 1_000);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 100);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"keep_alive_ms": 10}"#).unwrap();
        assert_eq!(config.keep_alive_ms, 10);
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.retry, RetryConfig::default());
    }
}
