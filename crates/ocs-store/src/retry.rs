//! Exponential backoff for failed connects, loads and submissions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff parameters. The n-th retry (counting from zero) waits
/// `min(2^n * base_delay_ms, max_delay_ms)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempts`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
        let ms = factor
            .saturating_mul(self.base_delay_ms)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        };
        assert_eq!(config.delay(0), Duration::from_millis(100));
        assert_eq!(config.delay(1), Duration::from_millis(200));
        assert_eq!(config.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay(10), Duration::from_millis(60_000));
        assert_eq!(config.delay(200), Duration::from_millis(60_000));
    }
}
