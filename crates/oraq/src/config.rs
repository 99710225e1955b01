//! Queue configuration.

use crate::error::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Queue`](crate::Queue).
///
/// Every worker process constructed with the same `(prefix, id)` pair joins
/// the same logical queue and shares its concurrency limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Shared queue identity (combined with `prefix`).
    #[serde(default = "default_id")]
    pub id: String,

    /// Key namespace prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Redis URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Command connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Target max concurrent jobs across all workers sharing the namespace.
    ///
    /// `0` is accepted as a degenerate mode in which no slot is ever free and
    /// only the wait timeout admits jobs; useful for exercising starvation
    /// paths.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Keep-alive refresh period and reassessment period, in milliseconds.
    #[serde(default = "default_ping_ms")]
    pub ping_ms: u64,

    /// Soft deadline on the wait phase, in milliseconds. Also derives the
    /// pending-lock TTL.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            prefix: default_prefix(),
            url: default_url(),
            pool_size: default_pool_size(),
            concurrency: default_concurrency(),
            ping_ms: default_ping_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_id() -> String {
    "queue".to_string()
}

fn default_prefix() -> String {
    "oraq".to_string()
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_ping_ms() -> u64 {
    60_000
}

fn default_timeout_ms() -> u64 {
    7_200_000
}

impl QueueConfig {
    /// Validates the configuration, surfacing problems synchronously.
    pub fn validate(&self) -> QueueResult<()> {
        if self.id.is_empty() {
            return Err(QueueError::Configuration("id must not be empty".into()));
        }
        if self.prefix.is_empty() {
            return Err(QueueError::Configuration(
                "prefix must not be empty".into(),
            ));
        }
        // A ':' inside either segment would collide with the key layout and
        // the event-channel parser.
        if self.id.contains(':') || self.prefix.contains(':') {
            return Err(QueueError::Configuration(
                "id and prefix must not contain ':'".into(),
            ));
        }
        if self.ping_ms == 0 {
            return Err(QueueError::Configuration(
                "ping_ms must be positive".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(QueueError::Configuration(
                "timeout_ms must be positive".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(QueueError::Configuration(
                "pool_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Keep-alive / reassessment period as a [`Duration`].
    pub fn ping(&self) -> Duration {
        Duration::from_millis(self.ping_ms)
    }

    /// Wait-phase deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pending-lock TTL in seconds: `ceil(timeout * 1.5 / 1000)`.
    ///
    /// Sized so that once the wait timeout has elapsed, any peer still
    /// "holding" a pending slot is almost certainly dead.
    pub fn pending_lock_ttl_secs(&self) -> u64 {
        (self.timeout_ms * 3).div_ceil(2000)
    }

    /// Processing-lock TTL in seconds on each refresh: `ceil(ping * 2 / 1000)`.
    pub fn processing_lock_ttl_secs(&self) -> u64 {
        (self.ping_ms * 2).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.id, "queue");
        assert_eq!(cfg.prefix, "oraq");
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.ping_ms, 60_000);
        assert_eq!(cfg.timeout_ms, 7_200_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_lock_ttls() {
        let cfg = QueueConfig::default();
        // 7_200_000 ms * 1.5 = 10_800 s; 60_000 ms * 2 = 120 s.
        assert_eq!(cfg.pending_lock_ttl_secs(), 10_800);
        assert_eq!(cfg.processing_lock_ttl_secs(), 120);
    }

    #[test]
    fn test_lock_ttls_round_up() {
        let cfg = QueueConfig {
            timeout_ms: 1001,
            ping_ms: 501,
            ..QueueConfig::default()
        };
        assert_eq!(cfg.pending_lock_ttl_secs(), 2); // ceil(1.5015)
        assert_eq!(cfg.processing_lock_ttl_secs(), 2); // ceil(1.002)
    }

    #[test]
    fn test_zero_concurrency_is_accepted() {
        let cfg = QueueConfig {
            concurrency: 0,
            ..QueueConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_segments() {
        let cfg = QueueConfig {
            id: String::new(),
            ..QueueConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(QueueError::Configuration(_))
        ));

        let cfg = QueueConfig {
            prefix: String::new(),
            ..QueueConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_colon_in_segments() {
        let cfg = QueueConfig {
            id: "a:b".into(),
            ..QueueConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_periods() {
        let cfg = QueueConfig {
            ping_ms: 0,
            ..QueueConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = QueueConfig {
            timeout_ms: 0,
            ..QueueConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let cfg: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.prefix, "oraq");
        assert_eq!(cfg.pool_size, 10);

        let cfg: QueueConfig =
            serde_json::from_str(r#"{"id":"mailer","concurrency":4}"#).unwrap();
        assert_eq!(cfg.id, "mailer");
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.timeout_ms, 7_200_000);
    }
}
