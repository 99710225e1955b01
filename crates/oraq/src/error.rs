//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by the queue.
///
/// The user job's outcome is never wrapped here: `submit` returns whatever
/// the job future produced, untouched. Keep-alive refreshes and stuck-job
/// sweeps swallow store errors (the next tick retries; a persistently failing
/// keep-alive simply lets the processing lease expire so peers reap the job).
#[derive(Debug, Error)]
pub enum QueueError {
    /// Invalid configuration or submit preconditions.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Redis error during a critical operation.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Keyspace-notification subscription could not be established.
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// The queue has been shut down.
    #[error("Queue is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = QueueError::Configuration("ping must be positive".into());
        assert!(err.to_string().contains("ping must be positive"));
    }

    #[test]
    fn test_shutting_down_display() {
        let err = QueueError::ShuttingDown;
        assert!(err.to_string().contains("shutting down"));
    }

    #[test]
    fn test_from_redis_error() {
        let redis_err =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let err = QueueError::from(redis_err);
        assert!(matches!(err, QueueError::Redis(_)));
    }
}
