//! Retry of failed batch flushes.

use std::time::Duration;

use citydb_core::RetryConfig;

use crate::error::OperationError;

/// Whether a storage error is likely to succeed when retried.
///
/// Busy or locked databases, pool timeouts and I/O failures are transient;
/// constraint violations and malformed statements are not.
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            message.contains("database is locked") || message.contains("database is busy")
        }
        _ => false,
    }
}

/// Attempt counter for one batch.
#[derive(Debug)]
pub(crate) struct Retry<'a> {
    config: &'a RetryConfig,
    attempt: u32,
}

impl<'a> Retry<'a> {
    pub(crate) fn new(config: &'a RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` when `err` must propagate.
    pub(crate) fn next_delay(&mut self, err: &OperationError) -> Option<Duration> {
        let OperationError::Storage { source, .. } = err else {
            return None;
        };
        if self.attempt + 1 >= self.config.max_attempts || !is_transient(source) {
            return None;
        }
        let delay = self.config.backoff_for_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(source: sqlx::Error) -> OperationError {
        OperationError::Storage {
            batch: 0,
            object_id: "b-1".into(),
            source,
        }
    }

    #[test]
    fn default_config_never_retries() {
        let config = RetryConfig::default();
        let mut retry = Retry::new(&config);
        assert_eq!(retry.next_delay(&storage(sqlx::Error::PoolTimedOut)), None);
    }

    #[test]
    fn transient_errors_back_off_until_attempts_are_used() {
        let config = RetryConfig::attempts(3);
        let mut retry = Retry::new(&config);
        assert_eq!(
            retry.next_delay(&storage(sqlx::Error::PoolTimedOut)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            retry.next_delay(&storage(sqlx::Error::PoolTimedOut)),
            Some(Duration::from_millis(200))
        );
        assert_eq!(retry.next_delay(&storage(sqlx::Error::PoolTimedOut)), None);
    }

    #[test]
    fn permanent_errors_propagate() {
        let config = RetryConfig::attempts(3);
        let mut retry = Retry::new(&config);
        assert_eq!(retry.next_delay(&storage(sqlx::Error::RowNotFound)), None);
        assert_eq!(retry.next_delay(&OperationError::Cancelled), None);
    }
}
