use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use stats_api::{ErrorKind, StatsError};

use crate::clickhouse::{ClickHouseConfig, ClickHouseEventStore};
use crate::error::ConnectError;

/// Bounded retry with linear backoff: the wait after attempt `n` is
/// `base_delay * n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Подключение с ограниченным числом попыток.
///
/// Каждая попытка — `attempt()` (открыть соединение + health check).
/// Ошибка вида `Config` не ретраится. Отмена `token` во время попытки или
/// ожидания сразу возвращает `ConnectError::Aborted`, не дожидаясь
/// исчерпания попыток. После последней неудачной попытки не ждём.
pub async fn connect_with_retry<T, F, Fut>(
    target: &str,
    policy: RetryPolicy,
    token: &CancellationToken,
    mut attempt: F,
) -> Result<T, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StatsError>>,
{
    let aborted = || ConnectError::Aborted { target: target.to_string() };
    let mut last = StatsError::io("no connection attempts made");

    for n in 1..=policy.max_attempts {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(aborted()),
            r = attempt() => r,
        };

        match result {
            Ok(conn) => {
                tracing::info!(store = %target, attempt = n, "connected");
                return Ok(conn);
            }
            Err(e) if e.kind() == ErrorKind::Config => {
                return Err(ConnectError::Config { target: target.to_string(), source: e });
            }
            Err(e) => {
                tracing::warn!(
                    store = %target,
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "connect attempt failed"
                );
                last = e;
            }
        }

        if n == policy.max_attempts {
            break;
        }

        let wait = policy.delay_for(n);
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(aborted()),
            _ = tokio::time::sleep(wait) => {}
        }
    }

    Err(ConnectError::Exhausted {
        target: target.to_string(),
        attempts: policy.max_attempts,
        last,
    })
}

/// Build a ClickHouse store and ping it, retrying per `policy`.
pub async fn connect_clickhouse(
    cfg: &ClickHouseConfig,
    policy: RetryPolicy,
    token: &CancellationToken,
) -> Result<ClickHouseEventStore, ConnectError> {
    connect_with_retry("clickhouse", policy, token, || async {
        let store = ClickHouseEventStore::new(cfg)?;
        store.ping().await?;
        Ok::<_, StatsError>(store)
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result = connect_with_retry("test", RetryPolicy::default(), &token, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(StatsError::io("down")) } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        // 1s after the first failure, 2s after the second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<(), _> = connect_with_retry("test", RetryPolicy::default(), &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StatsError::io("connection refused"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(ConnectError::Exhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last.message(), "connection refused");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_aborts() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<(), _> = connect_with_retry("test", RetryPolicy::default(), &token, || {
            let calls = calls.clone();
            let token = token.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    token.cancel();
                }
                Err(StatsError::io("down"))
            }
        })
        .await;

        assert!(matches!(result, Err(ConnectError::Aborted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<(), _> = connect_with_retry("test", RetryPolicy::default(), &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StatsError::config("bad database name"))
            }
        })
        .await;

        assert!(matches!(result, Err(ConnectError::Config { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
    }
}
