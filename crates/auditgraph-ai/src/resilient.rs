use anyhow::anyhow;
use auditgraph_core::{CallError, RetryPolicy};
use metrics::counter;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff around one external operation.
///
/// Every attempt and every backoff sleep is raced against the cancellation
/// token, so a cancelled run never waits out a slow collaborator. Errors that
/// are not retryable (cancellation, an inner exhaustion) end the loop at once.
#[derive(Debug, Clone)]
pub struct ResilientCaller {
    operation: String,
    policy: RetryPolicy,
}

impl ResilientCaller {
    pub fn new(operation: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            operation: operation.into(),
            policy,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, the attempt budget is spent, or `cancel` fires.
    /// The closure receives the 1-based attempt number.
    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for n in 1..=max_attempts {
            let delay = self.policy.backoff(n);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }

            counter!("auditgraph_call_attempts", "operation" => self.operation.clone())
                .increment(1);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                result = attempt(n) => result,
            };

            match result {
                Ok(value) => {
                    if n > 1 {
                        debug!(operation = %self.operation, attempt = n, "call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => {
                    if n < max_attempts {
                        warn!(
                            operation = %self.operation,
                            attempt = n,
                            max_attempts,
                            %error,
                            "call failed, retrying"
                        );
                        counter!("auditgraph_call_retries", "operation" => self.operation.clone())
                            .increment(1);
                    }
                    last_error = Some(error);
                }
            }
        }

        counter!("auditgraph_calls_exhausted", "operation" => self.operation.clone())
            .increment(1);
        let source = match last_error {
            Some(CallError::Failed(error)) => error,
            Some(other) => anyhow::Error::new(other),
            None => anyhow!("no attempt was made"),
        };
        warn!(operation = %self.operation, attempts = max_attempts, error = %source, "call exhausted its retries");
        Err(CallError::Exhausted {
            operation: self.operation.clone(),
            attempts: max_attempts,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditgraph_core::ValidationError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let caller = ResilientCaller::new("extract", RetryPolicy::no_delay(3));
        let calls = AtomicU32::new(0);

        let value = caller
            .call(&CancellationToken::new(), |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(CallError::Failed(anyhow!("rate limited")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let caller = ResilientCaller::new("evaluate", RetryPolicy::no_delay(2));

        let err = caller
            .call(&CancellationToken::new(), |_| async {
                Err::<(), _>(CallError::Invalid(ValidationError::ScoreOutOfRange(9)))
            })
            .await
            .unwrap_err();

        match err {
            CallError::Exhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "evaluate");
                assert_eq!(attempts, 2);
                assert!(source.to_string().contains("score 9"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let caller = ResilientCaller::new("fetch", RetryPolicy::no_delay(5));
        let calls = AtomicU32::new(0);

        let err = caller
            .call(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CallError::Cancelled) }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 10_000,
            max_backoff_ms: 10_000,
            multiplier: 1.0,
        };
        let caller = ResilientCaller::new("extract", policy);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = caller
            .call(&cancel, |_| async {
                Err::<(), _>(CallError::Failed(anyhow!("unavailable")))
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_hung_attempt() {
        let caller = ResilientCaller::new("evaluate", RetryPolicy::no_delay(1));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = caller
            .call(&cancel, |_| std::future::pending::<Result<(), CallError>>())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
