//! Resilient execution of data-store calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::retry_policy::RetryPolicy;
use super::timeout_profile::TimeoutProfiles;
use super::{ExecutionError, StoreError};
use crate::metrics;

/// Runs store calls under a named timeout profile, behind the circuit breaker,
/// retrying transient failures when the profile allows it.
pub struct QueryExecutor {
    profiles: TimeoutProfiles,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl QueryExecutor {
    pub fn new(
        profiles: TimeoutProfiles,
        retry_policy: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            profiles,
            retry_policy,
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Executes `query` under the profile named `profile_name`.
    ///
    /// `query` is invoked once per attempt; every attempt gets its own timeout
    /// window and reports its outcome to the circuit breaker. An attempt that
    /// times out is dropped, so its late result is never observed.
    pub async fn execute<T, F, Fut>(
        &self,
        profile_name: &str,
        mut query: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let profile = self
            .profiles
            .get(profile_name)
            .ok_or_else(|| ExecutionError::UnknownProfile(profile_name.to_string()))?;

        let max_attempts = if profile.retry_enabled {
            self.retry_policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempts_made = 0;
        loop {
            if let Err(remaining) = self.breaker.try_acquire() {
                debug!(
                    "Rejecting '{}' query, circuit breaker open for {:?}",
                    profile.name, remaining
                );
                return Err(ExecutionError::CircuitOpen { remaining });
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(profile.timeout, query()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(ExecutionError::Store(err)),
                Err(_) => Err(ExecutionError::Timeout {
                    profile: profile.name.clone(),
                    timeout: profile.timeout,
                }),
            };
            attempts_made += 1;

            let error = match result {
                Ok(value) => {
                    metrics::record_db_query(&profile.name, "ok", started.elapsed());
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) => error,
            };
            metrics::record_db_query(&profile.name, error.kind(), started.elapsed());

            // Rejected input never reached the store and says nothing about its health.
            if !matches!(error, ExecutionError::Store(StoreError::Invalid(_))) {
                self.breaker.record_failure();
            }

            if attempts_made >= max_attempts || !self.retry_policy.should_retry(&error, attempts_made)
            {
                return Err(error);
            }

            let delay = self.retry_policy.delay_for_attempt(attempts_made - 1);
            warn!(
                "'{}' query attempt {}/{} failed: {}. Retrying in {:?}",
                profile.name, attempts_made, max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Executes a synchronous store operation on the blocking thread pool.
    ///
    /// A timed-out attempt keeps running on its worker thread and whatever it
    /// returns is discarded. Use [`run_blocking_interruptible`](Self::run_blocking_interruptible)
    /// for operations that must not outlive their attempt.
    pub async fn run_blocking<T, F>(&self, profile_name: &str, op: F) -> Result<T, ExecutionError>
    where
        F: Fn() -> Result<T, StoreError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.run_blocking_interruptible(profile_name, move |_| op(), || {})
            .await
    }

    /// Executes a synchronous store operation that can be abandoned.
    ///
    /// Each attempt gets its own token. When the attempt times out, or its
    /// caller goes away, the token is cancelled and `interrupt` is called to
    /// abort the statement in progress. An attempt whose token is already
    /// cancelled when a worker picks it up never runs `op`; `op` should check
    /// the token again right before it applies a write.
    pub async fn run_blocking_interruptible<T, F, I>(
        &self,
        profile_name: &str,
        op: F,
        interrupt: I,
    ) -> Result<T, ExecutionError>
    where
        F: Fn(&CancellationToken) -> Result<T, StoreError> + Send + Sync + 'static,
        I: Fn() + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let interrupt: Arc<dyn Fn() + Send + Sync> = Arc::new(interrupt);
        self.execute(profile_name, || {
            let op = Arc::clone(&op);
            let attempt = CancellationToken::new();
            let guard = AbandonOnDrop {
                attempt: attempt.clone(),
                interrupt: Arc::clone(&interrupt),
                armed: true,
            };
            async move {
                let result = tokio::task::spawn_blocking(move || {
                    if attempt.is_cancelled() {
                        return Err(StoreError::Unavailable(
                            "attempt abandoned before it started".to_string(),
                        ));
                    }
                    op(&attempt)
                })
                .await;
                guard.disarm();
                result.map_err(|e| StoreError::Query(format!("store task failed: {}", e)))?
            }
        })
        .await
    }
}

/// Cancels a blocking attempt whose future is dropped before it completes.
struct AbandonOnDrop {
    attempt: CancellationToken,
    interrupt: Arc<dyn Fn() + Send + Sync>,
    armed: bool,
}

impl AbandonOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.attempt.cancel();
            (self.interrupt)();
        }
    }
}
