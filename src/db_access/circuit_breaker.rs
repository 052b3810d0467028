//! Circuit breaker guarding the subscription store.
//!
//! Counts consecutive failures of store calls and, once a threshold is hit,
//! rejects calls for a cooldown period so an already struggling store is not
//! piled on. After the cooldown, calls are let through in a probing state until
//! enough of them succeed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Normal operation, all calls pass through.
    Closed,
    /// Failing fast, calls are rejected until the open timeout elapses.
    Open,
    /// Probing recovery, calls pass through and their outcomes decide the next state.
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }

    fn as_gauge(&self) -> f64 {
        match self {
            CircuitStatus::Closed => 0.0,
            CircuitStatus::HalfOpen => 1.0,
            CircuitStatus::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open state that close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub open_timeout: Duration,
    /// Interval of the observability monitor.
    pub monitor_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of the breaker, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Time left before an open circuit starts probing.
    pub open_remaining: Option<Duration>,
}

struct BreakerState {
    status: CircuitStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn transition(&mut self, status: CircuitStatus, now: Instant) {
        self.status = status;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = match status {
            CircuitStatus::Open => Some(now),
            CircuitStatus::Closed | CircuitStatus::HalfOpen => None,
        };
        metrics::set_circuit_breaker_status(status.as_gauge());
    }
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves an open circuit to half-open once its timeout has elapsed.
    fn refresh(&self, state: &mut BreakerState, now: Instant) {
        if state.status != CircuitStatus::Open {
            return;
        }
        let elapsed = state
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at))
            .unwrap_or(self.config.open_timeout);
        if elapsed >= self.config.open_timeout {
            state.transition(CircuitStatus::HalfOpen, now);
            info!("Circuit breaker half-open, probing store recovery");
        }
    }

    /// Asks permission to run a call.
    ///
    /// Returns the remaining open time when the call must be rejected.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        self.refresh(&mut state, now);

        match state.status {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => Ok(()),
            CircuitStatus::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened_at| now.saturating_duration_since(opened_at))
                    .unwrap_or_default();
                metrics::record_circuit_rejection();
                Err(self.config.open_timeout.saturating_sub(elapsed))
            }
        }
    }

    pub fn record_success(&self) {
        let now = Instant::now();
        let mut state = self.lock();

        match state.status {
            // Successes only matter while probing.
            CircuitStatus::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitStatus::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.transition(CircuitStatus::Closed, now);
                    info!("Circuit breaker closed, store recovered");
                }
            }
            // A call admitted before the circuit opened finished late; it says
            // nothing about the store's health now.
            CircuitStatus::Open => {
                debug!("Ignoring late success while circuit breaker is open");
            }
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.lock();

        match state.status {
            CircuitStatus::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.transition(CircuitStatus::Open, now);
                    warn!(
                        "Circuit breaker opened after {} consecutive failures, rejecting store calls for {:?}",
                        self.config.failure_threshold, self.config.open_timeout
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                state.transition(CircuitStatus::Open, now);
                warn!(
                    "Circuit breaker probe failed, reopening for {:?}",
                    self.config.open_timeout
                );
            }
            CircuitStatus::Open => {}
        }
    }

    /// Re-evaluates time-based transitions and returns the current state.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let mut state = self.lock();
        self.refresh(&mut state, now);

        let open_remaining = match (state.status, state.opened_at) {
            (CircuitStatus::Open, Some(opened_at)) => Some(
                self.config
                    .open_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        };

        CircuitBreakerSnapshot {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            open_remaining,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.snapshot().status
    }

    /// Forces the circuit closed (manual recovery).
    pub fn reset(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        if state.status != CircuitStatus::Closed {
            info!("Circuit breaker manually reset from {}", state.status);
        }
        state.transition(CircuitStatus::Closed, now);
    }

    /// Spawns the periodic monitor that publishes the breaker status.
    ///
    /// The monitor only observes; transitions stay driven by call outcomes,
    /// except for the open-to-half-open timeout which it may surface earlier.
    pub fn spawn_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let breaker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(breaker.config.monitor_interval);
            let mut last_status = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = breaker.snapshot();
                metrics::set_circuit_breaker_status(snapshot.status.as_gauge());
                if last_status != Some(snapshot.status) {
                    info!(
                        "Circuit breaker status: {} (failures: {}, successes: {})",
                        snapshot.status,
                        snapshot.consecutive_failures,
                        snapshot.consecutive_successes
                    );
                    last_status = Some(snapshot.status);
                }
            }
            debug!("Circuit breaker monitor stopped");
        })
    }
}
