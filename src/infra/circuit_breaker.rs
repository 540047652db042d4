//! Circuit breaker for the status publisher
//!
//! Keeps a dead broker from stalling every scan for the full publish
//! timeout.
//!
//! # States
//!
//! - **Closed**: Normal operation, publishes pass through
//! - **Open**: Broker considered down, publishes fail fast
//! - **HalfOpen**: Probing whether the broker recovered

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state needed to close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_timeout: Duration,
    /// Maximum probes allowed in half-open state
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            open_timeout: Duration::from_secs(10),
            half_open_max_requests: 1,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Default)]
pub struct CircuitBreakerStats {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    /// Calls rejected while open
    pub rejected: AtomicU64,
    pub times_opened: AtomicU64,
}

impl CircuitBreakerStats {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "successes": self.successes.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
            "times_opened": self.times_opened.load(Ordering::Relaxed),
        })
    }
}

struct InternalState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker protecting an external call
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    /// Probes currently running in half-open state
    half_open_in_flight: AtomicU32,
    stats: CircuitBreakerStats,
}

/// A half-open probe slot. Released on drop unless the call's outcome was
/// recorded, so a cancelled probe cannot wedge the breaker in half-open.
struct ProbeSlot<'a> {
    in_flight: Option<&'a AtomicU32>,
}

impl ProbeSlot<'_> {
    fn disarm(mut self) {
        self.in_flight = None;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight {
            let _ = in_flight.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(InternalState::default()),
            half_open_in_flight: AtomicU32::new(0),
            stats: CircuitBreakerStats::default(),
        }
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        let mut state = self.state.write().await;
        self.maybe_transition(&mut state);
        state.state
    }

    /// Admit a call, or `None` if the circuit rejects it
    async fn try_acquire(&self) -> Option<ProbeSlot<'_>> {
        let mut state = self.state.write().await;
        self.maybe_transition(&mut state);

        match state.state {
            CircuitState::Closed => Some(ProbeSlot { in_flight: None }),
            CircuitState::Open => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
            CircuitState::HalfOpen => {
                let max = self.config.half_open_max_requests;
                let admitted = self
                    .half_open_in_flight
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .is_ok();
                if admitted {
                    Some(ProbeSlot {
                        in_flight: Some(&self.half_open_in_flight),
                    })
                } else {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        }
    }

    async fn record_success(&self) {
        self.stats.successes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.transition_to_closed(&mut state);
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(&mut state),
            CircuitState::Open => {}
        }
    }

    /// Run `f` under the breaker with a timeout. A timeout counts as a failure.
    pub async fn call_with_timeout<F, T, E>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let Some(slot) = self.try_acquire().await else {
            return Err(CircuitBreakerError::CircuitOpen);
        };

        let result = match tokio::time::timeout(timeout, f).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure().await;
                Err(CircuitBreakerError::ServiceError(e))
            }
            Err(_) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Timeout)
            }
        };
        slot.disarm();
        result
    }

    pub fn stats(&self) -> &CircuitBreakerStats {
        &self.stats
    }

    fn maybe_transition(&self, state: &mut InternalState) {
        if state.state == CircuitState::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.open_timeout {
                    tracing::info!(circuit = %self.name, "Circuit breaker transitioning to half-open");
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    self.half_open_in_flight.store(0, Ordering::Release);
                }
            }
        }
    }

    fn transition_to_open(&self, state: &mut InternalState) {
        tracing::warn!(
            circuit = %self.name,
            failures = state.failure_count,
            open_for = ?self.config.open_timeout,
            "Circuit breaker opened"
        );

        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.success_count = 0;
        self.half_open_in_flight.store(0, Ordering::Release);
        self.stats.times_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn transition_to_closed(&self, state: &mut InternalState) {
        tracing::info!(circuit = %self.name, "Circuit breaker closed");

        *state = InternalState::default();
        self.half_open_in_flight.store(0, Ordering::Release);
    }
}

/// Error type for circuit breaker protected calls
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call rejected
    CircuitOpen,
    /// Underlying service error
    ServiceError(E),
    /// Operation timed out
    Timeout,
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit breaker is open"),
            CircuitBreakerError::ServiceError(e) => write!(f, "service error: {}", e),
            CircuitBreakerError::Timeout => write!(f, "operation timed out"),
        }
    }
}
