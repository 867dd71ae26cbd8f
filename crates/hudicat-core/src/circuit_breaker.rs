//! Circuit breaker guarding Metastore calls.
//!
//! After repeated transport failures the breaker opens and calls fail fast
//! with `TransientUnavailable` instead of piling up on a dead Metastore.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Calls proceed normally
    Closed,
    /// Calls are rejected
    Open,
    /// Probing calls are let through
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,

    /// Duration to wait before attempting to close (half-open)
    pub reset_timeout: Duration,

    /// Number of successes required to close from half-open
    pub success_threshold: u32,

    /// Name for logging
    pub name: String,
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            name: name.into(),
        }
    }

    /// Set failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set success threshold.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker for the Metastore connection.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        debug!(name = %config.name, "Circuit breaker created");
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Check if the circuit allows a call, moving Open to HalfOpen once the
    /// reset timeout has elapsed.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(name = %self.config.name, "Circuit breaker half-open, probing");
                }
                elapsed
            }
        }
    }

    /// Time left until an open circuit starts probing again.
    pub fn retry_after(&self) -> Duration {
        let state = self.state.lock();
        match (state.state, state.last_failure_time) {
            (CircuitState::Open, Some(t)) => self.config.reset_timeout.saturating_sub(t.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Record a call that reached the Metastore and got an answer.
    pub fn record_success(&self) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed | CircuitState::Open => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    info!(name = %self.config.name, "Circuit breaker closed (recovered)");
                }
            }
        }
    }

    /// Record a transport failure.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.state = CircuitState::Open;
                warn!(
                    name = %self.config.name,
                    failures = state.failure_count,
                    "Circuit breaker opened due to failures"
                );
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                warn!(name = %self.config.name, "Circuit breaker reopened from half-open state");
            }
            _ => {
                debug!(
                    name = %self.config.name,
                    failures = state.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
            }
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Get the failure count.
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
        info!(name = %self.config.name, "Circuit breaker reset");
    }
}
