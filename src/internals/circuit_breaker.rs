//! Per-provider circuit breaker
//!
//! Three states, initially `Closed`:
//! - Closed -> Open after `failure_threshold` consecutive failures, or once
//!   `minimum_requests` have been seen and the failure rate reaches
//!   `failure_rate_threshold`
//! - Open -> HalfOpen on the first `allow_request` at or after `timeout` has
//!   elapsed since the last failure; the request is let through as a probe
//! - HalfOpen -> Closed after `success_threshold` consecutive successes
//! - HalfOpen -> Open on any failure
//!
//! Consecutive counters reset on every transition. Request/failure totals
//! used for the rate check reset only on transition to Closed.

use crate::error::CircuitOpenError;
use crate::logging::{log_debug, log_warn};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time the circuit stays open before admitting a probe
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Failure rate (0, 1] that opens the circuit once `minimum_requests` is reached
    pub failure_rate_threshold: f64,
    /// Requests required before the failure rate is evaluated
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            failure_rate_threshold: 0.5,
            minimum_requests: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Replace zero values with defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.failure_threshold == 0 {
            self.failure_threshold = defaults.failure_threshold;
        }
        if self.success_threshold == 0 {
            self.success_threshold = defaults.success_threshold;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.failure_rate_threshold <= 0.0 {
            self.failure_rate_threshold = defaults.failure_rate_threshold;
        }
        if self.minimum_requests == 0 {
            self.minimum_requests = defaults.minimum_requests;
        }
        self
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, rejecting requests
    Open,
    /// Admitting probes to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Point-in-time snapshot of a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// `total_failures / total_requests`, zero before any request
    pub failure_rate: f64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_requests: u64,
    total_failures: u64,
    // Monotonic clock drives the timeout; wall clock is for reporting.
    last_failure_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_requests: 0,
            total_failures: 0,
            last_failure_at: None,
            last_failure: None,
            last_state_change: Utc::now(),
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }

    fn remaining_open(&self, timeout: Duration) -> Duration {
        match self.last_failure_at {
            Some(at) => timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Health tracker for a single provider, shared across concurrent requests
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker for provider `name`
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: config.normalized(),
            inner: RwLock::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a request may be attempted now
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and admits
    /// the request as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.remaining_open(self.config.timeout).is_zero() {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.total_requests += 1;
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;

        if inner.state == CircuitState::HalfOpen
            && inner.consecutive_successes >= self.config.success_threshold
        {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        inner.total_requests += 1;
        inner.total_failures += 1;
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                let consecutive_tripped =
                    inner.consecutive_failures >= self.config.failure_threshold;
                let rate_tripped = inner.total_requests >= u64::from(self.config.minimum_requests)
                    && inner.failure_rate() >= self.config.failure_rate_threshold;
                if consecutive_tripped || rate_tripped {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Current state. Does not evaluate the open timeout.
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Force the circuit closed and zero every counter
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let previous = inner.state;
        *inner = Inner::new();
        log_debug!(
            provider = %self.name,
            from = %previous,
            "Circuit breaker reset"
        );
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            failure_rate: inner.failure_rate(),
            last_failure: inner.last_failure,
            last_state_change: inner.last_state_change,
        }
    }

    /// Remaining wait before an open circuit admits a probe; zero otherwise
    pub fn retry_after(&self) -> Duration {
        let inner = self.inner.read();
        match inner.state {
            CircuitState::Open => inner.remaining_open(self.config.timeout),
            _ => Duration::ZERO,
        }
    }

    /// Rejection error describing the circuit as it is now
    pub fn open_error(&self) -> CircuitOpenError {
        let inner = self.inner.read();
        CircuitOpenError {
            provider: self.name.clone(),
            state: inner.state,
            last_failure: inner.last_failure,
            retry_after: match inner.state {
                CircuitState::Open => inner.remaining_open(self.config.timeout),
                _ => Duration::ZERO,
            },
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_state_change = Utc::now();
        if to == CircuitState::Closed {
            inner.total_requests = 0;
            inner.total_failures = 0;
        }

        if to == CircuitState::Open {
            log_warn!(
                provider = %self.name,
                from = %from,
                circuit_state = %to,
                timeout_seconds = self.config.timeout.as_secs(),
                "Circuit breaker opened"
            );
        } else {
            log_debug!(
                provider = %self.name,
                from = %from,
                circuit_state = %to,
                "Circuit breaker state changed"
            );
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
