//! Circuit breaker guarding the shared key-value store.
//!
//! State machine:
//! - Closed -> Open: `failure_threshold` consecutive failures
//! - Open -> HalfOpen: `cooldown` elapsed since opening
//! - HalfOpen -> Closed: one success (failure count reset)
//! - HalfOpen -> Open: one failure
//!
//! One instance per process, shared by `Arc` with every call site. Separate
//! processes keep separate breakers.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BreakerError<E> {
    Open,
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self::new(
            name,
            config.breaker_failure_threshold(),
            config.breaker_cooldown(),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving Open to HalfOpen if the cooldown has passed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether a call may proceed right now.
    pub fn allow(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            info!(breaker = %self.name, "Circuit breaker closed");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        let state = inner.state;
        match state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                self.open(&mut inner);
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            _ => {}
        }
    }

    /// Back to Closed with a zero failure count.
    pub fn reset(&self) {
        *self.lock() = BreakerState::default();
    }

    /// Run `f` unless the circuit is open.
    ///
    /// When open, `f` is never invoked and `BreakerError::Open` is returned.
    ///
    /// # Errors
    /// Returns `BreakerError::Open` or the error produced by `f`.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(BreakerError::Open);
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        warn!(
            breaker = %self.name,
            failures = inner.failure_count,
            cooldown_secs = self.cooldown.as_secs(),
            "Circuit breaker opened"
        );
    }

    fn maybe_half_open(&self, inner: &mut BreakerState) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.cooldown)
        {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = %self.name, "Circuit breaker half-open");
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
