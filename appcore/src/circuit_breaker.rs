//! Named circuit breakers for guarding downstream calls.
//!
//! A breaker starts Closed and counts call outcomes over a fixed sampling
//! window. Once a window holds at least `min_requests` outcomes and the failure
//! ratio reaches `failure_ratio`, the breaker opens and rejects every call for
//! `open_timeout`. After that it lets exactly one trial call through: success
//! closes it again, failure re-opens it with a fresh timeout.
//!
//! Every window or state change bumps the breaker's generation. Outcomes are
//! recorded against the generation their call started in and are discarded
//! when it no longer matches, so a slow call from a previous window cannot
//! skew the current counts.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::BreakerError;
use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    /// Outcomes needed in the current window before the breaker may trip.
    pub min_requests: u32,
    pub failure_ratio: f64,
    /// Length of the Closed-state counting window.
    pub interval: Duration,
    /// How long an Open breaker rejects calls before allowing a trial.
    pub open_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            interval: Duration::from_secs(5),
            open_timeout: Duration::from_secs(15),
        }
    }
}

/// Point-in-time copy of a breaker's state and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub requests: u32,
    pub failures: u32,
    pub window_start: Instant,
    pub opened_at: Option<Instant>,
}

struct Inner {
    state: BreakerState,
    generation: u64,
    window_start: Instant,
    requests: u32,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            settings,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                window_start: now,
                requests: 0,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, with time-based transitions applied.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner, self.clock.now());
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.refresh(&mut inner, self.clock.now());
        BreakerSnapshot {
            state: inner.state,
            requests: inner.requests,
            failures: inner.failures,
            window_start: inner.window_start,
            opened_at: inner.opened_at,
        }
    }

    /// Runs `call` unless the breaker rejects it. A panic inside `call`
    /// is recorded as a failure before it unwinds further.
    pub fn execute<T, E, F>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let outcome = Outcome::new(self, self.before::<E>()?);
        let result = call();
        outcome.record(result.is_ok());
        result.map_err(BreakerError::Call)
    }

    /// Async counterpart of [`CircuitBreaker::execute`]. The future is only
    /// created once the breaker admits the call. Dropping the returned future
    /// before it resolves records a failure.
    pub async fn call<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = Outcome::new(self, self.before::<E>()?);
        let result = call().await;
        outcome.record(result.is_ok());
        result.map_err(BreakerError::Call)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits or rejects a call, returning the generation it runs in.
    fn before<E>(&self) -> Result<u64, BreakerError<E>> {
        let mut inner = self.lock();
        self.refresh(&mut inner, self.clock.now());

        match inner.state {
            BreakerState::Closed => Ok(inner.generation),
            BreakerState::Open => {
                debug!(breaker = %self.name, "call rejected, breaker is open");
                Err(BreakerError::Open {
                    name: self.name.clone(),
                })
            }
            BreakerState::HalfOpen if inner.trial_in_flight => {
                debug!(breaker = %self.name, "call rejected, trial already in flight");
                Err(BreakerError::TooManyRequests {
                    name: self.name.clone(),
                })
            }
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(inner.generation)
            }
        }
    }

    fn after(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);

        if inner.generation != generation {
            return;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.requests += 1;
                if !success {
                    inner.failures += 1;
                }
                if self.should_trip(&inner) {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => {
                inner.trial_in_flight = false;
                let to = match success {
                    true => BreakerState::Closed,
                    false => BreakerState::Open,
                };
                self.transition(&mut inner, to, now);
            }
            // An Open breaker admits nothing, so no outcome can carry its generation.
            BreakerState::Open => {}
        }
    }

    fn should_trip(&self, inner: &Inner) -> bool {
        inner.requests >= self.settings.min_requests
            && f64::from(inner.failures) / f64::from(inner.requests) >= self.settings.failure_ratio
    }

    /// Applies the transitions that only depend on elapsed time.
    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if now.saturating_duration_since(inner.window_start) >= self.settings.interval {
                    inner.generation += 1;
                    inner.window_start = now;
                    inner.requests = 0;
                    inner.failures = 0;
                }
            }
            BreakerState::Open => {
                let expired = inner.opened_at.map_or(true, |opened_at| {
                    now.saturating_duration_since(opened_at) >= self.settings.open_timeout
                });
                if expired {
                    self.transition(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.requests = 0;
        inner.failures = 0;
        inner.trial_in_flight = false;

        match to {
            BreakerState::Open => {
                inner.opened_at = Some(now);
                warn!(breaker = %self.name, %from, %to, "circuit breaker opened");
            }
            BreakerState::Closed => {
                inner.opened_at = None;
                inner.window_start = now;
                info!(breaker = %self.name, %from, %to, "circuit breaker closed");
            }
            BreakerState::HalfOpen => {
                info!(breaker = %self.name, %from, %to, "circuit breaker half-open, allowing a trial call");
            }
        }

        metrics::counter!(
            "circuit_breaker_transitions_total",
            "name" => self.name.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Records the outcome of an admitted call exactly once. If it is dropped
/// without being recorded (panic, cancelled future) the call counts as failed.
struct Outcome<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl<'a> Outcome<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64) -> Self {
        Self {
            breaker,
            generation,
            recorded: false,
        }
    }

    fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.after(self.generation, success);
    }
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.after(self.generation, false);
        }
    }
}

/// Lazily creates one breaker per call-site name and hands out the same
/// instance for that name for the registry's lifetime.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            settings: BreakerSettings::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_settings(mut self, settings: BreakerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Returns the breaker registered under `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(name.to_owned()).or_insert_with(|| {
            debug!(breaker = %name, "creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, self.settings, self.clock.clone()))
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
