//! Per-dependency circuit breaker.
//!
//! Each named dependency (`workflows`, `reviews`, `review_detail`, ...) has its
//! own state machine:
//!
//! ```text
//!  CLOSED --(threshold consecutive failures)--> OPEN
//!  OPEN   --(timeout elapsed, next caller)----> HALF_OPEN (one trial call)
//!  HALF_OPEN --trial ok--> CLOSED     HALF_OPEN --trial failed--> OPEN
//! ```
//!
//! While a trial is in flight every other caller is short-circuited. A trial
//! future dropped before completion frees the slot for the next caller.
//!
//! Every state change starts a new generation. A call only reports back into
//! the generation that admitted it, so a slow call admitted while closed
//! cannot close a circuit that has since opened.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Returned instead of calling the dependency while its circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for dependency '{dependency}'")]
pub struct CircuitOpenError {
    pub dependency: String,
}

impl CircuitOpenError {
    #[inline]
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }

    fn open(&mut self, now: Instant) {
        self.transition(CircuitState::Open);
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.transition(CircuitState::Closed);
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    fn admitted(&self, ticket: Ticket) -> bool {
        self.generation == ticket.generation
    }
}

/// One row of [`CircuitBreaker::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// What `admit` handed out: the admission kind and its generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    admission: Admission,
    generation: u64,
}

/// Circuit breakers keyed by dependency name.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    breakers: DashMap<String, BreakerState>,
}

/// Frees the half-open trial slot if the trial future is dropped early.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    dependency: &'a str,
    ticket: Ticket,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Some(mut state) = self.breaker.breakers.get_mut(self.dependency)
            && state.admitted(self.ticket)
        {
            tracing::debug!(dependency = self.dependency, "Half-open trial abandoned");
            state.trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Run `op` through the breaker for `dependency`. Every error counts as a
    /// failure.
    pub async fn execute<T, E, F, Fut>(&self, dependency: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.execute_classified(dependency, op, |_| true).await
    }

    /// Like [`execute`](Self::execute), but only errors for which
    /// `is_failure` returns true count against the dependency. Other errors
    /// are recorded as successes (the dependency answered).
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        dependency: &str,
        op: F,
        is_failure: C,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        C: FnOnce(&E) -> bool,
    {
        let ticket = self.admit(dependency)?;
        let mut guard = TrialGuard {
            breaker: self,
            dependency,
            ticket,
            armed: ticket.admission == Admission::Trial,
        };

        let result = op().await;
        guard.armed = false;

        match &result {
            Err(e) if is_failure(e) => self.record_failure(dependency, ticket),
            _ => self.record_success(dependency, ticket),
        }
        result
    }

    fn admit(&self, dependency: &str) -> Result<Ticket, CircuitOpenError> {
        let mut entry = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(BreakerState::new);

        let state = entry.state;
        let admission = match state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if !elapsed {
                    return Err(CircuitOpenError::new(dependency));
                }
                tracing::info!(dependency, "Circuit half-open, admitting trial call");
                entry.transition(CircuitState::HalfOpen);
                entry.trial_in_flight = true;
                Admission::Trial
            }
            CircuitState::HalfOpen if entry.trial_in_flight => {
                return Err(CircuitOpenError::new(dependency));
            }
            CircuitState::HalfOpen => {
                entry.trial_in_flight = true;
                Admission::Trial
            }
        };

        Ok(Ticket {
            admission,
            generation: entry.generation,
        })
    }

    fn record_success(&self, dependency: &str, ticket: Ticket) {
        let Some(mut entry) = self.breakers.get_mut(dependency) else {
            return;
        };
        if !entry.admitted(ticket) {
            tracing::debug!(dependency, "Ignoring result from an earlier circuit state");
            return;
        }

        match (entry.state, ticket.admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                tracing::info!(dependency, "Circuit closed");
                entry.close();
            }
            (CircuitState::Closed, _) => entry.consecutive_failures = 0,
            _ => {}
        }
    }

    fn record_failure(&self, dependency: &str, ticket: Ticket) {
        let Some(mut entry) = self.breakers.get_mut(dependency) else {
            return;
        };
        if !entry.admitted(ticket) {
            tracing::debug!(dependency, "Ignoring result from an earlier circuit state");
            return;
        }
        let now = Instant::now();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

        match (entry.state, ticket.admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                tracing::warn!(dependency, "Trial call failed, circuit re-opened");
                entry.open(now);
            }
            (CircuitState::Closed, _) if entry.consecutive_failures >= self.config.threshold => {
                tracing::warn!(
                    dependency,
                    failures = entry.consecutive_failures,
                    "Circuit opened"
                );
                entry.open(now);
            }
            _ => {}
        }
    }

    /// Current state of `dependency` (closed if never used).
    pub fn state(&self, dependency: &str) -> CircuitState {
        self.breakers
            .get(dependency)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// All known dependencies, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut rows: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|e| BreakerSnapshot {
                dependency: e.key().clone(),
                state: e.state,
                consecutive_failures: e.consecutive_failures,
            })
            .collect();
        rows.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        rows
    }
}
