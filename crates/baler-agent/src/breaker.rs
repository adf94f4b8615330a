//! Circuit breaker for the outbound connection.
//!
//! Three states:
//!
//! | From      | Event                          | To        |
//! |-----------|--------------------------------|-----------|
//! | CLOSED    | `failures` consecutive failures | OPEN      |
//! | OPEN      | `open_for` elapsed              | HALF_OPEN |
//! | HALF_OPEN | `successes` probe successes     | CLOSED    |
//! | HALF_OPEN | probe failure                   | OPEN      |
//!
//! While OPEN the shipper performs no I/O at all; HALF_OPEN admits probes
//! one frame at a time. Transitions are returned to the caller so they can
//! be recorded in metrics and asserted in tests.

use std::time::{Duration, Instant};

/// Breaker tuning (see the `breaker_*` configuration keys).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that trip CLOSED -> OPEN.
    pub failures: u32,
    /// How long to stay OPEN before admitting a probe.
    pub open_for: Duration,
    /// Probe successes required to close again.
    pub successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failures: 5,
            open_for: Duration::from_secs(30),
            successes: 2,
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// State transition, reported for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    HalfOpened,
    Closed,
}

/// Three-state failure isolator.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a send may be attempted right now. An expired OPEN window
    /// transitions to HALF_OPEN and admits the probe.
    pub fn allow(&mut self) -> (bool, Option<BreakerTransition>) {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => (true, None),
            BreakerState::Open => {
                let expired = self
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.config.open_for);
                if expired {
                    self.state = BreakerState::HalfOpen;
                    self.probe_successes = 0;
                    (true, Some(BreakerTransition::HalfOpened))
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Time until the OPEN window expires, if currently OPEN.
    pub fn time_until_probe(&self) -> Option<Duration> {
        match self.state {
            BreakerState::Open => {
                let elapsed = self.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
                Some(self.config.open_for.saturating_sub(elapsed))
            }
            _ => None,
        }
    }

    pub fn record_success(&mut self) -> Option<BreakerTransition> {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                self.probe_successes += 1;
                if self.probe_successes >= self.config.successes {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    self.opened_at = None;
                    Some(BreakerTransition::Closed)
                } else {
                    None
                }
            }
            // A success while OPEN cannot happen (no I/O is attempted).
            BreakerState::Open => None,
        }
    }

    pub fn record_failure(&mut self) -> Option<BreakerTransition> {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failures {
                    self.trip()
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => self.trip(),
            BreakerState::Open => None,
        }
    }

    fn trip(&mut self) -> Option<BreakerTransition> {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_successes = 0;
        Some(BreakerTransition::Opened)
    }
}
