//! Circuit breaker state machine.
//!
//! # Design
//!
//! The breaker is driven entirely by the guard: the guard asks for
//! admission before starting a call and reports exactly one outcome per
//! admitted call (success, failure, or abandonment when the call future is
//! dropped). All transitions happen under one mutex so a burst of
//! concurrent failures trips the breaker exactly once.
//!
//! Failures are counted two ways:
//!
//! - consecutive failures since the last success
//! - failures within a tumbling window, compared against an error rate once
//!   the window has seen enough calls
//!
//! Either crossing its threshold opens the breaker.

use std::time::Duration;

use parking_lot::Mutex;

use super::{CommandGroup, FaultGuardConfig, RejectReason};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// A single probe call decides whether to close or reopen.
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { opened_at: Duration },
    HalfOpen { probe_in_flight: bool },
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Ordinary call with the breaker closed.
    Call,
    /// The single half-open probe.
    Probe,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    window_start: Duration,
    window_calls: u32,
    window_failures: u32,
    trips: u64,
}

impl Inner {
    fn roll_window(&mut self, now: Duration, window: Duration) {
        if now.saturating_sub(self.window_start) >= window {
            self.window_start = now;
            self.window_calls = 0;
            self.window_failures = 0;
        }
    }

    fn reset_counters(&mut self, now: Duration) {
        self.consecutive_failures = 0;
        self.window_start = now;
        self.window_calls = 0;
        self.window_failures = 0;
    }
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    group: CommandGroup,
    failure_threshold: u32,
    error_rate_percent: u32,
    minimum_calls: u32,
    rolling_window: Duration,
    cool_down: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub(crate) fn new(group: CommandGroup, config: &FaultGuardConfig, now: Duration) -> Self {
        Self {
            group,
            failure_threshold: config.failure_threshold,
            error_rate_percent: config.error_rate_percent,
            minimum_calls: config.minimum_calls,
            rolling_window: config.rolling_window,
            cool_down: config.cool_down,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                window_start: now,
                window_calls: 0,
                window_failures: 0,
                trips: 0,
            }),
        }
    }

    /// Decide whether a call may start at `now`.
    pub(crate) fn try_admit(&self, now: Duration) -> Result<Admission, RejectReason> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => Ok(Admission::Call),
            State::Open { opened_at } => {
                if now.saturating_sub(opened_at) >= self.cool_down {
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    tracing::info!(group = %self.group, "circuit half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    Err(RejectReason::BreakerOpen)
                }
            }
            State::HalfOpen {
                probe_in_flight: true,
            } => Err(RejectReason::BreakerOpen),
            State::HalfOpen {
                probe_in_flight: false,
            } => {
                inner.state = State::HalfOpen {
                    probe_in_flight: true,
                };
                Ok(Admission::Probe)
            }
        }
    }

    pub(crate) fn on_success(&self, admission: Admission, now: Duration) {
        let mut inner = self.inner.lock();
        match admission {
            Admission::Probe => {
                inner.state = State::Closed;
                inner.reset_counters(now);
                tracing::info!(group = %self.group, "circuit closed after successful probe");
            }
            Admission::Call => {
                if inner.state != State::Closed {
                    return;
                }
                inner.roll_window(now, self.rolling_window);
                inner.consecutive_failures = 0;
                inner.window_calls += 1;
            }
        }
    }

    /// Record a failure. Returns `true` when this failure opened the breaker.
    pub(crate) fn on_failure(&self, admission: Admission, now: Duration) -> bool {
        let mut inner = self.inner.lock();
        match admission {
            Admission::Probe => {
                inner.state = State::Open { opened_at: now };
                tracing::warn!(group = %self.group, "probe failed, circuit reopened");
                false
            }
            Admission::Call => {
                // Stragglers admitted before a trip do not count again.
                if inner.state != State::Closed {
                    return false;
                }
                inner.roll_window(now, self.rolling_window);
                inner.consecutive_failures += 1;
                inner.window_calls += 1;
                inner.window_failures += 1;

                let consecutive_trip = self.failure_threshold > 0
                    && inner.consecutive_failures >= self.failure_threshold;
                let rate_trip = self.error_rate_percent > 0
                    && inner.window_calls >= self.minimum_calls.max(1)
                    && u64::from(inner.window_failures) * 100
                        >= u64::from(self.error_rate_percent) * u64::from(inner.window_calls);

                if consecutive_trip || rate_trip {
                    inner.state = State::Open { opened_at: now };
                    inner.trips += 1;
                    let consecutive = inner.consecutive_failures;
                    let window_failures = inner.window_failures;
                    let window_calls = inner.window_calls;
                    inner.reset_counters(now);
                    tracing::warn!(
                        group = %self.group,
                        consecutive,
                        window_failures,
                        window_calls,
                        "circuit opened"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The admitted call was dropped before reporting an outcome.
    pub(crate) fn on_abandoned(&self, admission: Admission) {
        if admission != Admission::Probe {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state
            == (State::HalfOpen {
                probe_in_flight: true,
            })
        {
            inner.state = State::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    pub(crate) fn status(&self) -> BreakerStatus {
        match self.inner.lock().state {
            State::Closed => BreakerStatus::Closed,
            State::Open { .. } => BreakerStatus::Open,
            State::HalfOpen { .. } => BreakerStatus::HalfOpen,
        }
    }

    pub(crate) fn trips(&self) -> u64 {
        self.inner.lock().trips
    }
}
