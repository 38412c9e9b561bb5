//! Circuit breaker guarding one connection
//!
//! CLOSED counts consecutive failures inside a sliding window; reaching the
//! threshold opens the breaker. OPEN short-circuits every traversal until
//! the cool-down has elapsed, then admits exactly one probe in HALF_OPEN.
//! The probe's outcome closes or reopens the breaker.
//!
//! Every method has an `_at` variant taking the current instant so tests
//! can drive cool-downs without sleeping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use loom_core::{BreakerState, ConnectionId, LoomError, LoomResult};

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Failures older than this no longer count
    pub window: Duration,
    /// Time spent OPEN before a probe is admitted
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cool_down: Duration::from_secs(5),
        }
    }
}

impl BreakerConfig {
    pub fn with_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold.max(1);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

/// Permission to traverse
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    Normal,
    /// The single HALF_OPEN trial
    Probe,
}

/// Breaker statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BreakerStats {
    pub successes: u64,
    pub failures: u64,
    pub short_circuits: u64,
    pub opened: u64,
    pub closed: u64,
}

/// A recorded state change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
}

struct BreakerInner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    stats: BreakerStats,
    transitions: Vec<BreakerTransition>,
}

/// Internally synchronized circuit breaker
pub struct CircuitBreaker {
    connection: ConnectionId,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(connection: ConnectionId, config: BreakerConfig) -> Self {
        Self {
            connection,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
                stats: BreakerStats::default(),
                transitions: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        self.inner.lock().stats
    }

    pub fn try_acquire(&self) -> LoomResult<Permit> {
        self.try_acquire_at(Instant::now())
    }

    /// Ask to traverse. Rejections count as short circuits.
    pub fn try_acquire_at(&self, now: Instant) -> LoomResult<Permit> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(Permit::Normal),
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.cool_down {
                    self.set_state(&mut inner, BreakerState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(Permit::Probe)
                } else {
                    inner.stats.short_circuits += 1;
                    Err(LoomError::CircuitOpen {
                        connection: self.connection,
                        retry_after: self.config.cool_down - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.stats.short_circuits += 1;
                    Err(LoomError::CircuitOpen {
                        connection: self.connection,
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit::Probe)
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.record_success_at(Instant::now())
    }

    pub fn record_success_at(&self, _now: Instant) {
        let mut inner = self.inner.lock();
        inner.stats.successes += 1;
        inner.failures.clear();
        if inner.state == BreakerState::HalfOpen {
            inner.probe_in_flight = false;
            inner.opened_at = None;
            self.set_state(&mut inner, BreakerState::Closed);
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.stats.failures += 1;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.opened_at = Some(now);
                self.set_state(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {
                inner.opened_at = Some(now);
            }
            BreakerState::Closed => {
                let window = self.config.window;
                while let Some(oldest) = inner.failures.front() {
                    if now.saturating_duration_since(*oldest) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                inner.failures.push_back(now);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.failures.clear();
                    inner.opened_at = Some(now);
                    self.set_state(&mut inner, BreakerState::Open);
                }
            }
        }
    }

    /// Run `f` behind the breaker. Short circuits never invoke `f`.
    pub fn call<T, F>(&self, f: F) -> LoomResult<T>
    where
        F: FnOnce() -> LoomResult<T>,
    {
        self.try_acquire()?;
        match f() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Give back a permit that was never used. Frees the HALF_OPEN probe slot.
    pub fn release_permit(&self, permit: Permit) {
        if permit == Permit::Probe {
            self.inner.lock().probe_in_flight = false;
        }
    }

    /// Force CLOSED and forget recorded failures
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
        self.set_state(&mut inner, BreakerState::Closed);
    }

    /// State changes since the last drain, oldest first
    pub fn drain_transitions(&self) -> Vec<BreakerTransition> {
        std::mem::take(&mut self.inner.lock().transitions)
    }

    fn set_state(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.stats.opened += 1;
                warn!(connection = %self.connection, from = %from, "circuit opened");
            }
            BreakerState::Closed => {
                inner.stats.closed += 1;
                debug!(connection = %self.connection, from = %from, "circuit closed");
            }
            BreakerState::HalfOpen => {
                debug!(connection = %self.connection, "circuit half-open, admitting probe");
            }
        }
        inner.transitions.push(BreakerTransition { from, to });
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("connection", &self.connection)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            ConnectionId::new(1),
            BreakerConfig::default()
                .with_threshold(threshold)
                .with_cool_down(Duration::from_secs(10)),
        )
    }

    fn failing() -> LoomResult<()> {
        Err(LoomError::Persistence("down".into()))
    }

    #[test]
    fn test_opens_after_threshold_and_short_circuits() {
        let breaker = breaker(3);
        let invoked = Cell::new(0);

        for _ in 0..3 {
            let result = breaker.call(|| {
                invoked.set(invoked.get() + 1);
                failing()
            });
            assert!(matches!(result, Err(LoomError::Persistence(_))));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let result = breaker.call(|| {
            invoked.set(invoked.get() + 1);
            Ok(())
        });
        assert!(matches!(result, Err(LoomError::CircuitOpen { .. })));
        assert_eq!(invoked.get(), 3);
        assert_eq!(breaker.stats().short_circuits, 1);
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let breaker = breaker(3);
        let now = Instant::now();
        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        breaker.record_success_at(now);
        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_failures_outside_window_expire() {
        let breaker = CircuitBreaker::new(
            ConnectionId::new(2),
            BreakerConfig::default()
                .with_threshold(2)
                .with_window(Duration::from_secs(1)),
        );
        let start = Instant::now();
        breaker.record_failure_at(start);
        breaker.record_failure_at(start + Duration::from_secs(5));
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure_at(start + Duration::from_millis(5500));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_single_probe_then_close() {
        let breaker = breaker(1);
        let start = Instant::now();
        breaker.record_failure_at(start);
        assert_eq!(breaker.state(), BreakerState::Open);

        let early = start + Duration::from_secs(3);
        match breaker.try_acquire_at(early) {
            Err(LoomError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(7))
            }
            other => panic!("expected short circuit, got {other:?}"),
        }

        let later = start + Duration::from_secs(10);
        assert_eq!(breaker.try_acquire_at(later).unwrap(), Permit::Probe);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire_at(later).is_err());

        breaker.record_success_at(later);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(
            breaker.drain_transitions(),
            vec![
                BreakerTransition { from: BreakerState::Closed, to: BreakerState::Open },
                BreakerTransition { from: BreakerState::Open, to: BreakerState::HalfOpen },
                BreakerTransition { from: BreakerState::HalfOpen, to: BreakerState::Closed },
            ]
        );
        assert!(breaker.drain_transitions().is_empty());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = breaker(1);
        let start = Instant::now();
        breaker.record_failure_at(start);
        let later = start + Duration::from_secs(11);
        breaker.try_acquire_at(later).unwrap();
        breaker.record_failure_at(later);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire_at(later + Duration::from_secs(1)).is_err());
        assert_eq!(breaker.stats().opened, 2);
    }

    #[test]
    fn test_released_probe_can_be_retaken() {
        let breaker = breaker(1);
        let start = Instant::now();
        breaker.record_failure_at(start);
        let later = start + Duration::from_secs(10);
        let permit = breaker.try_acquire_at(later).unwrap();
        breaker.release_permit(permit);
        assert_eq!(breaker.try_acquire_at(later).unwrap(), Permit::Probe);
    }

    #[test]
    fn test_reset() {
        let breaker = breaker(1);
        breaker.record_failure();
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }
}
