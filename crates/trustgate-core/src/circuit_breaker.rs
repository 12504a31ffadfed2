use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{BreakerPolicy, UtcDateTime};

/// Whether calls to a source are currently let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<UtcDateTime>,
    /// Time spent open so far; `None` unless open.
    pub opened_ms_ago: Option<u64>,
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Tally {
    phase: Phase,
    consecutive_failures: u32,
    last_failure_at: Option<UtcDateTime>,
}

/// Per-source breaker driven by a [`BreakerPolicy`].
///
/// The open to half-open move happens lazily inside [`admit`](Self::admit),
/// so no timer task is needed per source.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    tally: Mutex<Tally>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            failure_threshold: policy.failure_threshold.max(1),
            cooldown: Duration::from_millis(policy.cooldown_ms),
            tally: Mutex::new(Tally {
                phase: Phase::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Lets a call through, or returns how much cooldown is left.
    pub fn admit(&self) -> Result<(), Duration> {
        let mut tally = self.lock();
        let Phase::Open { since } = tally.phase else {
            return Ok(());
        };
        let waited = since.elapsed();
        if waited >= self.cooldown {
            tally.phase = Phase::HalfOpen;
            Ok(())
        } else {
            Err(self.cooldown - waited)
        }
    }

    pub fn record_success(&self) {
        let mut tally = self.lock();
        tally.phase = Phase::Closed;
        tally.consecutive_failures = 0;
    }

    /// Counts a failed call. A failed half-open probe reopens at once.
    pub fn record_failure(&self) -> CircuitState {
        let mut tally = self.lock();
        tally.consecutive_failures = tally.consecutive_failures.saturating_add(1);
        tally.last_failure_at = Some(UtcDateTime::now());

        let trips = matches!(tally.phase, Phase::HalfOpen)
            || tally.consecutive_failures >= self.failure_threshold;
        if trips && !matches!(tally.phase, Phase::Open { .. }) {
            tally.phase = Phase::Open {
                since: Instant::now(),
            };
        }
        state_of(&tally.phase)
    }

    pub fn state(&self) -> CircuitState {
        state_of(&self.lock().phase)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let tally = self.lock();
        let opened_ms_ago = match tally.phase {
            Phase::Open { since } => {
                Some(since.elapsed().as_millis().min(u128::from(u64::MAX)) as u64)
            }
            _ => None,
        };
        CircuitSnapshot {
            state: state_of(&tally.phase),
            consecutive_failures: tally.consecutive_failures,
            last_failure_at: tally.last_failure_at,
            opened_ms_ago,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        self.tally
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}

const fn state_of(phase: &Phase) -> CircuitState {
    match phase {
        Phase::Closed => CircuitState::Closed,
        Phase::Open { .. } => CircuitState::Open,
        Phase::HalfOpen => CircuitState::HalfOpen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerPolicy {
            failure_threshold,
            cooldown_ms,
        })
    }

    #[test]
    fn trips_at_the_threshold_and_reports_remaining_cooldown() {
        let breaker = breaker(2, 60_000);

        assert_eq!(breaker.record_failure(), CircuitState::Closed);
        assert_eq!(breaker.record_failure(), CircuitState::Open);

        let remaining = breaker.admit().expect_err("still cooling down");
        assert!(remaining > Duration::from_secs(59));
        let snapshot = breaker.snapshot();
        assert!(snapshot.last_failure_at.is_some());
        assert!(snapshot.opened_ms_ago.is_some());
    }

    #[test]
    fn half_open_probe_success_closes() {
        let breaker = breaker(1, 1);
        breaker.record_failure();

        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.admit().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.snapshot().opened_ms_ago, None);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = breaker(3, 1);
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.admit().is_ok());

        assert_eq!(breaker.record_failure(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 4);
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        let breaker = breaker(0, 60_000);
        assert_eq!(breaker.record_failure(), CircuitState::Open);
    }
}
