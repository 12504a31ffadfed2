//! Wait intervals: pool polling uses a fixed delay, fetch retries grow
//! exponentially with jitter.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * factor^attempt`, capped at `max`, optionally spread by +/-50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed(Duration::from_millis(10))
    }
}

impl Backoff {
    pub const fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    /// Doubling delays with jitter, so retries against one flaky source from
    /// many callers do not line up.
    pub const fn retry(base: Duration, max: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max,
            jitter: true,
        }
    }

    /// Delay before attempt `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let capped = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay_ms = (capped * 1_000.0).round() as u64;
                if !jitter || delay_ms == 0 {
                    return Duration::from_millis(delay_ms);
                }
                let spread = delay_ms / 2;
                Duration::from_millis(delay_ms - spread + fastrand::u64(0..=spread * 2))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_ignores_attempt() {
        let backoff = Backoff::fixed(Duration::from_millis(5));
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(40), Duration::from_millis(5));
    }

    #[test]
    fn exponential_delay_doubles_until_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        let delays: Vec<u64> = (0..5).map(|n| backoff.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000]);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn retry_jitter_stays_within_half_of_the_nominal_delay() {
        let backoff = Backoff::retry(Duration::from_millis(100), Duration::from_secs(1));

        for attempt in 0..5 {
            let nominal = (100_u64 << attempt).min(1_000);
            for _ in 0..20 {
                let delay = backoff.delay(attempt).as_millis() as u64;
                assert!(delay >= nominal / 2 && delay <= nominal + nominal / 2, "{delay}");
            }
        }
    }
}
