use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-source request budget over a sliding window.
///
/// Every admitted call is logged; a call is admitted only while fewer than
/// `limit` logged calls are younger than `window`.
#[derive(Debug, Clone)]
pub struct Throttle {
    admitted: Arc<Mutex<VecDeque<Instant>>>,
    window: Duration,
    limit: u32,
}

impl Throttle {
    pub fn new(window: Duration, limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            admitted: Arc::new(Mutex::new(VecDeque::with_capacity(limit as usize))),
            window,
            limit,
        }
    }

    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(Duration::from_secs(60), requests_per_minute)
    }

    /// Tries to take one unit of budget without waiting. On rejection returns
    /// how long until the oldest call in the window ages out.
    pub fn check(&self) -> Result<(), Duration> {
        self.check_at(Instant::now())
    }

    /// Waits until budget is available. Intended for bulk clients that prefer
    /// to sit out the window over handling rejections.
    pub async fn acquire_wait(&self) {
        while let Err(wait) = self.check() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls admitted within the current window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut admitted = self.lock();
        self.evict(&mut admitted, now);
        admitted.len()
    }

    pub const fn window(&self) -> Duration {
        self.window
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    fn check_at(&self, now: Instant) -> Result<(), Duration> {
        let mut admitted = self.lock();
        self.evict(&mut admitted, now);

        if admitted.len() < self.limit as usize {
            admitted.push_back(now);
            return Ok(());
        }
        let oldest = admitted.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    fn evict(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while admitted
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.window)
        {
            admitted.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        self.admitted
            .lock()
            .expect("throttle window lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_once_budget_is_spent() {
        let throttle = Throttle::per_minute(2);

        assert!(throttle.check().is_ok());
        assert!(throttle.check().is_ok());

        let retry_after = throttle.check().expect_err("third request should be rejected");
        assert!(retry_after > Duration::from_secs(59), "{retry_after:?}");
        assert!(retry_after <= Duration::from_secs(60), "{retry_after:?}");
        assert_eq!(throttle.in_window(), 2);
    }

    #[test]
    fn one_more_than_the_limit_inside_a_window_is_rejected() {
        let throttle = Throttle::per_minute(5);
        let start = Instant::now();

        for second in 0..5 {
            assert!(throttle.check_at(start + Duration::from_secs(second * 10)).is_ok());
        }
        let rejected = throttle
            .check_at(start + Duration::from_secs(59))
            .expect_err("sixth call inside one minute");

        assert_eq!(rejected, Duration::from_secs(1));
        assert!(throttle.check_at(start + Duration::from_secs(60)).is_ok());
    }

    #[tokio::test]
    async fn budget_stays_spent_until_the_oldest_call_ages_out() {
        let throttle = Throttle::new(Duration::from_millis(100), 2);

        assert!(throttle.check().is_ok());
        assert!(throttle.check().is_ok());

        tokio::time::sleep(Duration::from_millis(55)).await;
        let wait = throttle.check().expect_err("both calls are still in the window");
        assert!(wait <= Duration::from_millis(45), "{wait:?}");

        tokio::time::sleep(Duration::from_millis(75)).await;
        assert!(throttle.check().is_ok());
    }

    #[tokio::test]
    async fn acquire_wait_sits_out_the_window() {
        let throttle = Throttle::new(Duration::from_millis(50), 1);
        assert!(throttle.check().is_ok());

        let started = Instant::now();
        throttle.acquire_wait().await;
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(throttle.in_window(), 1);
    }
}
