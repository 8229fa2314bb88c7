//! Minimum-interval rate limiter for exchange requests.
//!
//! Each exchange gets a schedule: a request may start no earlier than
//! `60s / requests_per_minute` after the previous one. Callers reserve the
//! next free slot under a short lock and then sleep until it, so concurrent
//! callers for one exchange are serialized without busy-waiting.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// Default rate limit: 60 requests per minute.
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Request schedule for a single exchange.
#[derive(Debug)]
struct Schedule {
    /// Minimum spacing between request starts.
    interval: Duration,
    /// Earliest instant the next request may start.
    next_slot: Option<Instant>,
}

impl Schedule {
    fn new(requests_per_minute: u32) -> Self {
        Self {
            interval: interval_for(requests_per_minute),
            next_slot: None,
        }
    }

    /// Reserve the next slot and return when it starts.
    fn reserve(&mut self, now: Instant) -> Instant {
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + self.interval);
        slot
    }
}

fn interval_for(requests_per_minute: u32) -> Duration {
    if requests_per_minute == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(60.0 / requests_per_minute as f64)
    }
}

/// Rate limiter for multiple exchanges.
///
/// Schedules are created on demand with the default limit, or can be
/// pre-configured with [`configure`](Self::configure).
pub struct RateLimiter {
    schedules: Mutex<HashMap<String, Schedule>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the schedules mutex, recovering from poison if necessary.
    fn lock_schedules(&self) -> MutexGuard<'_, HashMap<String, Schedule>> {
        self.schedules.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure the request budget for an exchange. Resets its schedule.
    pub fn configure(&self, exchange: &str, requests_per_minute: u32) {
        self.lock_schedules()
            .insert(exchange.to_string(), Schedule::new(requests_per_minute));
    }

    /// Wait until a request to `exchange` may start.
    ///
    /// The slot is reserved before sleeping, so a caller that gets cancelled
    /// while waiting still consumes its slot.
    pub async fn acquire(&self, exchange: &str) {
        let slot = {
            let mut schedules = self.lock_schedules();
            schedules
                .entry(exchange.to_string())
                .or_insert_with(|| Schedule::new(DEFAULT_REQUESTS_PER_MINUTE))
                .reserve(Instant::now())
        };

        let now = Instant::now();
        if slot > now {
            debug!(
                "Rate limiter: waiting {:?} for exchange '{}'",
                slot - now,
                exchange
            );
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Configured spacing between requests for `exchange`.
    pub fn interval(&self, exchange: &str) -> Duration {
        self.lock_schedules()
            .get(exchange)
            .map(|s| s.interval)
            .unwrap_or_else(|| interval_for(DEFAULT_REQUESTS_PER_MINUTE))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_spaces_reservations() {
        let mut schedule = Schedule::new(60);
        let now = Instant::now();

        let first = schedule.reserve(now);
        let second = schedule.reserve(now);
        let third = schedule.reserve(now);

        assert_eq!(first, now);
        assert_eq!(second - first, Duration::from_secs(1));
        assert_eq!(third - second, Duration::from_secs(1));
    }

    #[test]
    fn test_idle_schedule_does_not_bank_slots() {
        let mut schedule = Schedule::new(60);
        let start = Instant::now();
        schedule.reserve(start);

        let later = start + Duration::from_secs(10);
        assert_eq!(schedule.reserve(later), later);
        assert_eq!(schedule.reserve(later), later + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_waits_one_interval() {
        let limiter = RateLimiter::new();
        limiter.configure("binance", 60);

        let start = Instant::now();
        limiter.acquire("binance").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire("binance").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_exchange_isolation() {
        let limiter = RateLimiter::new();
        limiter.configure("binance", 1);

        limiter.acquire("binance").await;
        let start = Instant::now();
        limiter.acquire("luno").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_interval_follows_budget() {
        let limiter = RateLimiter::new();
        limiter.configure("luno", 1);

        assert_eq!(limiter.interval("luno"), Duration::from_secs(60));
        assert_eq!(limiter.interval("unknown"), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_exchange() {
        let limiter = RateLimiter::new();
        limiter.configure("local", 0);

        let start = Instant::now();
        limiter.acquire("local").await;
        limiter.acquire("local").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_acquire_waits_for_slot() {
        let limiter = RateLimiter::new();
        limiter.configure("binance", 600); // 100ms spacing

        let start = Instant::now();
        limiter.acquire("binance").await;
        limiter.acquire("binance").await;
        limiter.acquire("binance").await;

        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
