use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock, Reference};
use parking_lot::Mutex;
use thiserror::Error;

use crate::error::ValidationError;

// Floor for the Wait-mode sleep so a zero retry hint cannot spin.
const MIN_WAIT_STEP: Duration = Duration::from_millis(1);

/// What `acquire` does when the window budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleMode {
    /// Fail immediately with a retry-after hint.
    #[default]
    Reject,
    /// Suspend until a permit frees up, bounded by `max_wait` when set.
    Wait,
}

impl ThrottleMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Wait => "wait",
        }
    }
}

impl fmt::Display for ThrottleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThrottleMode {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "wait" => Ok(Self::Wait),
            _ => Err(ValidationError::InvalidThrottleMode {
                value: value.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Calls allowed within any trailing `window`.
    pub limit: u32,
    pub window: Duration,
    pub mode: ThrottleMode,
    pub max_wait: Option<Duration>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: 50,
            window: Duration::from_secs(60),
            mode: ThrottleMode::Reject,
            max_wait: None,
        }
    }
}

impl ThrottleConfig {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ThrottleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Retry hint in whole seconds, rounded up and never below one.
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_secs(self.retry_after)
    }
}

/// `wait` in whole seconds for a `Retry-After` header: rounded up, never below one.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Per-provider limiter guarding outbound upstream calls.
///
/// Keeps the admission time of every call still inside the trailing `window`. A call
/// is admitted while fewer than `limit` remain; otherwise it has to wait until the
/// oldest one leaves the window.
#[derive(Clone)]
pub struct Throttle<C: Clock = DefaultClock> {
    name: &'static str,
    admitted: Arc<Mutex<VecDeque<C::Instant>>>,
    clock: C,
    config: ThrottleConfig,
}

impl<C: Clock> fmt::Debug for Throttle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Throttle<DefaultClock> {
    pub fn new(name: &'static str, config: ThrottleConfig) -> Self {
        Self::with_clock(name, config, DefaultClock::default())
    }
}

impl<C: Clock> Throttle<C> {
    pub fn with_clock(name: &'static str, config: ThrottleConfig, clock: C) -> Self {
        Self {
            name,
            admitted: Arc::new(Mutex::new(VecDeque::with_capacity(ceiling(&config)))),
            clock,
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Take one permit, honoring the configured mode.
    pub async fn acquire(&self) -> Result<(), RateLimitExceeded> {
        match self.config.mode {
            ThrottleMode::Reject => self.try_acquire(),
            ThrottleMode::Wait => self.wait_for_permit(self.config.max_wait).await,
        }
    }

    /// Take one permit now or fail with the time until one frees up.
    pub fn try_acquire(&self) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now();
        let window = self.config.window;
        let mut admitted = self.admitted.lock();

        while admitted
            .front()
            .is_some_and(|&oldest| elapsed(now, oldest) >= window)
        {
            admitted.pop_front();
        }

        if admitted.len() < ceiling(&self.config) {
            admitted.push_back(now);
            return Ok(());
        }

        let oldest = admitted.front().copied().unwrap_or(now);
        let retry_after = window.saturating_sub(elapsed(now, oldest));
        tracing::debug!(
            limiter = self.name,
            in_window = admitted.len(),
            retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            "rate limit budget exhausted"
        );
        Err(RateLimitExceeded { retry_after })
    }

    /// Wait for a permit regardless of mode or `max_wait`.
    pub async fn until_ready(&self) {
        // Unbounded wait cannot fail.
        let _ = self.wait_for_permit(None).await;
    }

    async fn wait_for_permit(&self, max_wait: Option<Duration>) -> Result<(), RateLimitExceeded> {
        let mut waited = Duration::ZERO;
        loop {
            let exceeded = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(exceeded) => exceeded,
            };

            if let Some(max_wait) = max_wait {
                if waited + exceeded.retry_after > max_wait {
                    return Err(exceeded);
                }
            }

            let step = exceeded.retry_after.max(MIN_WAIT_STEP);
            tokio::time::sleep(step).await;
            waited += step;
        }
    }
}

// A zero limit still admits one call per window.
fn ceiling(config: &ThrottleConfig) -> usize {
    usize::try_from(config.limit.max(1)).unwrap_or(usize::MAX)
}

fn elapsed<I: Reference>(now: I, earlier: I) -> Duration {
    now.duration_since(earlier).into()
}

#[cfg(test)]
mod tests {
    use governor::clock::FakeRelativeClock;

    use super::*;

    fn fake_throttle(
        limit: u32,
        window: Duration,
    ) -> (Throttle<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let config = ThrottleConfig::new(limit, window);
        let throttle = Throttle::with_clock("test", config, clock.clone());
        (throttle, clock)
    }

    #[test]
    fn ceiling_is_available_at_once() {
        let (throttle, _clock) = fake_throttle(3, Duration::from_secs(60));

        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_ok());

        let exceeded = throttle
            .try_acquire()
            .expect_err("fourth call exceeds the ceiling");
        assert_eq!(exceeded.retry_after, Duration::from_secs(60));
    }

    #[test]
    fn window_is_trailing_not_replenished_per_call() {
        let (throttle, clock) = fake_throttle(2, Duration::from_secs(60));
        throttle.try_acquire().expect("t=0");
        clock.advance(Duration::from_secs(30));
        throttle.try_acquire().expect("t=30");

        clock.advance(Duration::from_secs(15));
        let exceeded = throttle.try_acquire().expect_err("two calls inside the window");
        assert_eq!(exceeded.retry_after, Duration::from_secs(15));

        clock.advance(Duration::from_secs(14));
        assert!(throttle.try_acquire().is_err());

        // t=60: the first call has left the window, the second has not.
        clock.advance(Duration::from_secs(1));
        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_err());
    }

    #[test]
    fn full_budget_returns_once_window_has_passed() {
        let (throttle, clock) = fake_throttle(2, Duration::from_secs(60));
        throttle.try_acquire().expect("first");
        throttle.try_acquire().expect("second");

        let exceeded = throttle.try_acquire().expect_err("over budget");
        clock.advance(exceeded.retry_after);

        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_err());
    }

    #[test]
    fn ceiling_holds_over_any_trailing_window() {
        let (throttle, clock) = fake_throttle(50, Duration::from_secs(60));
        let mut admitted = 0;

        // Keep draining every second for just under one window.
        for second in 0..60 {
            if second > 0 {
                clock.advance(Duration::from_secs(1));
            }
            while throttle.try_acquire().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn wait_mode_with_zero_budget_fails_like_reject() {
        let clock = FakeRelativeClock::default();
        let config = ThrottleConfig::new(1, Duration::from_secs(60))
            .with_mode(ThrottleMode::Wait)
            .with_max_wait(Duration::ZERO);
        let throttle = Throttle::with_clock("test", config, clock);

        throttle.acquire().await.expect("first permit");
        let exceeded = throttle.acquire().await.expect_err("cannot wait");
        assert!(exceeded.retry_after > Duration::ZERO);
    }

    #[tokio::test]
    async fn wait_mode_suspends_until_permit() {
        let config =
            ThrottleConfig::new(2, Duration::from_millis(100)).with_mode(ThrottleMode::Wait);
        let throttle = Throttle::new("test", config);

        throttle.acquire().await.expect("first");
        throttle.acquire().await.expect("second");

        let started = std::time::Instant::now();
        throttle.acquire().await.expect("waits for the oldest call to leave the window");
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let (throttle, _clock) = fake_throttle(0, Duration::from_secs(1));
        assert!(throttle.try_acquire().is_ok());
        assert!(throttle.try_acquire().is_err());
    }

    #[test]
    fn retry_after_seconds_round_up() {
        let exceeded = RateLimitExceeded {
            retry_after: Duration::from_millis(1_200),
        };
        assert_eq!(exceeded.retry_after_secs(), 2);

        let exceeded = RateLimitExceeded {
            retry_after: Duration::from_millis(10),
        };
        assert_eq!(exceeded.retry_after_secs(), 1);

        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Wait".parse::<ThrottleMode>(), Ok(ThrottleMode::Wait));
        assert_eq!("reject".parse::<ThrottleMode>(), Ok(ThrottleMode::Reject));
        assert!("drop".parse::<ThrottleMode>().is_err());
    }
}
