//! Blocking token bucket.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock};
use crate::config::BucketConfig;
use crate::error::{BucketError, BucketResult};
use crate::state::{BucketSnapshot, BucketState};

/// Token bucket shared between threads.
///
/// Starts empty and refills `capacity` tokens every refill interval,
/// computed lazily when a caller consumes. All operations serialize on one
/// mutex. A blocking consume keeps holding it while it sleeps, so blocking
/// callers pass through one at a time.
///
/// ```
/// use pacer_bucket::TokenBucket;
/// use std::time::Duration;
///
/// let bucket = TokenBucket::new(Duration::from_secs(1), 10).unwrap();
/// let wait = bucket.consume_without_block();
/// assert_eq!(wait, Duration::ZERO);
/// ```
pub struct TokenBucket<C: Clock = SystemClock> {
    state: Mutex<BucketState>,
    clock: C,
}

impl TokenBucket<SystemClock> {
    /// Create a bucket that refills `capacity` tokens every `interval`.
    pub fn new(interval: Duration, capacity: u64) -> BucketResult<Self> {
        Self::with_clock(interval, capacity, SystemClock)
    }

    /// Create a single-token bucket admitting `requests_per_second` calls
    /// spaced evenly.
    pub fn with_rate(requests_per_second: u64) -> BucketResult<Self> {
        Self::with_rate_and_clock(requests_per_second, SystemClock)
    }

    /// Create a bucket from configuration.
    pub fn from_config(config: &BucketConfig) -> BucketResult<Self> {
        match *config {
            BucketConfig::Interval {
                refill_interval_ms,
                capacity,
            } => Self::new(Duration::from_millis(refill_interval_ms), capacity),
            BucketConfig::Rate {
                requests_per_second,
            } => Self::with_rate(requests_per_second),
        }
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a bucket driven by a custom clock.
    pub fn with_clock(interval: Duration, capacity: u64, clock: C) -> BucketResult<Self> {
        Ok(Self::from_state(BucketState::new(interval, capacity)?, clock))
    }

    /// Create a rate-based bucket driven by a custom clock.
    pub fn with_rate_and_clock(requests_per_second: u64, clock: C) -> BucketResult<Self> {
        Ok(Self::from_state(BucketState::for_rate(requests_per_second)?, clock))
    }

    fn from_state(state: BucketState, clock: C) -> Self {
        debug!(
            capacity = state.capacity(),
            refill_interval = ?state.refill_interval(),
            "token bucket created"
        );
        Self {
            state: Mutex::new(state),
            clock,
        }
    }

    /// Consume without suspending the caller.
    ///
    /// Returns how long the caller would have had to wait for a token, or
    /// zero if one was available. A non-zero wait is not a rejection: the
    /// call has already been accounted for.
    pub fn consume_without_block(&self) -> Duration {
        let mut state = self.lock();
        let wait = state.consume(self.clock.now());
        state.take(self.clock.now());
        wait
    }

    /// Consume, sleeping until the next refill if the bucket is empty.
    ///
    /// The lock is held across the sleep. Returns the instant at which the
    /// caller is released.
    pub fn consume_with_block(&self) -> Instant {
        let mut state = self.lock();
        let wait = state.consume(self.clock.now());

        if state.is_empty() {
            debug!(?wait, "bucket empty, waiting for refill");
            self.clock.sleep(wait);
        }

        state.take(self.clock.now());
        self.clock.now()
    }

    /// Like [`consume_with_block`](Self::consume_with_block), but the wait
    /// ends early if `cancel` fires.
    ///
    /// A cancelled wait takes no token and returns [`BucketError::Cancelled`].
    pub fn consume_with_block_cancellable(&self, cancel: &CancelToken) -> BucketResult<Instant> {
        let mut state = self.lock();
        let started = self.clock.now();
        let wait = state.consume(started);

        if state.is_empty() && !wait.is_zero() {
            debug!(?wait, "bucket empty, waiting for refill");
            if self.clock.sleep_or_cancel(wait, cancel) {
                let waited = self.clock.now().saturating_duration_since(started);
                warn!(?waited, "token wait cancelled");
                return Err(BucketError::Cancelled { waited });
            }
        }

        state.take(self.clock.now());
        Ok(self.clock.now())
    }

    /// Maximum tokens the bucket holds.
    pub fn capacity(&self) -> u64 {
        self.lock().capacity()
    }

    /// Time between full refills.
    pub fn refill_interval(&self) -> Duration {
        self.lock().refill_interval()
    }

    /// Tokens currently held.
    pub fn available_tokens(&self) -> u64 {
        self.snapshot().available_tokens
    }

    /// Next instant a refill is due, once the bucket has been used.
    pub fn next_refill_deadline(&self) -> Option<Instant> {
        self.snapshot().next_refill_deadline
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> BucketSnapshot {
        self.lock().snapshot()
    }

    // State is consistent between statements, so a panic elsewhere cannot
    // leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock> std::fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("state", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_bucket(interval: Duration, capacity: u64) -> (TokenBucket<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(interval, capacity, clock.clone()).unwrap();
        (bucket, clock)
    }

    #[test]
    fn test_constructor_validation() {
        assert!(TokenBucket::new(Duration::from_secs(1), 0).is_err());
        assert!(TokenBucket::new(Duration::ZERO, 5).is_err());
        assert!(TokenBucket::with_rate(0).is_err());

        let bucket = TokenBucket::with_rate(4).unwrap();
        assert_eq!(bucket.capacity(), 1);
        assert_eq!(bucket.refill_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_config() {
        let bucket = TokenBucket::from_config(&BucketConfig::Interval {
            refill_interval_ms: 500,
            capacity: 3,
        })
        .unwrap();
        assert_eq!(bucket.capacity(), 3);
        assert_eq!(bucket.refill_interval(), Duration::from_millis(500));

        let bucket = TokenBucket::from_config(&BucketConfig::Rate {
            requests_per_second: 20,
        })
        .unwrap();
        assert_eq!(bucket.refill_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_burst_then_block() {
        let (bucket, clock) = manual_bucket(Duration::from_secs(1), 10);
        let start = clock.now();

        for _ in 0..10 {
            assert_eq!(bucket.consume_with_block(), start);
        }
        assert_eq!(bucket.available_tokens(), 0);

        let released = bucket.consume_with_block();
        assert_eq!(released - start, Duration::from_secs(1));
        assert_eq!(bucket.available_tokens(), 9);
    }

    #[test]
    fn test_non_blocking_reports_wait_without_sleeping() {
        let (bucket, clock) = manual_bucket(Duration::from_secs(1), 2);
        let start = clock.now();

        assert_eq!(bucket.consume_without_block(), Duration::ZERO);
        assert_eq!(bucket.consume_without_block(), Duration::ZERO);

        clock.advance(Duration::from_millis(400));
        assert_eq!(bucket.consume_without_block(), Duration::from_millis(600));
        assert_eq!(bucket.available_tokens(), 0);
        assert_eq!(clock.now() - start, Duration::from_millis(400));
    }

    #[test]
    fn test_rate_bucket_spacing() {
        let (bucket, _clock) = manual_bucket(Duration::from_millis(100), 1);
        let mut prev = bucket.consume_with_block();

        for _ in 0..20 {
            let now = bucket.consume_with_block();
            assert_eq!(now - prev, Duration::from_millis(100));
            prev = now;
        }
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn test_lazy_init_independent_of_age() {
        let clock = ManualClock::new();
        let early = TokenBucket::with_clock(Duration::from_secs(1), 5, clock.clone()).unwrap();
        clock.advance(Duration::from_secs(3600));
        let late = TokenBucket::with_clock(Duration::from_secs(1), 5, clock.clone()).unwrap();

        assert_eq!(early.snapshot(), late.snapshot());
        assert_eq!(early.next_refill_deadline(), None);

        assert_eq!(early.consume_without_block(), late.consume_without_block());
        assert_eq!(early.snapshot(), late.snapshot());
        assert_eq!(early.available_tokens(), 4);
    }

    #[test]
    fn test_cancelled_wait_takes_nothing() {
        let (bucket, _clock) = manual_bucket(Duration::from_secs(1), 1);
        bucket.consume_with_block();
        let before = bucket.snapshot();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = bucket.consume_with_block_cancellable(&cancel);

        assert!(matches!(result, Err(BucketError::Cancelled { .. })));
        assert_eq!(bucket.snapshot(), before);
    }

    #[test]
    fn test_cancellable_proceeds_when_token_available() {
        let (bucket, clock) = manual_bucket(Duration::from_secs(1), 3);
        let cancel = CancelToken::new();
        cancel.cancel();

        // Neither call has anything to wait for, so cancellation is moot.
        let start = clock.now();
        assert_eq!(bucket.consume_with_block_cancellable(&cancel).unwrap(), start);
        assert_eq!(bucket.consume_with_block_cancellable(&cancel).unwrap(), start);
        assert_eq!(bucket.available_tokens(), 1);
    }

    #[test]
    fn test_cancellable_waits_when_not_cancelled() {
        let (bucket, clock) = manual_bucket(Duration::from_secs(2), 1);
        let start = clock.now();
        let cancel = CancelToken::new();

        bucket.consume_with_block_cancellable(&cancel).unwrap();
        let released = bucket.consume_with_block_cancellable(&cancel).unwrap();
        assert_eq!(released - start, Duration::from_secs(2));
    }
}
