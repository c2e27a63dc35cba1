//! Token bucket for async callers.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BucketConfig;
use crate::error::{BucketError, BucketResult};
use crate::state::{BucketSnapshot, BucketState};

/// Token bucket whose blocking consume suspends the task instead of the
/// thread.
///
/// Uses the same accounting as [`TokenBucket`](crate::TokenBucket) and the
/// same locking discipline: the async mutex stays held while a consumer
/// sleeps. Time comes from [`tokio::time::Instant`], so a paused runtime
/// drives it deterministically.
pub struct AsyncTokenBucket {
    state: Mutex<BucketState>,
}

impl AsyncTokenBucket {
    /// Create a bucket that refills `capacity` tokens every `interval`.
    pub fn new(interval: Duration, capacity: u64) -> BucketResult<Self> {
        Ok(Self::from_state(BucketState::new(interval, capacity)?))
    }

    /// Create a single-token bucket admitting `requests_per_second` calls.
    pub fn with_rate(requests_per_second: u64) -> BucketResult<Self> {
        Ok(Self::from_state(BucketState::for_rate(requests_per_second)?))
    }

    /// Create a bucket from configuration.
    pub fn from_config(config: &BucketConfig) -> BucketResult<Self> {
        config.validate()?;
        Self::new(config.refill_interval()?, config.capacity())
    }

    fn from_state(state: BucketState) -> Self {
        debug!(
            capacity = state.capacity(),
            refill_interval = ?state.refill_interval(),
            "async token bucket created"
        );
        Self {
            state: Mutex::new(state),
        }
    }

    /// Consume without sleeping. Returns the wait a blocking consume would
    /// have needed.
    pub async fn consume_without_block(&self) -> Duration {
        let mut state = self.state.lock().await;
        let wait = state.consume(now());
        state.take(now());
        wait
    }

    /// Consume, sleeping until the next refill if the bucket is empty.
    ///
    /// Dropping the returned future mid-sleep releases the lock without
    /// taking a token.
    pub async fn consume_with_block(&self) -> Instant {
        let mut state = self.state.lock().await;
        let wait = state.consume(now());

        if state.is_empty() {
            debug!(?wait, "bucket empty, waiting for refill");
            tokio::time::sleep(wait).await;
        }

        state.take(now());
        Instant::now()
    }

    /// Blocking consume that gives up when `shutdown` completes first.
    ///
    /// Waiting for the lock counts towards the wait, so a caller queued
    /// behind another sleeper can also be released.
    pub async fn consume_with_block_until<F>(&self, shutdown: F) -> BucketResult<Instant>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::select! {
            released = self.consume_with_block() => Ok(released),
            () = shutdown => {
                let waited = started.elapsed();
                warn!(?waited, "token wait cancelled");
                Err(BucketError::Cancelled { waited })
            }
        }
    }

    /// Maximum tokens the bucket holds.
    pub async fn capacity(&self) -> u64 {
        self.state.lock().await.capacity()
    }

    /// Tokens currently held.
    pub async fn available_tokens(&self) -> u64 {
        self.snapshot().await.available_tokens
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> BucketSnapshot {
        self.state.lock().await.snapshot()
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}
