//! Refill and consume accounting shared by the sync and async buckets.
//!
//! Every method here expects the caller to hold the bucket's lock and to
//! pass in the instant it read from its clock.

use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{BucketError, BucketResult};

/// Tokens debited by one consume call.
pub const COST_PER_CONSUME: u64 = 1;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Point-in-time copy of a bucket's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    /// Time between full refills.
    pub refill_interval: Duration,
    /// Maximum tokens, also the amount added per refill.
    pub capacity: u64,
    /// Tokens currently held.
    pub available_tokens: u64,
    /// Next instant a refill is due. `None` until the first consume.
    pub next_refill_deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub(crate) struct BucketState {
    refill_interval: Duration,
    capacity: u64,
    available_tokens: u64,
    next_refill_deadline: Option<Instant>,
}

impl BucketState {
    /// Empty bucket that refills `capacity` tokens every `refill_interval`.
    pub(crate) fn new(refill_interval: Duration, capacity: u64) -> BucketResult<Self> {
        // Deadlines advance in whole nanosecond intervals held in a u64.
        if refill_interval.is_zero() || refill_interval.as_nanos() > u128::from(u64::MAX) {
            return Err(BucketError::InvalidInterval {
                interval: refill_interval,
            });
        }
        if capacity == 0 {
            return Err(BucketError::InvalidCapacity { capacity });
        }

        Ok(Self {
            refill_interval,
            capacity,
            available_tokens: 0,
            next_refill_deadline: None,
        })
    }

    /// Single-token bucket spaced at `1s / requests_per_second`.
    pub(crate) fn for_rate(requests_per_second: u64) -> BucketResult<Self> {
        let interval = rate_interval(requests_per_second)?;
        Self::new(interval, 1)
    }

    pub(crate) fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            refill_interval: self.refill_interval,
            capacity: self.capacity,
            available_tokens: self.available_tokens,
            next_refill_deadline: self.next_refill_deadline,
        }
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.available_tokens == 0
    }

    /// Wait until the next refill if the bucket is empty, zero otherwise.
    /// Initializes the refill deadline on first use. Never touches tokens.
    pub(crate) fn consume(&mut self, now: Instant) -> Duration {
        let deadline = *self.next_refill_deadline.get_or_insert(now);

        if self.is_empty() {
            deadline.saturating_duration_since(now)
        } else {
            Duration::ZERO
        }
    }

    /// Apply any due refill, then debit one token if there is one.
    ///
    /// Returns whether a token was debited. An empty bucket whose refill is
    /// not yet due is left at zero and the call is not charged.
    pub(crate) fn take(&mut self, now: Instant) -> bool {
        let new_tokens = self.refill(now).min(self.capacity);
        self.available_tokens = self
            .available_tokens
            .saturating_add(new_tokens)
            .min(self.capacity);

        if self.available_tokens < COST_PER_CONSUME {
            trace!(capacity = self.capacity, "no token available, consume not debited");
            return false;
        }

        self.available_tokens -= COST_PER_CONSUME;
        true
    }

    /// Tokens owed since the last refill, advancing the deadline by whole
    /// intervals. At least one interval is granted once the deadline passes.
    fn refill(&mut self, now: Instant) -> u64 {
        let deadline = *self.next_refill_deadline.get_or_insert(now);
        if now < deadline {
            return 0;
        }

        let interval_nanos = self.refill_interval.as_nanos();
        let intervals = ((now - deadline).as_nanos() / interval_nanos).max(1);

        let advance = u64::try_from(interval_nanos.saturating_mul(intervals)).unwrap_or(u64::MAX);
        self.next_refill_deadline = Some(
            deadline
                .checked_add(Duration::from_nanos(advance))
                .unwrap_or(now),
        );

        let intervals = u64::try_from(intervals).unwrap_or(u64::MAX);
        trace!(intervals, capacity = self.capacity, "refill due");
        self.capacity.saturating_mul(intervals)
    }
}

/// Interval between tokens for a single-token bucket at the given rate.
pub(crate) fn rate_interval(requests_per_second: u64) -> BucketResult<Duration> {
    if requests_per_second == 0 || requests_per_second > NANOS_PER_SECOND {
        return Err(BucketError::InvalidRate {
            requests_per_second,
        });
    }
    Ok(Duration::from_nanos(NANOS_PER_SECOND / requests_per_second))
}
