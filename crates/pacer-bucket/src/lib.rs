//! Lazily refilled token buckets.
//!
//! A [`TokenBucket`] admits callers at a bounded average rate with bursts
//! up to its capacity. There is no background refill task: the tokens owed
//! since the last refill deadline are computed whenever a caller consumes.
//!
//! ```
//! use pacer_bucket::TokenBucket;
//! use std::sync::Arc;
//!
//! let bucket = Arc::new(TokenBucket::with_rate(100).unwrap());
//! let released_at = bucket.consume_with_block();
//! # let _ = released_at;
//! ```

pub mod bucket;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
mod state;

#[cfg(feature = "async")]
pub mod async_bucket;

pub use bucket::TokenBucket;
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BucketConfig;
pub use error::{BucketError, BucketResult};
pub use state::{BucketSnapshot, COST_PER_CONSUME};

#[cfg(feature = "async")]
pub use async_bucket::AsyncTokenBucket;
