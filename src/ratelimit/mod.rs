//! Rate limiter family (C4).
//!
//! Every limiter in this module, local or remote, exposes the same small
//! contract: admit now, or report how long to wait. `item` keys are plain
//! strings (client id, IP address, bucket name) since every caller in this
//! service identifies callers that way; a generic key type would only add
//! ceremony nothing here needs.

pub mod local;
pub mod remote;

use std::time::Duration;

use async_trait::async_trait;

pub use local::{BucketLimiter, ExponentialBackoffLimiter, FastSlowLimiter, MaxOfLimiter};
pub use remote::RemoteTokenBucketLimiter;

/// Shared rate-limiter contract.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Admit `item` right now, or not.
    async fn take(&self, item: &str) -> bool;
    /// How long the caller should wait before `item` would be admitted.
    /// `Duration::ZERO` means admit now.
    async fn when(&self, item: &str) -> Duration;
    /// Number of consecutive rejections recorded for `item`.
    fn retries(&self, item: &str) -> u32;
    /// Clear any state held for `item`.
    fn forget(&self, item: &str);
}
