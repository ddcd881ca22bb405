//! Retry and backoff policy for adapter calls
//!
//! One [`RetryPolicy`] object (base intervals, cap, retry count) is consumed
//! uniformly by wrapping an adapter in [`RetryingAdapter`] — no call site
//! carries its own ad hoc retry loop. Classification drives the policy:
//!
//! | Failure | Handling |
//! |---------|----------|
//! | RateLimited | retried indefinitely, doubling backoff capped at the max |
//! | AuthExpired | re-authenticate once, retry once, else fatal |
//! | Transient | fixed retry count with doubling backoff |
//! | Malformed | propagated immediately |
//!
//! Wrapped calls must be safe to repeat (pure reads). Exactly-once
//! guarantees live in the storage layer, not here.

use crate::config::RetryConfig;
use crate::source::{FetchFailure, ItemDetail, ListingSnapshot, SourceAdapter};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

/// Backoff constants and retry counts, from configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    rate_limit_base: Duration,
    rate_limit_cap: Duration,
    transient_base: Duration,
    transient_retries: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            rate_limit_base: Duration::from_secs(config.rate_limit_base_secs),
            rate_limit_cap: Duration::from_secs(config.rate_limit_cap_secs),
            transient_base: Duration::from_secs(config.transient_base_secs),
            transient_retries: config.transient_retries,
        }
    }

    /// Wait before the next attempt after the nth consecutive rate-limit
    /// failure (1-based): `min(base * 2^(n-1), cap)`
    pub fn rate_limit_backoff(&self, consecutive_failures: u32) -> Duration {
        Self::doubling(self.rate_limit_base, consecutive_failures).min(self.rate_limit_cap)
    }

    /// Wait before the nth transient retry (1-based), doubling from the
    /// transient base; capped the same way so pathological counts stay sane
    pub fn transient_backoff(&self, attempt: u32) -> Duration {
        Self::doubling(self.transient_base, attempt).min(self.rate_limit_cap)
    }

    fn doubling(base: Duration, n: u32) -> Duration {
        let factor = 1u32.checked_shl(n.saturating_sub(1)).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
    }

    /// Runs one adapter call under this policy
    ///
    /// `call` produces a fresh future for each attempt; `reauth` refreshes
    /// credentials after an auth-expired failure.
    pub async fn execute<'a, T>(
        &self,
        mut call: impl FnMut() -> BoxFuture<'a, Result<T, FetchFailure>> + Send + 'a,
        mut reauth: impl FnMut() -> BoxFuture<'a, Result<(), FetchFailure>> + Send + 'a,
    ) -> Result<T, FetchFailure> {
        let mut rate_limit_failures: u32 = 0;
        let mut transient_attempts: u32 = 0;
        let mut reauthenticated = false;

        loop {
            match call().await {
                Ok(value) => return Ok(value),

                Err(FetchFailure::RateLimited) => {
                    rate_limit_failures += 1;
                    let wait = self.rate_limit_backoff(rate_limit_failures);
                    tracing::warn!(
                        consecutive = rate_limit_failures,
                        wait_secs = wait.as_secs(),
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }

                Err(FetchFailure::AuthExpired) => {
                    if reauthenticated {
                        // Already refreshed once for this invocation
                        return Err(FetchFailure::AuthExpired);
                    }
                    tracing::warn!("credentials expired, re-authenticating");
                    reauth().await?;
                    reauthenticated = true;
                    rate_limit_failures = 0;
                }

                Err(FetchFailure::Transient(message)) => {
                    transient_attempts += 1;
                    if transient_attempts > self.transient_retries {
                        return Err(FetchFailure::Transient(message));
                    }
                    let wait = self.transient_backoff(transient_attempts);
                    tracing::warn!(
                        attempt = transient_attempts,
                        max = self.transient_retries,
                        wait_secs = wait.as_secs(),
                        error = %message,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    rate_limit_failures = 0;
                }

                Err(failure @ FetchFailure::Malformed(_)) => return Err(failure),
            }
        }
    }
}

/// Decorator applying a [`RetryPolicy`] to every call of a wrapped adapter
pub struct RetryingAdapter<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: SourceAdapter> RetryingAdapter<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<A: SourceAdapter> SourceAdapter for RetryingAdapter<A> {
    async fn fetch_listing(&self, source: &str) -> Result<ListingSnapshot, FetchFailure> {
        self.policy
            .execute(
                || self.inner.fetch_listing(source).boxed(),
                || self.inner.reauthenticate().boxed(),
            )
            .await
    }

    async fn fetch_item(&self, source: &str, item_id: i64) -> Result<ItemDetail, FetchFailure> {
        self.policy
            .execute(
                || self.inner.fetch_item(source, item_id).boxed(),
                || self.inner.reauthenticate().boxed(),
            )
            .await
    }

    async fn reauthenticate(&self) -> Result<(), FetchFailure> {
        self.inner.reauthenticate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn test_policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            rate_limit_base_secs: 1,
            rate_limit_cap_secs: 60,
            transient_base_secs: 2,
            transient_retries: 3,
        })
    }

    /// Adapter that fails according to a script, then succeeds forever
    struct ScriptedAdapter {
        script: Mutex<VecDeque<FetchFailure>>,
        calls: AtomicU32,
        reauths: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<FetchFailure>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                reauths: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        async fn fetch_listing(&self, _source: &str) -> Result<ListingSnapshot, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(failure) => Err(failure),
                None => Ok(ListingSnapshot::default()),
            }
        }

        async fn fetch_item(&self, _source: &str, _item_id: i64) -> Result<ItemDetail, FetchFailure> {
            unimplemented!("not exercised")
        }

        async fn reauthenticate(&self) -> Result<(), FetchFailure> {
            self.reauths.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_rate_limit_backoff_sequence() {
        let policy = test_policy();

        // min(1 * 2^(n-1), 60): 1, 2, 4, 8, 16, 32, 60, 60, ...
        let waits: Vec<u64> = (1..=10)
            .map(|n| policy.rate_limit_backoff(n).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 16, 32, 60, 60, 60, 60]);

        // Monotonic and bounded
        for pair in waits.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(waits.iter().all(|&w| w <= 60));
    }

    #[test]
    fn test_rate_limit_backoff_never_overflows() {
        let policy = test_policy();
        assert_eq!(policy.rate_limit_backoff(u32::MAX).as_secs(), 60);
    }

    #[test]
    fn test_transient_backoff_sequence() {
        let policy = test_policy();
        assert_eq!(policy.transient_backoff(1).as_secs(), 2);
        assert_eq!(policy.transient_backoff(2).as_secs(), 4);
        assert_eq!(policy.transient_backoff(3).as_secs(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_retried_until_success() {
        let adapter = RetryingAdapter::new(
            ScriptedAdapter::new(vec![
                FetchFailure::RateLimited,
                FetchFailure::RateLimited,
                FetchFailure::RateLimited,
            ]),
            test_policy(),
        );

        let started = tokio::time::Instant::now();
        let result = adapter.fetch_listing("pol").await;

        assert!(result.is_ok());
        assert_eq!(adapter.inner.calls.load(Ordering::SeqCst), 4);
        // Waits of 1 + 2 + 4 seconds before the 4th attempt succeeds
        assert_eq!(started.elapsed().as_secs(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_propagates() {
        let adapter = RetryingAdapter::new(
            ScriptedAdapter::new(vec![
                FetchFailure::Transient("a".into()),
                FetchFailure::Transient("b".into()),
                FetchFailure::Transient("c".into()),
                FetchFailure::Transient("d".into()),
            ]),
            test_policy(),
        );

        let result = adapter.fetch_listing("pol").await;

        assert!(matches!(result, Err(FetchFailure::Transient(_))));
        // Initial call plus three retries
        assert_eq!(adapter.inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_recovers_within_budget() {
        let adapter = RetryingAdapter::new(
            ScriptedAdapter::new(vec![
                FetchFailure::Transient("a".into()),
                FetchFailure::Transient("b".into()),
            ]),
            test_policy(),
        );

        assert!(adapter.fetch_listing("pol").await.is_ok());
        assert_eq!(adapter.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_expired_reauth_then_retry() {
        let adapter = RetryingAdapter::new(
            ScriptedAdapter::new(vec![FetchFailure::AuthExpired]),
            test_policy(),
        );

        assert!(adapter.fetch_listing("worldnews").await.is_ok());
        assert_eq!(adapter.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.inner.reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_auth_failure_is_fatal() {
        let adapter = RetryingAdapter::new(
            ScriptedAdapter::new(vec![FetchFailure::AuthExpired, FetchFailure::AuthExpired]),
            test_policy(),
        );

        let result = adapter.fetch_listing("worldnews").await;

        assert!(matches!(result, Err(FetchFailure::AuthExpired)));
        assert_eq!(adapter.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.inner.reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let adapter = RetryingAdapter::new(
            ScriptedAdapter::new(vec![FetchFailure::Malformed("bad".into())]),
            test_policy(),
        );

        let result = adapter.fetch_listing("pol").await;

        assert!(matches!(result, Err(FetchFailure::Malformed(_))));
        assert_eq!(adapter.inner.calls.load(Ordering::SeqCst), 1);
    }
}
