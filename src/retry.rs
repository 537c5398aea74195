use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::errors::SyncError;
use crate::phantasma_client::{
    AccountRecord, AppRecord, BlockRecord, ChainRecord, ChainRpc, TokenRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs `call` under the policy's timeout, retrying transport failures with backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, method: &str, mut call: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0;
    loop {
        let error = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(elapsed) => SyncError::unavailable(method, elapsed),
        };
        if !error.is_retryable() || attempt >= policy.max_retries {
            return Err(error);
        }
        let delay = policy.delay_for(attempt);
        log::warn!(
            "{} failed (attempt {}/{}), retrying in {:?}: {}",
            method,
            attempt + 1,
            policy.max_retries + 1,
            delay,
            error
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Wraps a [`ChainRpc`] so that every call has a timeout and bounded retries.
pub struct RetryingRpc<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ChainRpc> RetryingRpc<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> RetryingRpc<C> {
        RetryingRpc { inner, policy }
    }
}

#[async_trait]
impl<C: ChainRpc> ChainRpc for RetryingRpc<C> {
    async fn get_apps(&self) -> Result<Vec<AppRecord>, SyncError> {
        with_retry(&self.policy, "getApps", || self.inner.get_apps()).await
    }

    async fn get_tokens(&self) -> Result<Vec<TokenRecord>, SyncError> {
        with_retry(&self.policy, "getTokens", || self.inner.get_tokens()).await
    }

    async fn get_chains(&self) -> Result<Vec<ChainRecord>, SyncError> {
        with_retry(&self.policy, "getChains", || self.inner.get_chains()).await
    }

    async fn get_block_height(&self, chain_address: &str) -> Result<i64, SyncError> {
        with_retry(&self.policy, "getBlockHeight", || {
            self.inner.get_block_height(chain_address)
        })
        .await
    }

    async fn get_block_by_height(
        &self,
        chain_address: &str,
        height: i64,
    ) -> Result<BlockRecord, SyncError> {
        with_retry(&self.policy, "getBlockByHeight", || {
            self.inner.get_block_by_height(chain_address, height)
        })
        .await
    }

    async fn get_account(&self, address: &str) -> Result<AccountRecord, SyncError> {
        with_retry(&self.policy, "getAccount", || self.inner.get_account(address)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_for_doubles_up_to_max() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "getChains", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::unavailable("getChains", "connection refused"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), SyncError> = with_retry(&fast_policy(), "getChains", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::unavailable("getChains", "connection refused"))
        })
        .await;
        assert!(matches!(result, Err(SyncError::RpcUnavailable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_responses_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), SyncError> = with_retry(&fast_policy(), "getAccount", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::malformed("getAccount", "missing result"))
        })
        .await;
        assert!(matches!(result, Err(SyncError::RpcMalformedResponse { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hanging_calls_time_out() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(5),
            max_retries: 1,
            ..fast_policy()
        };
        let attempts = AtomicU32::new(0);
        let result = with_retry(&policy, "getBlockHeight", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(result, Err(SyncError::RpcUnavailable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
