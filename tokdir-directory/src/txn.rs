use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use tokdir_docstore::{DocumentStore, DocumentTransaction, StoreResult};
use tracing::{debug, trace, warn};

use crate::{DirectoryConfig, DirectoryError, metrics};

/// Read-modify-write body executed inside one optimistic transaction.
/// It may run several times; it must not have side effects outside `tx`.
#[async_trait]
pub trait TxnBody<T: DocumentTransaction>: Send + Sync {
    type Output: Send;

    async fn apply(&self, tx: &mut T) -> Result<Self::Output, DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_backoff_max_ms),
            call_timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }

    /// Exponential backoff with equal jitter, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let cap = self
            .backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let half = cap / 2;
        let jitter_us = rand::rng().random_range(0..=half.as_micros() as u64);
        half + Duration::from_micros(jitter_us)
    }
}

/// Runs transaction bodies against a store, retrying on conflict.
pub struct TxnRunner<S> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S: DocumentStore> TxnRunner<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `body` until it commits, fails with a non-conflict error,
    /// or the attempt budget runs out. Nothing is visible unless a commit
    /// succeeds.
    pub async fn run<B>(
        &self,
        op: &'static str,
        body: &B,
    ) -> Result<B::Output, DirectoryError>
    where
        B: TxnBody<S::Transaction>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(op, body).await {
                Ok(out) => {
                    if attempt > 1 {
                        debug!(op, attempt, "transaction committed after retry");
                    }
                    return Ok(out);
                }
                Err(e) if e.is_conflict() => {
                    if attempt >= self.policy.max_attempts {
                        metrics::inc_budget_exhausted(op);
                        warn!(op, attempts = attempt, "transaction retry budget exhausted");
                        return Err(DirectoryError::RetryBudgetExhausted {
                            op,
                            attempts: attempt,
                        });
                    }
                    metrics::inc_conflict_retry(op);
                    let backoff = self.policy.backoff_for(attempt);
                    trace!(
                        op,
                        attempt,
                        backoff_us = backoff.as_micros() as u64,
                        error = %e,
                        "transaction conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt<B>(
        &self,
        op: &'static str,
        body: &B,
    ) -> Result<B::Output, DirectoryError>
    where
        B: TxnBody<S::Transaction>,
    {
        let mut tx = self
            .bounded(op, "begin", self.store.begin_transaction())
            .await?;
        let applied =
            tokio::time::timeout(self.policy.call_timeout, body.apply(&mut tx))
                .await;
        let out = match applied {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                self.discard(op, tx).await;
                return Err(e);
            }
            Err(_) => {
                self.discard(op, tx).await;
                return Err(self.timed_out(op, "body"));
            }
        };
        self.bounded(op, "commit", tx.commit()).await?;
        Ok(out)
    }

    async fn bounded<F, O>(
        &self,
        op: &'static str,
        stage: &'static str,
        fut: F,
    ) -> Result<O, DirectoryError>
    where
        F: Future<Output = StoreResult<O>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, fut).await {
            Ok(res) => res.map_err(DirectoryError::from),
            Err(_) => Err(self.timed_out(op, stage)),
        }
    }

    async fn discard(&self, op: &'static str, tx: S::Transaction) {
        if let Err(e) = tx.rollback().await {
            debug!(op, error = %e, "rollback failed");
        }
    }

    fn timed_out(&self, op: &'static str, stage: &'static str) -> DirectoryError {
        warn!(op, stage, timeout_ms = self.policy.call_timeout.as_millis() as u64, "store call timed out");
        DirectoryError::StoreUnavailable(format!(
            "{} {} exceeded {:?}",
            op, stage, self.policy.call_timeout
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(base),
            max_backoff: Duration::from_millis(max),
            call_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let p = policy(4, 20);
        for _ in 0..50 {
            let first = p.backoff_for(1);
            assert!(first >= Duration::from_millis(2) && first <= Duration::from_millis(4));
            let third = p.backoff_for(3);
            assert!(third >= Duration::from_millis(8) && third <= Duration::from_millis(16));
            let late = p.backoff_for(40);
            assert!(late >= Duration::from_millis(10) && late <= Duration::from_millis(20));
        }
    }

    #[test]
    fn zero_backoff_stays_zero() {
        let p = policy(0, 0);
        assert_eq!(p.backoff_for(7), Duration::ZERO);
    }

    #[test]
    fn policy_from_config() {
        let conf = DirectoryConfig::default()
            .with_max_retry_attempts(7)
            .with_retry_backoff_ms(3, 30)
            .with_store_timeout_ms(250);
        let p = RetryPolicy::from_config(&conf);
        assert_eq!(p.max_attempts, 7);
        assert_eq!(p.backoff, Duration::from_millis(3));
        assert_eq!(p.max_backoff, Duration::from_millis(30));
        assert_eq!(p.call_timeout, Duration::from_millis(250));
    }
}
