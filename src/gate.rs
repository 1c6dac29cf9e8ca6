//! Single-flight exclusion between a full-index clear and everything else.
//!
//! Ingestion and queries hold a shared guard for their whole run; a clear
//! holds the exclusive guard, so it waits for in-flight store writes and
//! new work waits for the clear. Waiting is bounded: past the configured
//! budget the caller gets [`RagError::StoreBusy`] and should retry.
//!
//! The gate also bounds individual store calls: [`IndexGate::timed`] turns a
//! stalled backend into [`RagError::Timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::RagError;

#[derive(Clone)]
pub struct IndexGate {
    lock: Arc<RwLock<()>>,
    busy_after: Duration,
    store_timeout: Duration,
}

/// Held by ingestion and queries.
pub type SharedGuard = OwnedRwLockReadGuard<()>;
/// Held by a clear.
pub type ExclusiveGuard = OwnedRwLockWriteGuard<()>;

impl IndexGate {
    pub fn new(busy_after: Duration, store_timeout: Duration) -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            busy_after,
            store_timeout,
        }
    }

    pub async fn shared(&self) -> Result<SharedGuard, RagError> {
        tokio::time::timeout(self.busy_after, self.lock.clone().read_owned())
            .await
            .map_err(|_| RagError::StoreBusy)
    }

    /// Tokio's `RwLock` is write-preferring: once a clear is queued, new
    /// shared acquisitions wait behind it.
    pub async fn exclusive(&self) -> Result<ExclusiveGuard, RagError> {
        tokio::time::timeout(self.busy_after, self.lock.clone().write_owned())
            .await
            .map_err(|_| RagError::StoreBusy)
    }

    /// Run one vector store call under the store timeout.
    pub async fn timed<T>(
        &self,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, RagError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(RagError::from),
            Err(_) => Err(RagError::Timeout {
                service: "vector store",
                after: self.store_timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_guards_coexist() {
        let gate = IndexGate::new(Duration::from_millis(50), Duration::from_secs(1));
        let _a = gate.shared().await.unwrap();
        let _b = gate.shared().await.unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_shared_then_reports_busy() {
        let gate = IndexGate::new(Duration::from_millis(50), Duration::from_secs(1));
        let held = gate.shared().await.unwrap();
        assert!(matches!(gate.exclusive().await, Err(RagError::StoreBusy)));
        drop(held);
        assert!(gate.exclusive().await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_rejected_while_clear_in_progress() {
        let gate = IndexGate::new(Duration::from_millis(50), Duration::from_secs(1));
        let clear = gate.exclusive().await.unwrap();
        assert!(matches!(gate.shared().await, Err(RagError::StoreBusy)));
        drop(clear);
        assert!(gate.shared().await.is_ok());
    }

    #[tokio::test]
    async fn test_exclusive_waits_when_within_budget() {
        let gate = IndexGate::new(Duration::from_secs(2), Duration::from_secs(1));
        let held = gate.shared().await.unwrap();
        let g = gate.clone();
        let clear = tokio::spawn(async move { g.exclusive().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(clear.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_timed_store_call_reports_timeout() {
        let gate = IndexGate::new(Duration::from_millis(50), Duration::from_millis(30));
        let stalled = gate
            .timed(std::future::pending::<anyhow::Result<usize>>())
            .await;
        match stalled {
            Err(RagError::Timeout { service, after }) => {
                assert_eq!(service, "vector store");
                assert_eq!(after, Duration::from_millis(30));
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert_eq!(gate.timed(async { Ok(7usize) }).await.unwrap(), 7);
    }
}
