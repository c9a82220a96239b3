use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use sift_core::SiftError;

/// Process-global bound on concurrent fetches per host. Waiters queue in
/// FIFO order (tokio semaphores are fair) and a cancelled waiter never
/// consumes a slot. Both the scrape coordinator and the crawler acquire
/// from the same governor.
pub struct DomainGovernor {
    hosts: DashMap<String, Arc<Semaphore>>,
    capacity: usize,
}

impl DomainGovernor {
    pub fn new(capacity: usize) -> Self {
        Self {
            hosts: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Acquire a slot for `host`, waiting at most `timeout`. A wait that
    /// outlives the caller's per-page budget surfaces `FETCH_TIMEOUT`.
    pub async fn acquire(&self, host: &str, timeout: Duration) -> Result<OwnedSemaphorePermit, SiftError> {
        let semaphore = self
            .hosts
            .entry(host.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(Semaphore::new(self.capacity)))
            .clone();

        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(SiftError::Internal("domain governor semaphore closed".into())),
            Err(_) => Err(SiftError::FetchTimeout(timeout.as_secs())),
        }
    }

    /// Slots currently available for a host (full capacity if unseen).
    pub fn available(&self, host: &str) -> usize {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .map(|s| s.available_permits())
            .unwrap_or(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_concurrency_per_host() {
        let governor = DomainGovernor::new(2);
        let a = governor.acquire("example.com", Duration::from_secs(1)).await.unwrap();
        let _b = governor.acquire("example.com", Duration::from_secs(1)).await.unwrap();
        assert_eq!(governor.available("example.com"), 0);

        // Third acquire times out while both slots are held.
        let err = governor
            .acquire("example.com", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SiftError::FetchTimeout(_)));

        // Releasing a slot unblocks the next waiter.
        drop(a);
        let _c = governor.acquire("example.com", Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn hosts_are_independent() {
        let governor = DomainGovernor::new(1);
        let _a = governor.acquire("a.com", Duration::from_secs(1)).await.unwrap();
        let _b = governor.acquire("b.com", Duration::from_secs(1)).await.unwrap();
        assert_eq!(governor.available("a.com"), 0);
        assert_eq!(governor.available("b.com"), 0);
        assert_eq!(governor.available("unseen.com"), 1);
    }

    #[tokio::test]
    async fn host_casing_is_insignificant() {
        let governor = DomainGovernor::new(1);
        let _a = governor.acquire("Example.COM", Duration::from_secs(1)).await.unwrap();
        let err = governor
            .acquire("example.com", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SiftError::FetchTimeout(_)));
    }
}
