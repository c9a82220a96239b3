use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Coalesce concurrent computations for the same key. The first caller
/// runs the work; callers arriving while it is in flight await the same
/// cell and receive a clone of the outcome. The entry is removed once the
/// flight completes, so later calls start fresh.
pub struct SingleFlight<T: Clone> {
    inflight: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self { inflight: DashMap::new() }
    }

    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut led = false;
        let value = cell
            .get_or_init(|| {
                led = true;
                work()
            })
            .await
            .clone();

        if led {
            self.inflight.remove(key);
        }
        value
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let flight = Arc::new(SingleFlight::<u64>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = Arc::clone(&flight);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flight
                    .run("https-example-com", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        42u64
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(flight.is_empty());
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let flight = SingleFlight::<&'static str>::new();
        let a = flight.run("a", || async { "a" }).await;
        let b = flight.run("b", || async { "b" }).await;
        assert_eq!((a, b), ("a", "b"));
    }

    #[tokio::test]
    async fn entry_is_removed_after_completion() {
        let flight = SingleFlight::<u32>::new();
        let first = flight.run("k", || async { 1 }).await;
        // A later call is a fresh flight, not the cached value.
        let second = flight.run("k", || async { 2 }).await;
        assert_eq!((first, second), (1, 2));
    }
}
