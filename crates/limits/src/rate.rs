use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use sift_core::SiftError;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter over the last 60 seconds, one window per API
/// key. Each key's timestamps sit behind a mutex so a burst from a single
/// key serializes its increments and never admits above the limit.
pub struct RateLimiter {
    windows: DashMap<Uuid, Arc<Mutex<VecDeque<Instant>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    /// Admit one request for `key_id` against `limit` requests/minute.
    /// On rejection the error carries the age-out time of the oldest
    /// in-window entry as the retry-after hint.
    pub async fn check(&self, key_id: Uuid, limit: i32) -> Result<(), SiftError> {
        let window = self
            .windows
            .entry(key_id)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone();

        let mut entries = window.lock().await;
        let now = Instant::now();
        while let Some(front) = entries.front() {
            if now.duration_since(*front) >= WINDOW {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= limit.max(0) as usize {
            let retry_after = entries
                .front()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(WINDOW);
            return Err(SiftError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        entries.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let key = Uuid::new_v4();
        assert!(limiter.check(key, 2).await.is_ok());
        assert!(limiter.check(key, 2).await.is_ok());
        let err = limiter.check(key, 2).await.unwrap_err();
        match err {
            SiftError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keys_do_not_share_windows() {
        let limiter = RateLimiter::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(limiter.check(a, 1).await.is_ok());
        assert!(limiter.check(a, 1).await.is_err());
        assert!(limiter.check(b, 1).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_burst_never_overshoots() {
        let limiter = Arc::new(RateLimiter::new());
        let key = Uuid::new_v4();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.check(key, 5).await.is_ok() }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn zero_limit_rejects_everything() {
        let limiter = RateLimiter::new();
        assert!(limiter.check(Uuid::new_v4(), 0).await.is_err());
    }
}
