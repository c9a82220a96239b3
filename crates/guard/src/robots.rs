use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use texting_robots::Robot;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use sift_core::config::RobotsConfig;

/// Cached policy for one host. `robot: None` means allow-all, used both
/// for hosts without a robots.txt and as the fail-open result.
struct Slot {
    expires_at: Instant,
    robot: Option<Arc<Robot>>,
}

/// Per-host robots.txt cache with TTL. Positive results live for
/// `ttl_seconds`; unreachable or non-200 hosts are cached as allow-all for
/// `negative_ttl_seconds` so failing hosts aren't hammered. Each host's
/// slot sits behind an async mutex, so concurrent lookups for the same
/// host coalesce into a single upstream fetch.
pub struct RobotsCache {
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    client: reqwest::Client,
    user_agent: String,
    ttl: Duration,
    negative_ttl: Duration,
    fetch_timeout: Duration,
}

impl RobotsCache {
    pub fn new(user_agent: &str, config: &RobotsConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            slots: DashMap::new(),
            client,
            user_agent: user_agent.to_string(),
            ttl: Duration::from_secs(config.ttl_seconds),
            negative_ttl: Duration::from_secs(config.negative_ttl_seconds),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_seconds),
        }
    }

    /// Whether the policy for `url`'s host allows fetching its path.
    /// Parse failures and fetch failures fail open.
    pub async fn allows(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        let origin = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        let slot = self
            .slots
            .entry(origin.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    expires_at: Instant::now(),
                    robot: None,
                }))
            })
            .clone();

        // First locker past the expiry refreshes; waiters see the fresh
        // entry once the lock is released.
        let mut slot = slot.lock().await;
        if Instant::now() >= slot.expires_at {
            let (robot, ttl) = self.fetch_policy(&origin).await;
            slot.robot = robot;
            slot.expires_at = Instant::now() + ttl;
        }

        match &slot.robot {
            Some(robot) => robot.allowed(url.as_str()),
            None => true,
        }
    }

    async fn fetch_policy(&self, origin: &str) -> (Option<Arc<Robot>>, Duration) {
        let robots_url = format!("{origin}/robots.txt");
        let resp = tokio::time::timeout(self.fetch_timeout, self.client.get(&robots_url).send()).await;

        let resp = match resp {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                debug!(url = %robots_url, "robots fetch failed: {e}");
                return (None, self.negative_ttl);
            }
            Err(_) => {
                debug!(url = %robots_url, "robots fetch timed out");
                return (None, self.negative_ttl);
            }
        };

        if !resp.status().is_success() {
            debug!(url = %robots_url, status = resp.status().as_u16(), "robots not available, allowing all");
            return (None, self.negative_ttl);
        }

        let body = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                debug!(url = %robots_url, "robots body read failed: {e}");
                return (None, self.negative_ttl);
            }
        };

        match Robot::new(&self.user_agent, &body) {
            Ok(robot) => (Some(Arc::new(robot)), self.ttl),
            Err(e) => {
                warn!(url = %robots_url, "robots parse failed, allowing all: {e}");
                (None, self.ttl)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_policy_denies_and_allows() {
        let txt = b"User-agent: *\nDisallow: /private/\nAllow: /private/ok\n";
        let robot = Robot::new("SiftBot", txt).unwrap();
        assert!(!robot.allowed("https://example.com/private/page"));
        assert!(robot.allowed("https://example.com/private/ok"));
        assert!(robot.allowed("https://example.com/public"));
    }

    #[test]
    fn disallow_all_blocks_root() {
        let txt = b"User-agent: *\nDisallow: /\n";
        let robot = Robot::new("SiftBot", txt).unwrap();
        assert!(!robot.allowed("https://example.com/"));
        assert!(!robot.allowed("https://example.com/any"));
    }
}
