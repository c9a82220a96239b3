use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use sift_core::config::FetchConfig;
use sift_core::{FetchOptions, FetchOutcome, Renderer, SiftError};
use sift_guard::ensure_public_address;

/// Plain HTTP fetcher. Redirects are never delegated to the client:
/// every hop is followed by hand so the SSRF check runs against each
/// Location target before it is contacted.
pub struct StaticClient {
    client: reqwest::Client,
    redirect_limit: u32,
    retry_attempts: u32,
    retry_base: Duration,
}

impl StaticClient {
    pub fn new(config: &FetchConfig, user_agent: &str) -> Result<Self, SiftError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| SiftError::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            redirect_limit: config.redirect_limit,
            retry_attempts: config.retry_attempts.max(1),
            retry_base: Duration::from_secs(config.retry_base_delay_seconds),
        })
    }

    pub async fn fetch(&self, url: &Url, opts: &FetchOptions) -> Result<FetchOutcome, SiftError> {
        let deadline = Instant::now() + opts.timeout;
        let mut last_err = SiftError::Fetch("no fetch attempt ran".into());

        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.retry_base, attempt);
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining <= delay {
                    return Err(SiftError::FetchTimeout(opts.timeout.as_secs()));
                }
                debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                tokio::time::sleep(delay).await;
            }

            match self.fetch_once(url, opts, deadline).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    if !attempt_is_retriable(&err) {
                        return Err(err);
                    }
                    warn!(url = %url, attempt, "fetch attempt failed: {err}");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn fetch_once(
        &self,
        url: &Url,
        opts: &FetchOptions,
        deadline: Instant,
    ) -> Result<FetchOutcome, SiftError> {
        let started = Instant::now();
        let mut current = url.clone();

        for _hop in 0..=self.redirect_limit {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SiftError::FetchTimeout(opts.timeout.as_secs()));
            }

            let resp = tokio::time::timeout(remaining, self.client.get(current.as_str()).send())
                .await
                .map_err(|_| SiftError::FetchTimeout(opts.timeout.as_secs()))?
                .map_err(|e| {
                    if e.is_timeout() {
                        SiftError::FetchTimeout(opts.timeout.as_secs())
                    } else {
                        SiftError::Fetch(e.to_string())
                    }
                })?;

            let status = resp.status();
            if status.is_redirection() {
                let Some(location) = resp.headers().get(reqwest::header::LOCATION) else {
                    // Redirect status without a target: hand the body back.
                    return self.finish(current, resp, started, opts).await;
                };
                let location = location
                    .to_str()
                    .map_err(|_| SiftError::Fetch("redirect location is not valid UTF-8".into()))?;
                let next = current
                    .join(location)
                    .map_err(|e| SiftError::Fetch(format!("bad redirect target {location}: {e}")))?;
                match next.scheme() {
                    "http" | "https" => {}
                    other => return Err(SiftError::Fetch(format!("redirect to unsupported scheme {other}"))),
                }
                // A redirect that lands on a blocked address fails the
                // fetch; it is never followed transparently.
                ensure_public_address(&next).await?;
                debug!(from = %current, to = %next, "following redirect");
                current = next;
                continue;
            }

            if status.as_u16() >= 400 {
                return Err(SiftError::UpstreamHttp(status.as_u16()));
            }
            return self.finish(current, resp, started, opts).await;
        }
        Err(SiftError::Fetch(format!("more than {} redirects", self.redirect_limit)))
    }

    async fn finish(
        &self,
        final_url: Url,
        resp: reqwest::Response,
        started: Instant,
        opts: &FetchOptions,
    ) -> Result<FetchOutcome, SiftError> {
        let status = resp.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| SiftError::Fetch(format!("body read failed: {e}")))?;
        if body.len() > opts.max_body_size {
            return Err(SiftError::Fetch(format!(
                "body too large: {} bytes (max {})",
                body.len(),
                opts.max_body_size
            )));
        }

        Ok(FetchOutcome {
            status,
            final_url,
            headers,
            body: body.to_vec(),
            renderer: Renderer::Static,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Connection errors and 5xx (plus 408/429) are retried with backoff;
/// other 4xx surface immediately.
fn attempt_is_retriable(err: &SiftError) -> bool {
    match err {
        SiftError::Fetch(_) => true,
        SiftError::UpstreamHttp(status) => {
            *status >= 500
                || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
        }
        _ => false,
    }
}

/// 2s, 4s, 8s, ... before attempt 1, 2, 3, ...
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn retry_classification() {
        assert!(attempt_is_retriable(&SiftError::Fetch("connection refused".into())));
        assert!(attempt_is_retriable(&SiftError::UpstreamHttp(500)));
        assert!(attempt_is_retriable(&SiftError::UpstreamHttp(503)));
        assert!(attempt_is_retriable(&SiftError::UpstreamHttp(408)));
        assert!(attempt_is_retriable(&SiftError::UpstreamHttp(429)));
        assert!(!attempt_is_retriable(&SiftError::UpstreamHttp(404)));
        assert!(!attempt_is_retriable(&SiftError::UpstreamHttp(401)));
        assert!(!attempt_is_retriable(&SiftError::FetchTimeout(20)));
        assert!(!attempt_is_retriable(&SiftError::SsrfBlocked("127.0.0.1".into())));
    }
}
