use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use sift_core::{
    config::SearchConfig, ApiKeyRecord, Page, ScrapeRequest, SearchHit, SearchKind, SearchProvider,
    SiftError,
};
use sift_limits::RateLimiter;
use sift_pipeline::ScrapeCoordinator;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_num_results")]
    pub num_results: u32,
    #[serde(default)]
    pub scrape_top_n: u32,
    #[serde(default)]
    pub search_type: SearchKind,
}

fn default_num_results() -> u32 {
    10
}

impl SearchRequest {
    pub fn validate(&self) -> Result<(), SiftError> {
        if self.query.trim().is_empty() {
            return Err(SiftError::Validation("query must not be empty".into()));
        }
        if self.num_results == 0 || self.num_results > 50 {
            return Err(SiftError::Validation("num_results must be 1-50".into()));
        }
        if self.scrape_top_n > self.num_results {
            return Err(SiftError::Validation("scrape_top_n cannot exceed num_results".into()));
        }
        Ok(())
    }
}

/// One ranked result; the top N carry a scraped page.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub rank: u32,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

/// Synchronous search: rank via the provider, then optionally scrape the
/// top N results inline through the regular pipeline.
pub struct SearchService {
    provider: Arc<dyn SearchProvider>,
    coordinator: Arc<ScrapeCoordinator>,
    limiter: Arc<RateLimiter>,
}

impl SearchService {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        coordinator: Arc<ScrapeCoordinator>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { provider, coordinator, limiter }
    }

    pub async fn search(
        &self,
        api_key: &ApiKeyRecord,
        req: &SearchRequest,
    ) -> Result<Vec<SearchResultItem>, SiftError> {
        if !api_key.has_scope(sift_core::Scope::Search) {
            return Err(SiftError::Forbidden("key lacks the search scope".into()));
        }
        req.validate()?;
        self.limiter.check(api_key.id, api_key.rate_limit).await?;

        let hits = self
            .provider
            .search(req.query.trim(), req.num_results, req.search_type)
            .await?;
        debug!(query = %req.query, hits = hits.len(), "search results");

        let mut items: Vec<SearchResultItem> = hits
            .into_iter()
            .map(|hit| SearchResultItem {
                rank: hit.rank,
                title: hit.title,
                url: hit.url,
                snippet: hit.snippet,
                page: None,
            })
            .collect();

        // Scrape failures degrade that result to rank-only; the search
        // itself still succeeds.
        for item in items.iter_mut().take(req.scrape_top_n as usize) {
            let scrape = ScrapeRequest::new(&item.url);
            match self.coordinator.scrape_admitted(&scrape).await {
                Ok(outcome) => item.page = Some(outcome.page),
                Err(err) => {
                    warn!(url = %item.url, "scrape of search result failed: {err}");
                }
            }
        }

        Ok(items)
    }
}

/// JSON-over-HTTP search provider. Speaks a serper-style API: POST the
/// query, read ranked organic results.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearchProvider {
    pub fn new(config: &SearchConfig) -> Result<Self, SiftError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SiftError::Internal(format!("search client build failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(
        &self,
        query: &str,
        num_results: u32,
        kind: SearchKind,
    ) -> Result<Vec<SearchHit>, SiftError> {
        if self.endpoint.is_empty() {
            return Err(SiftError::Internal("no search provider endpoint configured".into()));
        }

        let kind = match kind {
            SearchKind::Web => "search",
            SearchKind::News => "news",
        };
        let body = json!({ "q": query, "num": num_results, "type": kind });

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SiftError::Fetch(format!("search provider unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiftError::UpstreamHttp(status.as_u16()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SiftError::Fetch(format!("bad search provider response: {e}")))?;
        Ok(parse_provider_results(&payload, num_results))
    }
}

/// Pull ranked hits out of a provider payload. Accepts both `organic`
/// (serper-style) and `results` arrays.
pub fn parse_provider_results(payload: &Value, limit: u32) -> Vec<SearchHit> {
    let entries = payload
        .get("organic")
        .or_else(|| payload.get("results"))
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let url = entry
                .get("link")
                .or_else(|| entry.get("url"))
                .and_then(Value::as_str)?;
            let title = entry.get("title").and_then(Value::as_str).unwrap_or(url);
            let snippet = entry
                .get("snippet")
                .or_else(|| entry.get("description"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some((title.to_string(), url.to_string(), snippet))
        })
        .take(limit as usize)
        .enumerate()
        .map(|(i, (title, url, snippet))| SearchHit {
            title,
            url,
            snippet,
            rank: i as u32 + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serper_style_payloads() {
        let payload = json!({
            "organic": [
                { "title": "First", "link": "https://a.example/1", "snippet": "one" },
                { "title": "Second", "link": "https://b.example/2" },
                { "link": "https://c.example/3" },
            ]
        });
        let hits = parse_provider_results(&payload, 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].title, "First");
        assert_eq!(hits[1].snippet, None);
        // Title falls back to the URL.
        assert_eq!(hits[2].title, "https://c.example/3");
    }

    #[test]
    fn parses_generic_results_and_honors_limit() {
        let payload = json!({
            "results": [
                { "title": "A", "url": "https://a.example/", "description": "da" },
                { "title": "B", "url": "https://b.example/" },
                { "title": "C", "url": "https://c.example/" },
            ]
        });
        let hits = parse_provider_results(&payload, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet.as_deref(), Some("da"));
    }

    #[test]
    fn empty_or_malformed_payloads_yield_nothing() {
        assert!(parse_provider_results(&json!({}), 10).is_empty());
        assert!(parse_provider_results(&json!({"organic": "nope"}), 10).is_empty());
    }

    #[test]
    fn request_validation_bounds() {
        let mut req = SearchRequest {
            query: "rust crawler".into(),
            num_results: 10,
            scrape_top_n: 3,
            search_type: SearchKind::Web,
        };
        assert!(req.validate().is_ok());
        req.scrape_top_n = 11;
        assert!(req.validate().is_err());
        req.scrape_top_n = 0;
        req.query = "  ".into();
        assert!(req.validate().is_err());
    }
}
