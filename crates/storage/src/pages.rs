use chrono::Utc;

use sift_core::{Page, SiftError};

use crate::row::{PageRow, PAGE_COLUMNS};
use crate::Storage;

impl Storage {
    /// Cache probe. Returns the row for `url_hash` when it exists and its
    /// `fetched_at` is within `ttl_seconds`; `None` TTL means no cap.
    pub async fn probe_page(
        &self,
        url_hash: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<Option<Page>, SiftError> {
        let query = format!("SELECT {PAGE_COLUMNS} FROM pages WHERE url_hash = $1");
        let row: Option<PageRow> = sqlx::query_as(&query)
            .bind(url_hash)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;

        let Some(row) = row else { return Ok(None) };
        if let Some(ttl) = ttl_seconds {
            let age = Utc::now().signed_duration_since(row.fetched_at).num_seconds();
            if age >= ttl {
                return Ok(None);
            }
        }
        Ok(Some(row.try_into()?))
    }

    /// Upsert by `url_hash`, last writer wins. Returns the stored row with
    /// its persistent id (which may predate this write).
    pub async fn store_page(&self, page: &Page) -> Result<Page, SiftError> {
        let query = format!(
            r#"INSERT INTO pages (url, canonical_url, url_hash, content_hash, status_code, title, description, markdown, raw_html, renderer, links_internal, links_external, word_count, fetch_duration_ms, fetched_at, error_code, error_message)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
               ON CONFLICT (url_hash) DO UPDATE SET
                   url = EXCLUDED.url,
                   canonical_url = EXCLUDED.canonical_url,
                   content_hash = EXCLUDED.content_hash,
                   status_code = EXCLUDED.status_code,
                   title = EXCLUDED.title,
                   description = EXCLUDED.description,
                   markdown = EXCLUDED.markdown,
                   raw_html = EXCLUDED.raw_html,
                   renderer = EXCLUDED.renderer,
                   links_internal = EXCLUDED.links_internal,
                   links_external = EXCLUDED.links_external,
                   word_count = EXCLUDED.word_count,
                   fetch_duration_ms = EXCLUDED.fetch_duration_ms,
                   fetched_at = EXCLUDED.fetched_at,
                   error_code = EXCLUDED.error_code,
                   error_message = EXCLUDED.error_message
               RETURNING {PAGE_COLUMNS}"#
        );
        let row: PageRow = sqlx::query_as(&query)
            .bind(&page.url)
            .bind(&page.canonical_url)
            .bind(&page.url_hash)
            .bind(&page.content_hash)
            .bind(page.status_code)
            .bind(&page.title)
            .bind(&page.description)
            .bind(&page.markdown)
            .bind(&page.raw_html)
            .bind(page.renderer.as_str())
            .bind(&page.links_internal)
            .bind(&page.links_external)
            .bind(page.word_count)
            .bind(page.fetch_duration_ms)
            .bind(page.fetched_at)
            .bind(&page.error_code)
            .bind(&page.error_message)
            .fetch_one(self.pool())
            .await
            .map_err(SiftError::storage)?;
        row.try_into()
    }

    /// Secondary reuse path: a page whose normalized Markdown is already
    /// cached under another URL.
    pub async fn lookup_page_by_content(&self, content_hash: &str) -> Result<Option<Page>, SiftError> {
        let query = format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE content_hash = $1 ORDER BY fetched_at DESC LIMIT 1"
        );
        let row: Option<PageRow> = sqlx::query_as(&query)
            .bind(content_hash)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;
        row.map(Page::try_from).transpose()
    }

    pub async fn page_count(&self) -> Result<i64, SiftError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages")
            .fetch_one(self.pool())
            .await
            .map_err(SiftError::storage)?;
        Ok(row.0)
    }
}
