use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use sift_core::SiftError;

mod events;
mod jobs;
mod keys;
mod pages;
mod row;

pub use events::EventDraft;
pub use jobs::JobPageEntry;
pub use keys::parse_key_id;

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self, SiftError> {
        Self::with_pool_size(database_url, 20).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self, SiftError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(SiftError::storage)?;

        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), SiftError> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await
            .map_err(SiftError::storage)?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<(), SiftError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SiftError::storage)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
