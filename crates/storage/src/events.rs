use serde_json::Value;
use uuid::Uuid;

use sift_core::{EventLevel, SiftError};

use crate::Storage;

/// One append-only audit record.
#[derive(Debug, Clone)]
pub struct EventDraft<'a> {
    pub api_key_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub event_type: &'a str,
    pub level: EventLevel,
    pub message: String,
    pub metadata: Value,
}

impl<'a> EventDraft<'a> {
    pub fn job(job_id: Uuid, event_type: &'a str, message: impl Into<String>) -> Self {
        Self {
            api_key_id: None,
            job_id: Some(job_id),
            event_type,
            level: EventLevel::Info,
            message: message.into(),
            metadata: Value::Null,
        }
    }

    pub fn level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl Storage {
    pub async fn record_event(&self, event: EventDraft<'_>) -> Result<(), SiftError> {
        let metadata = if event.metadata.is_null() {
            Value::Object(Default::default())
        } else {
            event.metadata
        };
        sqlx::query(
            r#"INSERT INTO events (api_key_id, job_id, event_type, level, message, metadata)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(event.api_key_id)
        .bind(event.job_id)
        .bind(event.event_type)
        .bind(event.level.as_str())
        .bind(&event.message)
        .bind(&metadata)
        .execute(self.pool())
        .await
        .map_err(SiftError::storage)?;
        Ok(())
    }

    pub async fn event_count(&self) -> Result<i64, SiftError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(self.pool())
            .await
            .map_err(SiftError::storage)?;
        Ok(row.0)
    }
}
