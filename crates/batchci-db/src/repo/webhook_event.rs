//! Append-only audit log of inbound webhook deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub content: String,
    pub signature: Option<String>,
    pub remark: Option<String>,
}

#[async_trait]
pub trait WebhookEventRepo: Send + Sync {
    async fn append(
        &self,
        source: &str,
        content: &str,
        signature: Option<&str>,
    ) -> DbResult<WebhookEventRecord>;
    /// Record the outcome of processing. The only mutation an event allows.
    async fn set_remark(&self, id: i64, remark: &str) -> DbResult<()>;
    /// Events, newest first.
    async fn list(&self, limit: i64) -> DbResult<Vec<WebhookEventRecord>>;
}

/// PostgreSQL implementation of WebhookEventRepo.
pub struct PgWebhookEventRepo {
    pool: PgPool,
}

impl PgWebhookEventRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepo for PgWebhookEventRepo {
    async fn append(
        &self,
        source: &str,
        content: &str,
        signature: Option<&str>,
    ) -> DbResult<WebhookEventRecord> {
        let record = sqlx::query_as::<_, WebhookEventRecord>(
            r#"
            INSERT INTO webhook_events (created_at, source, content, signature)
            VALUES (NOW(), $1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(source)
        .bind(content)
        .bind(signature)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn set_remark(&self, id: i64, remark: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE webhook_events SET remark = $2 WHERE id = $1")
            .bind(id)
            .bind(remark)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("webhook event {}", id)));
        }
        Ok(())
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<WebhookEventRecord>> {
        let records = sqlx::query_as::<_, WebhookEventRecord>(
            "SELECT * FROM webhook_events ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
