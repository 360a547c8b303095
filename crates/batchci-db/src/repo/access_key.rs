//! Access keys issued to webhook callers.

use async_trait::async_trait;
use batchci_core::secret::{Secret, secrets_match};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// An access key. Either value authenticates, so one can be rotated while
/// callers still use the other.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessKeyRecord {
    pub name: String,
    pub key1: String,
    pub key2: String,
    pub remark: Option<String>,
}

impl AccessKeyRecord {
    pub fn values(&self) -> [&str; 2] {
        [&self.key1, &self.key2]
    }

    /// Constant-time check of a provided value against both keys.
    pub fn accepts(&self, provided: &str) -> bool {
        let first = secrets_match(&self.key1, provided);
        let second = secrets_match(&self.key2, provided);
        first | second
    }
}

impl std::fmt::Debug for AccessKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeyRecord")
            .field("name", &self.name)
            .field("remark", &self.remark)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait AccessKeyRepo: Send + Sync {
    /// Create a key with two freshly generated values.
    async fn create(&self, name: &str, remark: Option<&str>) -> DbResult<AccessKeyRecord>;
    async fn get(&self, name: &str) -> DbResult<Option<AccessKeyRecord>>;
    async fn list(&self) -> DbResult<Vec<AccessKeyRecord>>;
    /// Replace both values with fresh ones.
    async fn rotate(&self, name: &str) -> DbResult<AccessKeyRecord>;
    async fn delete(&self, name: &str) -> DbResult<()>;
}

/// PostgreSQL implementation of AccessKeyRepo.
pub struct PgAccessKeyRepo {
    pool: PgPool,
}

impl PgAccessKeyRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessKeyRepo for PgAccessKeyRepo {
    async fn create(&self, name: &str, remark: Option<&str>) -> DbResult<AccessKeyRecord> {
        let record = sqlx::query_as::<_, AccessKeyRecord>(
            r#"
            INSERT INTO access_keys (name, key1, key2, remark)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(Secret::generate().expose())
        .bind(Secret::generate().expose())
        .bind(remark)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_write(e, format!("access key {}", name)))?;
        Ok(record)
    }

    async fn get(&self, name: &str) -> DbResult<Option<AccessKeyRecord>> {
        let record =
            sqlx::query_as::<_, AccessKeyRecord>("SELECT * FROM access_keys WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn list(&self) -> DbResult<Vec<AccessKeyRecord>> {
        let records = sqlx::query_as::<_, AccessKeyRecord>("SELECT * FROM access_keys ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn rotate(&self, name: &str) -> DbResult<AccessKeyRecord> {
        let record = sqlx::query_as::<_, AccessKeyRecord>(
            "UPDATE access_keys SET key1 = $2, key2 = $3 WHERE name = $1 RETURNING *",
        )
        .bind(name)
        .bind(Secret::generate().expose())
        .bind(Secret::generate().expose())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("access key {}", name)))?;
        Ok(record)
    }

    async fn delete(&self, name: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM access_keys WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("access key {}", name)));
        }
        Ok(())
    }
}
