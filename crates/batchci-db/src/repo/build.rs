//! Build repository.

use async_trait::async_trait;
use batchci_core::source::Commit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Local state of a build before any remote job was observed.
pub const INIT_STATE: &str = "init";

/// A build record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildRecord {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub state: String,
    pub commit_author: Option<String>,
    pub commit_message: Option<String>,
    pub commit_date: Option<DateTime<Utc>>,
    pub commit_url: Option<String>,
    pub build_download_url: Option<String>,
    pub suppressed: bool,
}

/// Commit metadata copied onto a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: Option<String>,
    pub message: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl From<&Commit> for CommitInfo {
    fn from(commit: &Commit) -> Self {
        Self {
            author: commit.author.clone(),
            message: commit.message.clone(),
            date: commit.date,
            url: commit.html_url.clone(),
        }
    }
}

/// Everything one build sync writes.
///
/// Commit metadata always overwrites. `state` and `build_download_url` only
/// overwrite when present.
#[derive(Debug, Clone)]
pub struct BuildSync {
    pub id: String,
    pub commit: CommitInfo,
    pub state: Option<String>,
    pub build_download_url: Option<String>,
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    async fn get(&self, id: &str) -> DbResult<Option<BuildRecord>>;
    /// Builds newest commit first.
    async fn list(&self, include_suppressed: bool, limit: i64) -> DbResult<Vec<BuildRecord>>;
    /// Insert or update a build in a single atomic statement.
    async fn upsert_sync(&self, sync: BuildSync) -> DbResult<BuildRecord>;
    /// Insert a build observed from a remote job unless one already exists.
    async fn insert_observed(
        &self,
        id: &str,
        creation_time: DateTime<Utc>,
        state: &str,
    ) -> DbResult<BuildRecord>;
    async fn set_suppressed(&self, id: &str, suppressed: bool) -> DbResult<()>;
    /// Delete a build, cascading to its test runs and their cases.
    async fn delete(&self, id: &str) -> DbResult<()>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn get(&self, id: &str) -> DbResult<Option<BuildRecord>> {
        let record = sqlx::query_as::<_, BuildRecord>("SELECT * FROM builds WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(&self, include_suppressed: bool, limit: i64) -> DbResult<Vec<BuildRecord>> {
        let records = sqlx::query_as::<_, BuildRecord>(
            r#"
            SELECT * FROM builds
            WHERE $1 OR NOT suppressed
            ORDER BY commit_date DESC NULLS LAST, creation_time DESC
            LIMIT $2
            "#,
        )
        .bind(include_suppressed)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn upsert_sync(&self, sync: BuildSync) -> DbResult<BuildRecord> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            INSERT INTO builds (id, creation_time, state, commit_author, commit_message,
                                commit_date, commit_url, build_download_url, suppressed)
            VALUES ($1, NOW(), COALESCE($2, 'init'), $3, $4, $5, $6, $7, FALSE)
            ON CONFLICT (id) DO UPDATE SET
                state = COALESCE($2, builds.state),
                commit_author = EXCLUDED.commit_author,
                commit_message = EXCLUDED.commit_message,
                commit_date = EXCLUDED.commit_date,
                commit_url = EXCLUDED.commit_url,
                build_download_url = COALESCE($7, builds.build_download_url)
            RETURNING *
            "#,
        )
        .bind(&sync.id)
        .bind(sync.state.as_deref())
        .bind(sync.commit.author.as_deref())
        .bind(sync.commit.message.as_deref())
        .bind(sync.commit.date)
        .bind(sync.commit.url.as_deref())
        .bind(sync.build_download_url.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_observed(
        &self,
        id: &str,
        creation_time: DateTime<Utc>,
        state: &str,
    ) -> DbResult<BuildRecord> {
        sqlx::query(
            r#"
            INSERT INTO builds (id, creation_time, state, suppressed)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(creation_time)
        .bind(state)
        .execute(&self.pool)
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn set_suppressed(&self, id: &str, suppressed: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE builds SET suppressed = $2 WHERE id = $1")
            .bind(id)
            .bind(suppressed)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", id)));
        }
        Ok(())
    }
}
