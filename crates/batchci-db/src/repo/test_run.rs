//! Test run and test case repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;

use crate::{DbError, DbResult};

/// A test run record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestRunRecord {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub build_id: String,
    pub live: bool,
    pub state: String,
    pub total_tests: i32,
    pub failed_tests: i32,
}

/// A test case record. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestCaseRecord {
    pub id: String,
    pub test_run_id: String,
    pub passed: bool,
    pub output: Option<String>,
    pub module: String,
    pub state: String,
    pub test_method: String,
    pub test_class: String,
    pub test_full_name: String,
    pub duration_seconds: i32,
}

#[derive(Debug, Clone)]
pub struct NewTestRun {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub build_id: String,
    pub live: bool,
    pub state: String,
}

/// Aggregates counted while walking a completed job's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionTotals {
    pub total: i32,
    pub failed: i32,
}

#[async_trait]
pub trait TestRunRepo: Send + Sync {
    async fn get(&self, id: &str) -> DbResult<Option<TestRunRecord>>;
    /// Test runs, newest first.
    async fn list(&self, limit: i64) -> DbResult<Vec<TestRunRecord>>;
    async fn list_for_build(&self, build_id: &str) -> DbResult<Vec<TestRunRecord>>;
    async fn latest_live_for_build(&self, build_id: &str) -> DbResult<Option<TestRunRecord>>;
    /// Record a newly scheduled run. A stale row with the same id is replaced.
    async fn register(&self, run: NewTestRun) -> DbResult<TestRunRecord>;
    async fn update_state(&self, id: &str, state: &str) -> DbResult<TestRunRecord>;
    async fn existing_case_ids(&self, id: &str) -> DbResult<HashSet<String>>;
    /// Mirror a completed job: insert the cases not yet present and store
    /// the totals, in one transaction.
    async fn record_completion(
        &self,
        id: &str,
        state: &str,
        totals: CompletionTotals,
        cases: Vec<TestCaseRecord>,
    ) -> DbResult<TestRunRecord>;
    async fn list_cases(&self, id: &str) -> DbResult<Vec<TestCaseRecord>>;
    /// Delete a test run, cascading to its cases.
    async fn delete(&self, id: &str) -> DbResult<()>;
}

/// PostgreSQL implementation of TestRunRepo.
pub struct PgTestRunRepo {
    pool: PgPool,
}

impl PgTestRunRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TestRunRepo for PgTestRunRepo {
    async fn get(&self, id: &str) -> DbResult<Option<TestRunRecord>> {
        let record = sqlx::query_as::<_, TestRunRecord>("SELECT * FROM test_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<TestRunRecord>> {
        let records = sqlx::query_as::<_, TestRunRecord>(
            "SELECT * FROM test_runs ORDER BY creation_time DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_for_build(&self, build_id: &str) -> DbResult<Vec<TestRunRecord>> {
        let records = sqlx::query_as::<_, TestRunRecord>(
            "SELECT * FROM test_runs WHERE build_id = $1 ORDER BY creation_time DESC",
        )
        .bind(build_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn latest_live_for_build(&self, build_id: &str) -> DbResult<Option<TestRunRecord>> {
        let record = sqlx::query_as::<_, TestRunRecord>(
            r#"
            SELECT * FROM test_runs
            WHERE build_id = $1 AND live
            ORDER BY creation_time DESC
            LIMIT 1
            "#,
        )
        .bind(build_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn register(&self, run: NewTestRun) -> DbResult<TestRunRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM test_runs WHERE id = $1")
            .bind(&run.id)
            .execute(&mut *tx)
            .await?;

        let record = sqlx::query_as::<_, TestRunRecord>(
            r#"
            INSERT INTO test_runs (id, creation_time, build_id, live, state, total_tests, failed_tests)
            VALUES ($1, $2, $3, $4, $5, 0, 0)
            RETURNING *
            "#,
        )
        .bind(&run.id)
        .bind(run.creation_time)
        .bind(&run.build_id)
        .bind(run.live)
        .bind(&run.state)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::from_write(e, format!("test run {}", run.id)))?;

        tx.commit().await?;
        Ok(record)
    }

    async fn update_state(&self, id: &str, state: &str) -> DbResult<TestRunRecord> {
        let record = sqlx::query_as::<_, TestRunRecord>(
            "UPDATE test_runs SET state = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(state)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("test run {}", id)))?;
        Ok(record)
    }

    async fn existing_case_ids(&self, id: &str) -> DbResult<HashSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM test_cases WHERE test_run_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn record_completion(
        &self,
        id: &str,
        state: &str,
        totals: CompletionTotals,
        cases: Vec<TestCaseRecord>,
    ) -> DbResult<TestRunRecord> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent reconciliations of the same run.
        let locked: Option<String> =
            sqlx::query_scalar("SELECT id FROM test_runs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(DbError::NotFound(format!("test run {}", id)));
        }

        let mut inserted = 0u64;
        for case in &cases {
            let result = sqlx::query(
                r#"
                INSERT INTO test_cases (id, test_run_id, passed, output, module, state,
                                        test_method, test_class, test_full_name, duration_seconds)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&case.id)
            .bind(id)
            .bind(case.passed)
            .bind(case.output.as_deref())
            .bind(&case.module)
            .bind(&case.state)
            .bind(&case.test_method)
            .bind(&case.test_class)
            .bind(&case.test_full_name)
            .bind(case.duration_seconds)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        let record = sqlx::query_as::<_, TestRunRecord>(
            r#"
            UPDATE test_runs SET state = $2, total_tests = $3, failed_tests = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(state)
        .bind(totals.total)
        .bind(totals.failed)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::from_write(e, format!("totals of test run {}", id)))?;

        tx.commit().await?;
        tracing::debug!(test_run_id = %id, inserted, skipped = cases.len() as u64 - inserted, "Recorded test cases");
        Ok(record)
    }

    async fn list_cases(&self, id: &str) -> DbResult<Vec<TestCaseRecord>> {
        let records = sqlx::query_as::<_, TestCaseRecord>(
            "SELECT * FROM test_cases WHERE test_run_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM test_runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("test run {}", id)));
        }
        Ok(())
    }
}
