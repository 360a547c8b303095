//! Persisted store for batch CI orchestration.
//!
//! Provides repository traits, PostgreSQL implementations and, behind the
//! `testing` feature, an in-memory implementation with the same semantics.

pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Handle bundling every repository behind one cloneable value.
#[derive(Clone)]
pub struct Store {
    pub builds: Arc<dyn BuildRepo>,
    pub test_runs: Arc<dyn TestRunRepo>,
    pub access_keys: Arc<dyn AccessKeyRepo>,
    pub webhook_events: Arc<dyn WebhookEventRepo>,
    pool: Option<PgPool>,
}

impl Store {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            builds: Arc::new(PgBuildRepo::new(pool.clone())),
            test_runs: Arc::new(PgTestRunRepo::new(pool.clone())),
            access_keys: Arc::new(PgAccessKeyRepo::new(pool.clone())),
            webhook_events: Arc::new(PgWebhookEventRepo::new(pool.clone())),
            pool: Some(pool),
        }
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self {
            builds: store.clone(),
            test_runs: store.clone(),
            access_keys: store.clone(),
            webhook_events: store,
            pool: None,
        }
    }

    /// Check the database answers.
    pub async fn ping(&self) -> DbResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }
}
