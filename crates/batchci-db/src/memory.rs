//! In-memory store with the uniqueness, cascade and transactional semantics
//! of the PostgreSQL schema.

use async_trait::async_trait;
use batchci_core::secret::Secret;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use crate::repo::build::INIT_STATE;
use crate::{
    AccessKeyRecord, AccessKeyRepo, BuildRecord, BuildRepo, BuildSync, CompletionTotals, DbError,
    DbResult, NewTestRun, TestCaseRecord, TestRunRecord, TestRunRepo, WebhookEventRecord,
    WebhookEventRepo,
};

#[derive(Default)]
struct MemoryState {
    builds: BTreeMap<String, BuildRecord>,
    test_runs: BTreeMap<String, TestRunRecord>,
    test_cases: BTreeMap<String, TestCaseRecord>,
    access_keys: BTreeMap<String, AccessKeyRecord>,
    webhook_events: Vec<WebhookEventRecord>,
}

impl MemoryState {
    fn delete_test_run(&mut self, id: &str) -> bool {
        let existed = self.test_runs.remove(id).is_some();
        self.test_cases.retain(|_, case| case.test_run_id != id);
        existed
    }
}

/// Every write holds the lock for its whole duration, so each operation is
/// atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn get(&self, id: &str) -> DbResult<Option<BuildRecord>> {
        Ok(self.state.read().await.builds.get(id).cloned())
    }

    async fn list(&self, include_suppressed: bool, limit: i64) -> DbResult<Vec<BuildRecord>> {
        let state = self.state.read().await;
        let mut builds: Vec<BuildRecord> = state
            .builds
            .values()
            .filter(|b| include_suppressed || !b.suppressed)
            .cloned()
            .collect();
        builds.sort_by_key(|b| (b.commit_date.is_none(), Reverse(b.commit_date), Reverse(b.creation_time)));
        builds.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(builds)
    }

    async fn upsert_sync(&self, sync: BuildSync) -> DbResult<BuildRecord> {
        let mut state = self.state.write().await;
        let record = state
            .builds
            .entry(sync.id.clone())
            .or_insert_with(|| BuildRecord {
                id: sync.id.clone(),
                creation_time: Utc::now(),
                state: INIT_STATE.to_string(),
                commit_author: None,
                commit_message: None,
                commit_date: None,
                commit_url: None,
                build_download_url: None,
                suppressed: false,
            });
        if let Some(new_state) = sync.state {
            record.state = new_state;
        }
        record.commit_author = sync.commit.author;
        record.commit_message = sync.commit.message;
        record.commit_date = sync.commit.date;
        record.commit_url = sync.commit.url;
        if sync.build_download_url.is_some() {
            record.build_download_url = sync.build_download_url;
        }
        Ok(record.clone())
    }

    async fn insert_observed(
        &self,
        id: &str,
        creation_time: DateTime<Utc>,
        state: &str,
    ) -> DbResult<BuildRecord> {
        let mut guard = self.state.write().await;
        let record = guard
            .builds
            .entry(id.to_string())
            .or_insert_with(|| BuildRecord {
                id: id.to_string(),
                creation_time,
                state: state.to_string(),
                commit_author: None,
                commit_message: None,
                commit_date: None,
                commit_url: None,
                build_download_url: None,
                suppressed: false,
            });
        Ok(record.clone())
    }

    async fn set_suppressed(&self, id: &str, suppressed: bool) -> DbResult<()> {
        let mut state = self.state.write().await;
        let build = state
            .builds
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        build.suppressed = suppressed;
        Ok(())
    }

    async fn delete(&self, id: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        if state.builds.remove(id).is_none() {
            return Err(DbError::NotFound(format!("build {}", id)));
        }
        let runs: Vec<String> = state
            .test_runs
            .values()
            .filter(|r| r.build_id == id)
            .map(|r| r.id.clone())
            .collect();
        for run in runs {
            state.delete_test_run(&run);
        }
        Ok(())
    }
}

#[async_trait]
impl TestRunRepo for MemoryStore {
    async fn get(&self, id: &str) -> DbResult<Option<TestRunRecord>> {
        Ok(self.state.read().await.test_runs.get(id).cloned())
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<TestRunRecord>> {
        let state = self.state.read().await;
        let mut runs: Vec<TestRunRecord> = state.test_runs.values().cloned().collect();
        runs.sort_by_key(|r| Reverse(r.creation_time));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }

    async fn list_for_build(&self, build_id: &str) -> DbResult<Vec<TestRunRecord>> {
        let state = self.state.read().await;
        let mut runs: Vec<TestRunRecord> = state
            .test_runs
            .values()
            .filter(|r| r.build_id == build_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| Reverse(r.creation_time));
        Ok(runs)
    }

    async fn latest_live_for_build(&self, build_id: &str) -> DbResult<Option<TestRunRecord>> {
        let state = self.state.read().await;
        Ok(state
            .test_runs
            .values()
            .filter(|r| r.build_id == build_id && r.live)
            .max_by_key(|r| r.creation_time)
            .cloned())
    }

    async fn register(&self, run: NewTestRun) -> DbResult<TestRunRecord> {
        let mut state = self.state.write().await;
        if !state.builds.contains_key(&run.build_id) {
            return Err(DbError::NotFound(format!("parent of test run {}", run.id)));
        }
        state.delete_test_run(&run.id);
        let record = TestRunRecord {
            id: run.id.clone(),
            creation_time: run.creation_time,
            build_id: run.build_id,
            live: run.live,
            state: run.state,
            total_tests: 0,
            failed_tests: 0,
        };
        state.test_runs.insert(run.id, record.clone());
        Ok(record)
    }

    async fn update_state(&self, id: &str, new_state: &str) -> DbResult<TestRunRecord> {
        let mut state = self.state.write().await;
        let run = state
            .test_runs
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("test run {}", id)))?;
        run.state = new_state.to_string();
        Ok(run.clone())
    }

    async fn existing_case_ids(&self, id: &str) -> DbResult<HashSet<String>> {
        let state = self.state.read().await;
        Ok(state
            .test_cases
            .values()
            .filter(|c| c.test_run_id == id)
            .map(|c| c.id.clone())
            .collect())
    }

    async fn record_completion(
        &self,
        id: &str,
        new_state: &str,
        totals: CompletionTotals,
        cases: Vec<TestCaseRecord>,
    ) -> DbResult<TestRunRecord> {
        let mut state = self.state.write().await;
        if !state.test_runs.contains_key(id) {
            return Err(DbError::NotFound(format!("test run {}", id)));
        }
        if totals.failed < 0 || totals.total < totals.failed {
            return Err(DbError::InvalidData(format!("totals of test run {}", id)));
        }
        for case in cases {
            if !state.test_cases.contains_key(&case.id) {
                let case = TestCaseRecord {
                    test_run_id: id.to_string(),
                    ..case
                };
                state.test_cases.insert(case.id.clone(), case);
            }
        }
        let run = state
            .test_runs
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("test run {}", id)))?;
        run.state = new_state.to_string();
        run.total_tests = totals.total;
        run.failed_tests = totals.failed;
        Ok(run.clone())
    }

    async fn list_cases(&self, id: &str) -> DbResult<Vec<TestCaseRecord>> {
        let state = self.state.read().await;
        Ok(state
            .test_cases
            .values()
            .filter(|c| c.test_run_id == id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> DbResult<()> {
        if !self.state.write().await.delete_test_run(id) {
            return Err(DbError::NotFound(format!("test run {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessKeyRepo for MemoryStore {
    async fn create(&self, name: &str, remark: Option<&str>) -> DbResult<AccessKeyRecord> {
        let mut state = self.state.write().await;
        if state.access_keys.contains_key(name) {
            return Err(DbError::Duplicate(format!("access key {}", name)));
        }
        let record = AccessKeyRecord {
            name: name.to_string(),
            key1: Secret::generate().expose().to_string(),
            key2: Secret::generate().expose().to_string(),
            remark: remark.map(String::from),
        };
        state.access_keys.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn get(&self, name: &str) -> DbResult<Option<AccessKeyRecord>> {
        Ok(self.state.read().await.access_keys.get(name).cloned())
    }

    async fn list(&self) -> DbResult<Vec<AccessKeyRecord>> {
        Ok(self.state.read().await.access_keys.values().cloned().collect())
    }

    async fn rotate(&self, name: &str) -> DbResult<AccessKeyRecord> {
        let mut state = self.state.write().await;
        let record = state
            .access_keys
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("access key {}", name)))?;
        record.key1 = Secret::generate().expose().to_string();
        record.key2 = Secret::generate().expose().to_string();
        Ok(record.clone())
    }

    async fn delete(&self, name: &str) -> DbResult<()> {
        if self.state.write().await.access_keys.remove(name).is_none() {
            return Err(DbError::NotFound(format!("access key {}", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookEventRepo for MemoryStore {
    async fn append(
        &self,
        source: &str,
        content: &str,
        signature: Option<&str>,
    ) -> DbResult<WebhookEventRecord> {
        let mut state = self.state.write().await;
        let record = WebhookEventRecord {
            id: state.webhook_events.len() as i64 + 1,
            created_at: Utc::now(),
            source: source.to_string(),
            content: content.to_string(),
            signature: signature.map(String::from),
            remark: None,
        };
        state.webhook_events.push(record.clone());
        Ok(record)
    }

    async fn set_remark(&self, id: i64, remark: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        let event = state
            .webhook_events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| DbError::NotFound(format!("webhook event {}", id)))?;
        event.remark = Some(remark.to_string());
        Ok(())
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<WebhookEventRecord>> {
        let state = self.state.read().await;
        Ok(state
            .webhook_events
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommitInfo, Store};

    fn sync(id: &str, state: Option<&str>, url: Option<&str>) -> BuildSync {
        BuildSync {
            id: id.to_string(),
            commit: CommitInfo {
                author: Some("Ada".to_string()),
                message: Some("Fix things".to_string()),
                date: Some(Utc::now()),
                url: Some(format!("https://github.com/o/r/commit/{id}")),
            },
            state: state.map(String::from),
            build_download_url: url.map(String::from),
        }
    }

    fn case(run: &str, task: &str, passed: bool) -> TestCaseRecord {
        TestCaseRecord {
            id: format!("{run}.{task}"),
            test_run_id: run.to_string(),
            passed,
            output: (!passed).then(|| "boom".to_string()),
            module: "CORE".to_string(),
            state: "completed".to_string(),
            test_method: "test_x".to_string(),
            test_class: "T".to_string(),
            test_full_name: "a.b.c.T.test_x".to_string(),
            duration_seconds: 1,
        }
    }

    async fn seeded_run(store: &Store, build: &str, run: &str) {
        store.builds.upsert_sync(sync(build, None, None)).await.unwrap();
        store
            .test_runs
            .register(NewTestRun {
                id: run.to_string(),
                creation_time: Utc::now(),
                build_id: build.to_string(),
                live: true,
                state: "active".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_sync_keeps_state_and_url_when_absent() {
        let store = Store::memory();
        let created = store.builds.upsert_sync(sync("abc", None, None)).await.unwrap();
        assert_eq!(created.state, "init");

        store
            .builds
            .upsert_sync(sync("abc", Some("completed"), Some("https://dl")))
            .await
            .unwrap();
        let mut later = sync("abc", None, None);
        later.commit.message = Some("Amended".to_string());
        let record = store.builds.upsert_sync(later).await.unwrap();

        assert_eq!(record.state, "completed");
        assert_eq!(record.build_download_url.as_deref(), Some("https://dl"));
        assert_eq!(record.commit_message.as_deref(), Some("Amended"));
        assert_eq!(record.creation_time, created.creation_time);
    }

    #[tokio::test]
    async fn test_insert_observed_does_not_overwrite() {
        let store = Store::memory();
        store.builds.upsert_sync(sync("abc", Some("running"), None)).await.unwrap();
        let record = store
            .builds
            .insert_observed("abc", Utc::now(), "completed")
            .await
            .unwrap();
        assert_eq!(record.state, "running");
    }

    #[tokio::test]
    async fn test_list_hides_suppressed() {
        let store = Store::memory();
        store.builds.upsert_sync(sync("a", None, None)).await.unwrap();
        store.builds.upsert_sync(sync("b", None, None)).await.unwrap();
        store.builds.set_suppressed("a", true).await.unwrap();

        let visible = store.builds.list(false, 50).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "b");
        assert_eq!(store.builds.list(true, 50).await.unwrap().len(), 2);
        assert!(matches!(
            store.builds.set_suppressed("zzz", true).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_requires_build() {
        let store = Store::memory();
        let result = store
            .test_runs
            .register(NewTestRun {
                id: "test-1".to_string(),
                creation_time: Utc::now(),
                build_id: "missing".to_string(),
                live: false,
                state: "active".to_string(),
            })
            .await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_register_replaces_stale_run() {
        let store = Store::memory();
        seeded_run(&store, "abc", "test-1").await;
        store
            .test_runs
            .record_completion(
                "test-1",
                "completed",
                CompletionTotals { total: 1, failed: 0 },
                vec![case("test-1", "t1", true)],
            )
            .await
            .unwrap();

        seeded_run(&store, "abc", "test-1").await;
        let run = store.test_runs.get("test-1").await.unwrap().unwrap();
        assert_eq!(run.total_tests, 0);
        assert!(store.test_runs.list_cases("test-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_completion_is_idempotent() {
        let store = Store::memory();
        seeded_run(&store, "abc", "test-1").await;
        let cases = vec![case("test-1", "t1", true), case("test-1", "t2", false)];
        let totals = CompletionTotals { total: 2, failed: 1 };

        store
            .test_runs
            .record_completion("test-1", "completed", totals, cases.clone())
            .await
            .unwrap();
        let mut changed = cases.clone();
        changed[1].output = Some("different".to_string());
        let run = store
            .test_runs
            .record_completion("test-1", "completed", totals, changed)
            .await
            .unwrap();

        let stored = store.test_runs.list_cases("test-1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].output.as_deref(), Some("boom"));
        assert_eq!((run.total_tests, run.failed_tests), (2, 1));
    }

    #[tokio::test]
    async fn test_record_completion_rejects_inconsistent_totals() {
        let store = Store::memory();
        seeded_run(&store, "abc", "test-1").await;
        let result = store
            .test_runs
            .record_completion("test-1", "completed", CompletionTotals { total: 1, failed: 2 }, vec![])
            .await;
        assert!(matches!(result, Err(DbError::InvalidData(_))));
        let missing = store
            .test_runs
            .record_completion("nope", "completed", CompletionTotals::default(), vec![])
            .await;
        assert!(matches!(missing, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_build_cascades() {
        let store = Store::memory();
        seeded_run(&store, "abc", "test-1").await;
        seeded_run(&store, "abc", "test-2").await;
        seeded_run(&store, "def", "test-3").await;
        for run in ["test-1", "test-2", "test-3"] {
            store
                .test_runs
                .record_completion(run, "completed", CompletionTotals { total: 1, failed: 0 }, vec![case(run, "t1", true)])
                .await
                .unwrap();
        }

        store.builds.delete("abc").await.unwrap();

        assert!(store.test_runs.get("test-1").await.unwrap().is_none());
        assert!(store.test_runs.get("test-2").await.unwrap().is_none());
        assert!(store.test_runs.list_cases("test-1").await.unwrap().is_empty());
        assert_eq!(store.test_runs.list_cases("test-3").await.unwrap().len(), 1);
        assert!(matches!(store.builds.delete("abc").await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_test_run_cascades() {
        let store = Store::memory();
        seeded_run(&store, "abc", "test-1").await;
        store
            .test_runs
            .record_completion("test-1", "completed", CompletionTotals { total: 1, failed: 1 }, vec![case("test-1", "t1", false)])
            .await
            .unwrap();
        store.test_runs.delete("test-1").await.unwrap();
        assert!(store.test_runs.existing_case_ids("test-1").await.unwrap().is_empty());
        assert!(store.builds.get("abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_live_run() {
        let store = Store::memory();
        store.builds.upsert_sync(sync("abc", None, None)).await.unwrap();
        let base = Utc::now();
        for (id, offset, live) in [("test-1", 0, true), ("test-2", 10, true), ("test-3", 20, false)] {
            store
                .test_runs
                .register(NewTestRun {
                    id: id.to_string(),
                    creation_time: base + chrono::Duration::seconds(offset),
                    build_id: "abc".to_string(),
                    live,
                    state: "active".to_string(),
                })
                .await
                .unwrap();
        }
        let latest = store.test_runs.latest_live_for_build("abc").await.unwrap().unwrap();
        assert_eq!(latest.id, "test-2");
        assert_eq!(store.test_runs.list_for_build("abc").await.unwrap()[0].id, "test-3");
    }

    #[tokio::test]
    async fn test_access_key_lifecycle() {
        let store = Store::memory();
        let key = store.access_keys.create("github", Some("push hook")).await.unwrap();
        assert_ne!(key.key1, key.key2);
        assert!(matches!(
            store.access_keys.create("github", None).await,
            Err(DbError::Duplicate(_))
        ));

        let rotated = store.access_keys.rotate("github").await.unwrap();
        assert_ne!(rotated.key1, key.key1);
        assert_eq!(rotated.remark.as_deref(), Some("push hook"));

        store.access_keys.delete("github").await.unwrap();
        assert!(store.access_keys.get("github").await.unwrap().is_none());
        assert!(matches!(store.access_keys.rotate("github").await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_webhook_event_remark() {
        let store = Store::memory();
        let event = store.webhook_events.append("github", "{}", Some("sha256=00")).await.unwrap();
        store.webhook_events.set_remark(event.id, "accepted").await.unwrap();
        let events = store.webhook_events.list(10).await.unwrap();
        assert_eq!(events[0].remark.as_deref(), Some("accepted"));
        assert_eq!(events[0].content, "{}");
        assert!(store.webhook_events.set_remark(99, "x").await.is_err());
    }
}
