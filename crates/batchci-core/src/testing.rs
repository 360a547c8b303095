//! In-process fakes of the remote collaborators, recording the calls made
//! against them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::compute::{
    CloudJob, CloudTask, ComputeService, JobState, Metadata, NewJob, Pool, TaskSpec, TaskState,
};
use crate::source::{Commit, SourceControl};
use crate::storage::{ObjectStore, SasPermissions, with_sas};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FakeJob {
    pub job: CloudJob,
    /// The creation request, when the job was created through the trait.
    pub spec: Option<NewJob>,
    pub tasks: Vec<CloudTask>,
    pub task_specs: Vec<TaskSpec>,
}

#[derive(Default)]
struct ComputeState {
    pools: Vec<Pool>,
    jobs: BTreeMap<String, FakeJob>,
    created: Vec<String>,
    deleted: Vec<String>,
    fail_create: Option<String>,
    vanish_on_delete: bool,
}

/// Fake batch-compute service.
#[derive(Default)]
pub struct FakeCompute {
    state: Mutex<ComputeState>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool(&self, id: &str, usage: &str) {
        self.state.lock().unwrap().pools.push(Pool {
            id: id.to_string(),
            metadata: Metadata::new().with(crate::naming::keys::USAGE, usage),
        });
    }

    /// Seed a remote job directly, bypassing `create_job`.
    pub fn insert_job(&self, id: &str, state: JobState, metadata: Metadata) {
        let job = CloudJob {
            id: id.to_string(),
            state,
            creation_time: Utc::now(),
            pool_id: None,
            metadata,
        };
        self.state.lock().unwrap().jobs.insert(
            id.to_string(),
            FakeJob {
                job,
                spec: None,
                tasks: Vec::new(),
                task_specs: Vec::new(),
            },
        );
    }

    pub fn insert_task(&self, job_id: &str, task: CloudTask) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.tasks.retain(|t| t.id != task.id);
            job.tasks.push(task);
        }
    }

    pub fn set_job_state(&self, job_id: &str, job_state: JobState) {
        if let Some(job) = self.state.lock().unwrap().jobs.get_mut(job_id) {
            job.job.state = job_state;
        }
    }

    pub fn set_task_state(&self, job_id: &str, task_id: &str, task_state: TaskState) {
        if let Some(job) = self.state.lock().unwrap().jobs.get_mut(job_id) {
            for task in job.tasks.iter_mut().filter(|t| t.id == task_id) {
                task.state = task_state.clone();
            }
        }
    }

    /// Make the next `create_job` call fail with a remote error.
    pub fn fail_next_create(&self, message: &str) {
        self.state.lock().unwrap().fail_create = Some(message.to_string());
    }

    /// Make the next `delete_job` call answer `NotFound`, as if another
    /// caller deleted the job first. The job is still removed.
    pub fn vanish_on_next_delete(&self) {
        self.state.lock().unwrap().vanish_on_delete = true;
    }

    pub fn job(&self, id: &str) -> Option<FakeJob> {
        self.state.lock().unwrap().jobs.get(id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    /// Ids passed to `create_job`, in call order.
    pub fn created_jobs(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    /// Ids passed to `delete_job`, in call order.
    pub fn deleted_jobs(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ComputeService for FakeCompute {
    async fn create_job(&self, spec: NewJob) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_create.take() {
            return Err(Error::Remote(message));
        }
        if state.jobs.contains_key(&spec.id) {
            return Err(Error::Conflict(format!("job {} already exists", spec.id)));
        }
        state.created.push(spec.id.clone());
        let job = CloudJob {
            id: spec.id.clone(),
            state: JobState::Active,
            creation_time: Utc::now(),
            pool_id: Some(spec.pool_id.clone()),
            metadata: spec.metadata.clone(),
        };
        state.jobs.insert(
            spec.id.clone(),
            FakeJob {
                job,
                spec: Some(spec),
                tasks: Vec::new(),
                task_specs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<CloudJob>> {
        Ok(self.state.lock().unwrap().jobs.get(job_id).map(|j| j.job.clone()))
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(job_id.to_string());
        let vanished = std::mem::take(&mut state.vanish_on_delete);
        match state.jobs.remove(job_id) {
            Some(_) if !vanished => Ok(()),
            Some(_) => Err(Error::NotFound(format!("job {job_id}"))),
            None => Err(Error::NotFound(format!("job {job_id}"))),
        }
    }

    async fn create_task(&self, job_id: &str, spec: TaskSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.tasks.push(CloudTask {
            id: spec.id.clone(),
            display_name: Some(spec.display_name.clone()),
            state: TaskState::Active,
            exit_code: None,
            start_time: None,
            end_time: None,
        });
        job.task_specs.push(spec);
        Ok(())
    }

    async fn get_task(&self, job_id: &str, task_id: &str) -> Result<Option<CloudTask>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .get(job_id)
            .and_then(|j| j.tasks.iter().find(|t| t.id == task_id).cloned()))
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<CloudTask>> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .get(job_id)
            .map(|j| j.tasks.clone())
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        Ok(self.state.lock().unwrap().pools.clone())
    }
}

const FAKE_BLOB_ENDPOINT: &str = "https://fake.blob.local";

#[derive(Default)]
struct StorageState {
    containers: BTreeMap<String, BTreeMap<String, String>>,
    fetched: Vec<String>,
}

/// Fake blob storage. Signed URLs are deterministic and resolvable by
/// [`ObjectStore::get_text`].
#[derive(Default)]
pub struct FakeStorage {
    state: Mutex<StorageState>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob, creating its container when needed.
    pub fn put_blob(&self, container: &str, blob: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(blob.to_string(), content.to_string());
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(container)
    }

    /// URLs passed to `get_text`, in call order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    fn locate(url: &str) -> Option<(String, String)> {
        let path = url.strip_prefix(FAKE_BLOB_ENDPOINT)?.trim_start_matches('/');
        let path = path.split('?').next()?;
        let (container, blob) = path.split_once('/')?;
        Some((container.to_string(), blob.to_string()))
    }
}

#[async_trait]
impl ObjectStore for FakeStorage {
    async fn create_container(&self, container: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .containers
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.has_container(container))
    }

    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let blobs = state
            .containers
            .get(container)
            .ok_or_else(|| Error::NotFound(format!("container {container}")))?;
        Ok(blobs
            .keys()
            .filter(|name| prefix.is_none_or(|p| name.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .get(container)
            .is_some_and(|blobs| blobs.contains_key(blob)))
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(url.to_string());
        let (container, blob) =
            Self::locate(url).ok_or_else(|| Error::Remote(format!("unroutable url {url}")))?;
        state
            .containers
            .get(&container)
            .and_then(|blobs| blobs.get(&blob))
            .cloned()
            .ok_or_else(|| Error::Remote(format!("blob {container}/{blob} returned 404")))
    }

    fn container_sas(
        &self,
        container: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Result<String> {
        Ok(format!("sr=c&c={container}&sp={permissions}&se={}", expiry.timestamp()))
    }

    fn blob_sas(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Result<String> {
        Ok(format!(
            "sr=b&c={container}&b={blob}&sp={permissions}&se={}",
            expiry.timestamp()
        ))
    }

    fn container_url(&self, container: &str, sas: Option<&str>) -> String {
        with_sas(format!("{FAKE_BLOB_ENDPOINT}/{container}"), sas)
    }

    fn blob_url(&self, container: &str, blob: &str, sas: Option<&str>) -> String {
        with_sas(format!("{FAKE_BLOB_ENDPOINT}/{container}/{blob}"), sas)
    }
}

/// Fake source-control host holding commits newest first.
#[derive(Default)]
pub struct FakeSourceControl {
    commits: Mutex<Vec<Commit>>,
    lookups: Mutex<HashMap<String, usize>>,
}

impl FakeSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a commit as the newest one.
    pub fn push_commit(&self, commit: Commit) {
        self.commits.lock().unwrap().insert(0, commit);
    }

    pub fn lookups(&self, sha: &str) -> usize {
        self.lookups.lock().unwrap().get(sha).copied().unwrap_or(0)
    }
}

/// A commit with every descriptive field filled in.
pub fn commit(sha: &str, message: &str) -> Commit {
    Commit {
        sha: sha.to_string(),
        author: Some("Ada Lovelace".to_string()),
        date: Some(Utc::now()),
        message: Some(message.to_string()),
        html_url: Some(format!("https://github.com/example/project/commit/{sha}")),
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn get_commit(&self, sha: &str) -> Result<Commit> {
        *self.lookups.lock().unwrap().entry(sha.to_string()).or_default() += 1;
        self.commits
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.sha == sha)
            .cloned()
            .ok_or_else(|| Error::Remote(format!("commit {sha} returned 404")))
    }

    async fn list_commits(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Commit>> {
        Ok(self
            .commits
            .lock()
            .unwrap()
            .iter()
            .filter(|c| match (since, c.date) {
                (Some(since), Some(date)) => date >= since,
                _ => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_storage_resolves_signed_urls() {
        let storage = FakeStorage::new();
        storage.put_blob("output-r", "t1/stdout.txt", "hello");
        let sas = storage
            .blob_sas("output-r", "t1/stdout.txt", SasPermissions::READ, Utc::now())
            .unwrap();
        let url = storage.blob_url("output-r", "t1/stdout.txt", Some(&sas));
        assert_eq!(storage.get_text(&url).await.unwrap(), "hello");
        assert_eq!(storage.fetched_urls(), vec![url]);
    }

    #[tokio::test]
    async fn test_fake_compute_delete_missing_is_not_found() {
        let compute = FakeCompute::new();
        let err = compute.delete_job("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
