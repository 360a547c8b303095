//! Remote batch-compute service abstraction.
//!
//! The service runs jobs made of tasks on pools of nodes. Only the operations
//! the orchestrators and the reconciler depend on are modelled here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// State of a remote job, mirrored verbatim into local records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Active,
    Disabling,
    Disabled,
    Enabling,
    Terminating,
    Completed,
    Deleting,
    /// Any state string this crate does not know about.
    Other(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Active => "active",
            JobState::Disabling => "disabling",
            JobState::Disabled => "disabled",
            JobState::Enabling => "enabling",
            JobState::Terminating => "terminating",
            JobState::Completed => "completed",
            JobState::Deleting => "deleting",
            JobState::Other(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        match s {
            "active" => JobState::Active,
            "disabling" => JobState::Disabling,
            "disabled" => JobState::Disabled,
            "enabling" => JobState::Enabling,
            "terminating" => JobState::Terminating,
            "completed" => JobState::Completed,
            "deleting" => JobState::Deleting,
            other => JobState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Active,
    Preparing,
    Running,
    Completed,
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Active => "active",
            TaskState::Preparing => "preparing",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Other(s) => s,
        }
    }
}

impl From<&str> for TaskState {
    fn from(s: &str) -> Self {
        match s {
            "active" => TaskState::Active,
            "preparing" => TaskState::Preparing,
            "running" => TaskState::Running,
            "completed" => TaskState::Completed,
            other => TaskState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A name/value pair attached to a job or pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub name: String,
    pub value: String,
}

/// Ordered key/value bag attached to remote jobs and pools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Vec<MetadataItem>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|item| item.name == name) {
            Some(item) => item.value = value,
            None => self.0.push(MetadataItem { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value.as_str())
    }

    pub fn items(&self) -> &[MetadataItem] {
        &self.0
    }
}

impl From<Vec<MetadataItem>> for Metadata {
    fn from(items: Vec<MetadataItem>) -> Self {
        Self(items)
    }
}

/// A pool of compute nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub metadata: Metadata,
}

/// An environment variable handed to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSetting {
    pub name: String,
    pub value: String,
}

impl EnvironmentSetting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A blob downloaded onto the node before a task runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFile {
    /// Signed URL of the blob.
    pub blob_source: String,
    /// Path relative to the task working directory.
    pub file_path: String,
}

/// When task output files are uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadCondition {
    TaskSuccess,
    TaskFailure,
    TaskCompletion,
}

/// Rule for uploading files produced by a task to blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Glob relative to the task working directory.
    pub file_pattern: String,
    /// Signed container URL with write permission.
    pub container_url: String,
    /// Blob prefix inside the container.
    pub path: String,
    pub upload_condition: UploadCondition,
}

/// A task to add to an existing job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub display_name: String,
    pub command_line: String,
    pub output_files: Vec<OutputFile>,
    /// Tasks that must complete before this one starts.
    pub depends_on: Vec<String>,
    pub environment: Vec<EnvironmentSetting>,
    pub resource_files: Vec<ResourceFile>,
}

/// Task that runs on every node before any other task of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparationTask {
    pub command_line: String,
    pub resource_files: Vec<ResourceFile>,
    /// Block the job's tasks until preparation succeeded.
    pub wait_for_success: bool,
}

/// Task that creates further tasks inside its own job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerTask {
    pub id: String,
    pub display_name: String,
    pub command_line: String,
    pub kill_job_on_completion: bool,
    pub environment: Vec<EnvironmentSetting>,
}

/// Specification of a job to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub pool_id: String,
    pub display_name: Option<String>,
    pub metadata: Metadata,
    pub uses_task_dependencies: bool,
    /// Terminate the job once every task has completed.
    pub terminate_on_completion: bool,
    pub common_environment: Vec<EnvironmentSetting>,
    pub preparation_task: Option<PreparationTask>,
    pub manager_task: Option<ManagerTask>,
}

/// A job as reported by the compute service.
#[derive(Debug, Clone)]
pub struct CloudJob {
    pub id: String,
    pub state: JobState,
    pub creation_time: DateTime<Utc>,
    pub pool_id: Option<String>,
    pub metadata: Metadata,
}

/// A task as reported by the compute service.
#[derive(Debug, Clone)]
pub struct CloudTask {
    pub id: String,
    pub display_name: Option<String>,
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Handle to a created (or already existing) remote job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: crate::JobId,
    pub pool_id: String,
    /// Whether this call created the job, as opposed to finding it.
    pub created: bool,
}

/// Client for the remote batch-compute service.
///
/// `get_*` return `Ok(None)` when the addressed entity does not exist.
/// `delete_job` reports a missing job as [`crate::Error::NotFound`].
#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn create_job(&self, job: NewJob) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<CloudJob>>;

    async fn delete_job(&self, job_id: &str) -> Result<()>;

    async fn create_task(&self, job_id: &str, task: TaskSpec) -> Result<()>;

    async fn get_task(&self, job_id: &str, task_id: &str) -> Result<Option<CloudTask>>;

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<CloudTask>>;

    async fn list_pools(&self) -> Result<Vec<Pool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_round_trips_unknown_values() {
        assert_eq!(JobState::from("completed"), JobState::Completed);
        assert_eq!(JobState::from("weird").as_str(), "weird");
        assert!(JobState::Completed.is_completed());
        assert!(!JobState::Terminating.is_completed());
    }

    #[test]
    fn test_metadata_insert_replaces() {
        let mut metadata = Metadata::new().with("usage", "build");
        metadata.insert("usage", "test");
        assert_eq!(metadata.get("usage"), Some("test"));
        assert_eq!(metadata.items().len(), 1);
        assert_eq!(metadata.get("missing"), None);
    }
}
