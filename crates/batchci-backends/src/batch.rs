//! Azure Batch REST client.

use async_trait::async_trait;
use batchci_config::BatchConfig;
use batchci_core::compute::{
    CloudJob, CloudTask, ComputeService, EnvironmentSetting, JobState, ManagerTask, Metadata,
    MetadataItem, NewJob, OutputFile, Pool, PreparationTask, ResourceFile, TaskSpec, TaskState,
    UploadCondition,
};
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::BackendError;
use crate::shared_key::{CanonicalRequest, SharedKey, http_date};

pub const API_VERSION: &str = "2023-05-01.17.0";
const JSON_CONTENT_TYPE: &str = "application/json; odata=minimalmetadata";

/// Client for one Batch account.
pub struct AzureBatchClient {
    client: reqwest::Client,
    endpoint: Url,
    credentials: SharedKey,
}

impl AzureBatchClient {
    pub fn new(config: &BatchConfig) -> Result<Self, BackendError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| BackendError::Parse(format!("batch endpoint: {}", e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            credentials: SharedKey::new(&config.account, &config.key)?,
        })
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        let mut url = self
            .endpoint
            .join(path)
            .map_err(|e| BackendError::Parse(format!("batch url {}: {}", path, e)))?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, BackendError> {
        let headers = [("ocp-date", http_date(Utc::now()))];
        let content_length = body.as_ref().map_or(0, Vec::len);
        let content_type = body.as_ref().map(|_| JSON_CONTENT_TYPE);
        let authorization = self.credentials.authorization(&CanonicalRequest {
            method: method.as_str(),
            url: &url,
            content_length,
            content_type,
            headers: &headers,
        })?;

        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", authorization)
            .header("ocp-date", &headers[0].1);
        if let Some(body) = body {
            request = request.header("Content-Type", JSON_CONTENT_TYPE).body(body);
        }
        Ok(request.send().await?)
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<(), BackendError> {
        let body = serde_json::to_vec(body).map_err(|e| BackendError::Parse(e.to_string()))?;
        let response = self.send(Method::POST, self.url(path)?, Some(body)).await?;
        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await);
        }
        Ok(())
    }

    /// GET a single entity; a 404 yields `None`.
    async fn get_optional<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Option<T>, BackendError> {
        let response = self.send(Method::GET, self.url(path)?, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await);
        }
        let entity = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(Some(entity))
    }

    /// GET a collection, following `odata.nextLink` until exhausted.
    async fn list_all<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, BackendError> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path)?);

        while let Some(url) = next.take() {
            let response = self.send(Method::GET, url, None).await?;
            if !response.status().is_success() {
                return Err(BackendError::from_response(response).await);
            }
            let page: Page<T> = response
                .json()
                .await
                .map_err(|e| BackendError::Parse(e.to_string()))?;
            items.extend(page.value);
            next = page
                .next_link
                .map(|link| Url::parse(&link))
                .transpose()
                .map_err(|e| BackendError::Parse(format!("next link: {}", e)))?;
        }

        Ok(items)
    }
}

#[async_trait]
impl ComputeService for AzureBatchClient {
    async fn create_job(&self, job: NewJob) -> batchci_core::Result<()> {
        tracing::debug!(job_id = %job.id, pool_id = %job.pool_id, "Creating batch job");
        self.post_json("jobs", &JobAddWire::from(job)).await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> batchci_core::Result<Option<CloudJob>> {
        let job: Option<JobWire> = self.get_optional(&format!("jobs/{}", job_id)).await?;
        Ok(job.map(CloudJob::from))
    }

    async fn delete_job(&self, job_id: &str) -> batchci_core::Result<()> {
        let response = self
            .send(Method::DELETE, self.url(&format!("jobs/{}", job_id))?, None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(batchci_core::Error::NotFound(format!("job {}", job_id)));
        }
        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await.into());
        }
        Ok(())
    }

    async fn create_task(&self, job_id: &str, task: TaskSpec) -> batchci_core::Result<()> {
        tracing::debug!(job_id = %job_id, task_id = %task.id, "Adding batch task");
        self.post_json(&format!("jobs/{}/tasks", job_id), &TaskAddWire::from(task))
            .await?;
        Ok(())
    }

    async fn get_task(&self, job_id: &str, task_id: &str) -> batchci_core::Result<Option<CloudTask>> {
        let task: Option<TaskWire> = self
            .get_optional(&format!("jobs/{}/tasks/{}", job_id, task_id))
            .await?;
        Ok(task.map(CloudTask::from))
    }

    async fn list_tasks(&self, job_id: &str) -> batchci_core::Result<Vec<CloudTask>> {
        let tasks: Vec<TaskWire> = self.list_all(&format!("jobs/{}/tasks", job_id)).await?;
        Ok(tasks.into_iter().map(CloudTask::from).collect())
    }

    async fn list_pools(&self) -> batchci_core::Result<Vec<Pool>> {
        let pools: Vec<PoolWire> = self.list_all("pools").await?;
        Ok(pools.into_iter().map(Pool::from).collect())
    }
}

// Wire formats

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NameValue {
    name: String,
    value: String,
}

fn metadata_wire(metadata: &Metadata) -> Vec<NameValue> {
    metadata
        .items()
        .iter()
        .map(|item| NameValue {
            name: item.name.clone(),
            value: item.value.clone(),
        })
        .collect()
}

fn environment_wire(settings: Vec<EnvironmentSetting>) -> Vec<NameValue> {
    settings
        .into_iter()
        .map(|s| NameValue {
            name: s.name,
            value: s.value,
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceFileWire {
    http_url: String,
    file_path: String,
}

fn resource_files_wire(files: Vec<ResourceFile>) -> Vec<ResourceFileWire> {
    files
        .into_iter()
        .map(|f| ResourceFileWire {
            http_url: f.blob_source,
            file_path: f.file_path,
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolInfoWire {
    pool_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobPreparationTaskWire {
    command_line: String,
    resource_files: Vec<ResourceFileWire>,
    wait_for_success: bool,
}

impl From<PreparationTask> for JobPreparationTaskWire {
    fn from(task: PreparationTask) -> Self {
        Self {
            command_line: task.command_line,
            resource_files: resource_files_wire(task.resource_files),
            wait_for_success: task.wait_for_success,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobManagerTaskWire {
    id: String,
    display_name: String,
    command_line: String,
    kill_job_on_completion: bool,
    environment_settings: Vec<NameValue>,
}

impl From<ManagerTask> for JobManagerTaskWire {
    fn from(task: ManagerTask) -> Self {
        Self {
            id: task.id,
            display_name: task.display_name,
            command_line: task.command_line,
            kill_job_on_completion: task.kill_job_on_completion,
            environment_settings: environment_wire(task.environment),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAddWire {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    pool_info: PoolInfoWire,
    metadata: Vec<NameValue>,
    uses_task_dependencies: bool,
    on_all_tasks_complete: &'static str,
    common_environment_settings: Vec<NameValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_preparation_task: Option<JobPreparationTaskWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_manager_task: Option<JobManagerTaskWire>,
}

impl From<NewJob> for JobAddWire {
    fn from(job: NewJob) -> Self {
        Self {
            metadata: metadata_wire(&job.metadata),
            id: job.id,
            display_name: job.display_name,
            pool_info: PoolInfoWire {
                pool_id: job.pool_id,
            },
            uses_task_dependencies: job.uses_task_dependencies,
            on_all_tasks_complete: if job.terminate_on_completion {
                "terminatejob"
            } else {
                "noaction"
            },
            common_environment_settings: environment_wire(job.common_environment),
            job_preparation_task: job.preparation_task.map(Into::into),
            job_manager_task: job.manager_task.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerDestinationWire {
    container_url: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct DestinationWire {
    container: ContainerDestinationWire,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadOptionsWire {
    upload_condition: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputFileWire {
    file_pattern: String,
    destination: DestinationWire,
    upload_options: UploadOptionsWire,
}

impl From<OutputFile> for OutputFileWire {
    fn from(file: OutputFile) -> Self {
        Self {
            file_pattern: file.file_pattern,
            destination: DestinationWire {
                container: ContainerDestinationWire {
                    container_url: file.container_url,
                    path: file.path,
                },
            },
            upload_options: UploadOptionsWire {
                upload_condition: match file.upload_condition {
                    UploadCondition::TaskSuccess => "tasksuccess",
                    UploadCondition::TaskFailure => "taskfailure",
                    UploadCondition::TaskCompletion => "taskcompletion",
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DependsOnWire {
    task_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskAddWire {
    id: String,
    display_name: String,
    command_line: String,
    output_files: Vec<OutputFileWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depends_on: Option<DependsOnWire>,
    environment_settings: Vec<NameValue>,
    resource_files: Vec<ResourceFileWire>,
}

impl From<TaskSpec> for TaskAddWire {
    fn from(task: TaskSpec) -> Self {
        Self {
            id: task.id,
            display_name: task.display_name,
            command_line: task.command_line,
            output_files: task.output_files.into_iter().map(Into::into).collect(),
            depends_on: (!task.depends_on.is_empty()).then(|| DependsOnWire {
                task_ids: task.depends_on,
            }),
            environment_settings: environment_wire(task.environment),
            resource_files: resource_files_wire(task.resource_files),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolInfoRead {
    pool_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobWire {
    id: String,
    state: String,
    creation_time: DateTime<Utc>,
    pool_info: Option<PoolInfoRead>,
    #[serde(default)]
    metadata: Vec<NameValue>,
}

fn metadata_from_wire(items: Vec<NameValue>) -> Metadata {
    items
        .into_iter()
        .map(|nv| MetadataItem {
            name: nv.name,
            value: nv.value,
        })
        .collect::<Vec<_>>()
        .into()
}

impl From<JobWire> for CloudJob {
    fn from(job: JobWire) -> Self {
        Self {
            state: JobState::from(job.state.as_str()),
            id: job.id,
            creation_time: job.creation_time,
            pool_id: job.pool_info.and_then(|p| p.pool_id),
            metadata: metadata_from_wire(job.metadata),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionInfoWire {
    exit_code: Option<i32>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskWire {
    id: String,
    display_name: Option<String>,
    state: String,
    execution_info: Option<ExecutionInfoWire>,
}

impl From<TaskWire> for CloudTask {
    fn from(task: TaskWire) -> Self {
        let info = task.execution_info;
        Self {
            state: TaskState::from(task.state.as_str()),
            id: task.id,
            display_name: task.display_name,
            exit_code: info.as_ref().and_then(|i| i.exit_code),
            start_time: info.as_ref().and_then(|i| i.start_time),
            end_time: info.as_ref().and_then(|i| i.end_time),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoolWire {
    id: String,
    #[serde(default)]
    metadata: Vec<NameValue>,
}

impl From<PoolWire> for Pool {
    fn from(pool: PoolWire) -> Self {
        Self {
            id: pool.id,
            metadata: metadata_from_wire(pool.metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_add_wire_shape() {
        let job = NewJob {
            id: "abc".to_string(),
            pool_id: "build-pool".to_string(),
            display_name: None,
            metadata: Metadata::new().with("usage", "build"),
            uses_task_dependencies: true,
            terminate_on_completion: true,
            common_environment: vec![],
            preparation_task: None,
            manager_task: Some(ManagerTask {
                id: "test-creator".to_string(),
                display_name: "Create test tasks".to_string(),
                command_line: "run".to_string(),
                kill_job_on_completion: false,
                environment: vec![EnvironmentSetting::new("A", "1")],
            }),
        };
        let value = serde_json::to_value(JobAddWire::from(job)).unwrap();
        assert_eq!(value["poolInfo"]["poolId"], "build-pool");
        assert_eq!(value["onAllTasksComplete"], "terminatejob");
        assert_eq!(value["usesTaskDependencies"], true);
        assert_eq!(value["metadata"][0]["name"], "usage");
        assert_eq!(value["jobManagerTask"]["killJobOnCompletion"], false);
        assert_eq!(value["jobManagerTask"]["environmentSettings"][0]["value"], "1");
        assert!(value.get("jobPreparationTask").is_none());
        assert!(value.get("displayName").is_none());
    }

    #[test]
    fn test_task_add_wire_shape() {
        let task = TaskSpec {
            id: "report".to_string(),
            display_name: "Report".to_string(),
            command_line: "curl".to_string(),
            depends_on: vec!["build".to_string()],
            output_files: vec![OutputFile {
                file_pattern: "gitsrc/artifacts/**/*.*".to_string(),
                container_url: "https://x/builds?sig=1".to_string(),
                path: "abc".to_string(),
                upload_condition: UploadCondition::TaskSuccess,
            }],
            ..TaskSpec::default()
        };
        let value = serde_json::to_value(TaskAddWire::from(task)).unwrap();
        assert_eq!(value["dependsOn"]["taskIds"][0], "build");
        assert_eq!(value["outputFiles"][0]["destination"]["container"]["path"], "abc");
        assert_eq!(value["outputFiles"][0]["uploadOptions"]["uploadCondition"], "tasksuccess");

        let independent = TaskAddWire::from(TaskSpec::default());
        assert!(serde_json::to_value(independent).unwrap().get("dependsOn").is_none());
    }

    #[test]
    fn test_parse_job_and_tasks() {
        let job: JobWire = serde_json::from_str(
            r#"{
                "id": "abc",
                "state": "completed",
                "creationTime": "2023-01-01T00:00:00Z",
                "poolInfo": {"poolId": "build-pool"},
                "metadata": [{"name": "secret", "value": "s"}]
            }"#,
        )
        .unwrap();
        let job = CloudJob::from(job);
        assert!(job.state.is_completed());
        assert_eq!(job.pool_id.as_deref(), Some("build-pool"));
        assert_eq!(job.metadata.get("secret"), Some("s"));

        let page: Page<TaskWire> = serde_json::from_str(
            r#"{
                "value": [
                    {"id": "t1", "state": "completed", "displayName": "run a (b.c.D)",
                     "executionInfo": {"exitCode": 1, "startTime": "2023-01-01T00:00:00Z",
                                       "endTime": "2023-01-01T00:00:03Z"}},
                    {"id": "t2", "state": "running"}
                ],
                "odata.nextLink": "https://acct.batch.azure.com/jobs/abc/tasks?api-version=x&$skiptoken=y"
            }"#,
        )
        .unwrap();
        assert!(page.next_link.is_some());
        let tasks: Vec<CloudTask> = page.value.into_iter().map(CloudTask::from).collect();
        assert_eq!(tasks[0].exit_code, Some(1));
        assert_eq!(tasks[1].state, TaskState::Running);
        assert_eq!(tasks[1].exit_code, None);
    }

    #[test]
    fn test_url_carries_api_version() {
        let client = AzureBatchClient::new(&BatchConfig {
            account: "acct".to_string(),
            key: batchci_core::secret::Secret::new("a2V5"),
            endpoint: "https://acct.westus2.batch.azure.com".to_string(),
        })
        .unwrap();
        let url = client.url("jobs/abc/tasks").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.westus2.batch.azure.com/jobs/abc/tasks?api-version=2023-05-01.17.0"
        );
    }
}
