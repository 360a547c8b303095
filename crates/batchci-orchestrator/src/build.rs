//! Build job creation.
//!
//! A build job is named after the commit it builds and carries two tasks:
//! `build` clones, checks out and builds the commit and uploads its
//! artifacts, `report` runs after it and calls the service back.

use std::sync::Arc;

use batchci_core::compute::{
    ComputeService, JobHandle, NewJob, OutputFile, TaskSpec, UploadCondition,
};
use batchci_core::naming::{self, BUILD_TASK_ID, BUILDS_CONTAINER, REPORT_TASK_ID, USAGE_BUILD};
use batchci_core::secret::Secret;
use batchci_core::storage::{ObjectStore, SasPermissions};
use batchci_core::{Error, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::pool::find_pool;
use crate::settings::{BUILD_UPLOAD_TTL, OrchestratorSettings};
use crate::Collaborators;

pub struct BuildOrchestrator {
    compute: Arc<dyn ComputeService>,
    storage: Arc<dyn ObjectStore>,
    settings: Arc<OrchestratorSettings>,
}

impl BuildOrchestrator {
    pub fn new(collaborators: &Collaborators, settings: Arc<OrchestratorSettings>) -> Self {
        Self {
            compute: collaborators.compute.clone(),
            storage: collaborators.storage.clone(),
            settings,
        }
    }

    /// Create the build job for `sha`.
    ///
    /// A job that exists and has not completed is returned as is. A
    /// completed job is deleted and replaced. Nothing is created when no
    /// pool is tagged for builds.
    pub async fn create_build_job(&self, sha: &str) -> Result<JobHandle> {
        let pool = find_pool(self.compute.as_ref(), USAGE_BUILD).await?;
        let job_id = naming::build_job_id(sha);

        if let Some(existing) = self.compute.get_job(job_id.as_str()).await? {
            if !existing.state.is_completed() {
                info!(job = %job_id, state = %existing.state, "Build job already running");
                return Ok(JobHandle {
                    id: job_id,
                    pool_id: existing.pool_id.unwrap_or(pool.id),
                    created: false,
                });
            }

            info!(job = %job_id, "Replacing completed build job");
            match self.compute.delete_job(job_id.as_str()).await {
                Ok(()) => {}
                Err(Error::NotFound(_)) => {
                    warn!(job = %job_id, "Build job vanished before deletion");
                }
                Err(e) => return Err(e),
            }
        }

        self.storage.create_container(BUILDS_CONTAINER).await?;
        let upload_sas = self.storage.container_sas(
            BUILDS_CONTAINER,
            SasPermissions::WRITE_LIST,
            Utc::now() + BUILD_UPLOAD_TTL,
        )?;
        let upload_url = self
            .storage
            .container_url(BUILDS_CONTAINER, Some(&upload_sas));

        let secret = Secret::generate();
        self.compute
            .create_job(NewJob {
                id: job_id.to_string(),
                pool_id: pool.id.clone(),
                display_name: None,
                metadata: naming::build_metadata(&secret, &self.settings.source_url, sha),
                uses_task_dependencies: true,
                terminate_on_completion: true,
                common_environment: Vec::new(),
                preparation_task: None,
                manager_task: None,
            })
            .await?;

        self.compute
            .create_task(job_id.as_str(), self.build_task(sha, upload_url))
            .await?;
        self.compute
            .create_task(job_id.as_str(), self.report_task(sha, &secret))
            .await?;

        info!(job = %job_id, pool = %pool.id, "Created build job");
        Ok(JobHandle {
            id: job_id,
            pool_id: pool.id,
            created: true,
        })
    }

    fn build_task(&self, sha: &str, upload_url: String) -> TaskSpec {
        let commands = [
            format!("git clone --depth=50 {} gitsrc", self.settings.source_url),
            "pushd gitsrc".to_string(),
            format!("git checkout -qf {sha}"),
            self.settings.build_script.clone(),
        ];

        TaskSpec {
            id: BUILD_TASK_ID.to_string(),
            display_name: "Build all product and test code.".to_string(),
            command_line: naming::command_line(&commands),
            output_files: vec![OutputFile {
                file_pattern: self.settings.artifact_pattern.clone(),
                container_url: upload_url,
                path: sha.to_string(),
                upload_condition: UploadCondition::TaskSuccess,
            }],
            ..Default::default()
        }
    }

    fn report_task(&self, sha: &str, secret: &Secret) -> TaskSpec {
        let callback = format!(
            "curl -fsS -X PUT {} --data-urlencode secret={}",
            self.settings.build_callback_url(sha),
            secret.expose()
        );

        TaskSpec {
            id: REPORT_TASK_ID.to_string(),
            display_name: "Request service to pull result".to_string(),
            command_line: naming::command_line(&[callback]),
            depends_on: vec![BUILD_TASK_ID.to_string()],
            ..Default::default()
        }
    }
}
