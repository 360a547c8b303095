//! Test job creation.
//!
//! A test job downloads a build's artifacts onto every node through its
//! preparation task, then runs a manager task that schedules one task per
//! test case inside the same job.

use std::sync::Arc;

use batchci_core::compute::{
    ComputeService, EnvironmentSetting, JobHandle, ManagerTask, NewJob, PreparationTask,
    ResourceFile,
};
use batchci_core::naming::{self, BUILDS_CONTAINER, MANAGER_TASK_ID, USAGE_TEST};
use batchci_core::secret::Secret;
use batchci_core::storage::{ObjectStore, SasPermissions};
use batchci_core::{Error, Result};
use chrono::Utc;
use tracing::info;

use crate::pool::find_pool;
use crate::settings::{ARTIFACT_READ_TTL, OUTPUT_WRITE_TTL, OrchestratorSettings};
use crate::Collaborators;

pub struct TestOrchestrator {
    compute: Arc<dyn ComputeService>,
    storage: Arc<dyn ObjectStore>,
    settings: Arc<OrchestratorSettings>,
}

impl TestOrchestrator {
    pub fn new(collaborators: &Collaborators, settings: Arc<OrchestratorSettings>) -> Self {
        Self {
            compute: collaborators.compute.clone(),
            storage: collaborators.storage.clone(),
            settings,
        }
    }

    /// Create a test job against the artifacts of build `build_id`.
    ///
    /// Fails with [`Error::BuildArtifactNotFound`] when the build uploaded
    /// nothing, and with [`Error::InvalidInput`] when a live run is asked
    /// for without automation credentials.
    pub async fn create_test_job(&self, build_id: &str, live: bool) -> Result<JobHandle> {
        if live && self.settings.automation.is_none() {
            return Err(Error::InvalidInput(
                "live test runs require automation credentials".to_string(),
            ));
        }

        let resource_files = self.artifact_files(build_id).await?;
        let pool = find_pool(self.compute.as_ref(), USAGE_TEST).await?;
        let job_id = naming::test_run_id(Utc::now());

        let output_container = naming::output_container(job_id.as_str());
        self.storage.create_container(&output_container).await?;
        let output_sas = self.storage.container_sas(
            &output_container,
            SasPermissions::WRITE_LIST,
            Utc::now() + OUTPUT_WRITE_TTL,
        )?;
        let output_url = self
            .storage
            .container_url(&output_container, Some(&output_sas));

        let mut environment = vec![EnvironmentSetting::new(
            "AUTOMATION_OUTPUT_CONTAINER",
            output_url,
        )];
        if let Some(automation) = self.settings.automation.as_ref().filter(|_| live) {
            environment.extend([
                EnvironmentSetting::new("AZURE_TEST_RUN_LIVE", "True"),
                EnvironmentSetting::new("AUTOMATION_SP_NAME", &automation.sp_name),
                EnvironmentSetting::new(
                    "AUTOMATION_SP_PASSWORD",
                    automation.sp_password.expose(),
                ),
                EnvironmentSetting::new("AUTOMATION_SP_TENANT", &automation.sp_tenant),
            ]);
        }

        let secret = Secret::generate();
        let manager_task = ManagerTask {
            id: MANAGER_TASK_ID.to_string(),
            display_name: "Automation tasks creator".to_string(),
            command_line: naming::command_line(&[&self.settings.scheduler_script]),
            kill_job_on_completion: false,
            environment: vec![
                EnvironmentSetting::new("AZURE_BATCH_KEY", self.settings.batch_key.expose()),
                EnvironmentSetting::new("AZURE_BATCH_ENDPOINT", &self.settings.batch_endpoint),
                EnvironmentSetting::new(
                    "AUTOMATION_CALLBACK_URL",
                    self.settings.test_callback_url(job_id.as_str()),
                ),
                EnvironmentSetting::new("AUTOMATION_CALLBACK_SECRET", secret.expose()),
            ],
        };

        self.compute
            .create_job(NewJob {
                id: job_id.to_string(),
                pool_id: pool.id.clone(),
                display_name: Some(format!(
                    "Automation on build {}. Live: {}",
                    build_id,
                    if live { "True" } else { "False" }
                )),
                metadata: naming::test_metadata(&secret, build_id, live),
                uses_task_dependencies: true,
                terminate_on_completion: true,
                common_environment: environment,
                preparation_task: Some(PreparationTask {
                    command_line: naming::command_line(&[&self.settings.install_script]),
                    resource_files,
                    wait_for_success: true,
                }),
                manager_task: Some(manager_task),
            })
            .await?;

        info!(job = %job_id, build = %build_id, live, pool = %pool.id, "Created test job");
        Ok(JobHandle {
            id: job_id,
            pool_id: pool.id,
            created: true,
        })
    }

    /// Signed download descriptors for every blob the build uploaded,
    /// placed relative to the node's working directory.
    async fn artifact_files(&self, build_id: &str) -> Result<Vec<ResourceFile>> {
        if !self.storage.container_exists(BUILDS_CONTAINER).await? {
            return Err(Error::BuildArtifactNotFound(build_id.to_string()));
        }

        let prefix = format!("{build_id}/");
        let blobs = self
            .storage
            .list_blobs(BUILDS_CONTAINER, Some(&prefix))
            .await?;
        if blobs.is_empty() {
            return Err(Error::BuildArtifactNotFound(build_id.to_string()));
        }

        let sas = self.storage.container_sas(
            BUILDS_CONTAINER,
            SasPermissions::READ,
            Utc::now() + ARTIFACT_READ_TTL,
        )?;

        Ok(blobs
            .into_iter()
            .filter_map(|blob| {
                let file_path = blob.strip_prefix(&prefix)?.to_string();
                Some(ResourceFile {
                    blob_source: self.storage.blob_url(BUILDS_CONTAINER, &blob, Some(&sas)),
                    file_path,
                })
            })
            .collect())
    }
}
