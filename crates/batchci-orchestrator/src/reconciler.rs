//! Projection of remote job and task state into the store.
//!
//! The reconciler is the only writer of builds, test runs and test cases.
//! Every sync writes its result in one atomic step, so a sync that fails
//! halfway leaves the store as it was.

use std::sync::Arc;

use batchci_core::compute::{CloudJob, ComputeService};
use batchci_core::naming::{self, BUILD_TASK_ID, BUILDS_CONTAINER, JobMetadataExt, MANAGER_TASK_ID};
use batchci_core::source::{Commit, PushEvent, SourceControl};
use batchci_core::storage::{ObjectStore, SasPermissions};
use batchci_core::test_case::TestCaseDraft;
use batchci_core::{Error, Result};
use batchci_db::repo::build::INIT_STATE;
use batchci_db::{
    BuildRecord, BuildSync, CommitInfo, CompletionTotals, NewTestRun, Store, TestCaseRecord,
    TestRunRecord,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::build::BuildOrchestrator;
use crate::settings::{DOWNLOAD_URL_TTL, OUTPUT_READ_TTL, OrchestratorSettings};
use crate::Collaborators;

/// Commit a build sync starts from.
#[derive(Debug, Clone)]
pub enum CommitRef {
    /// Newest commit on the tracked branch.
    Latest,
    Sha(String),
    /// Already fetched, typically from a push event.
    Commit(Commit),
}

impl From<&str> for CommitRef {
    fn from(sha: &str) -> Self {
        CommitRef::Sha(sha.to_string())
    }
}

/// What a build sync may do to the remote build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPolicy {
    /// Mirror remote state only.
    Observe,
    /// Create a job when none exists. A completed job is kept.
    CreateIfMissing,
    /// Create a job when none exists, or replace a completed one.
    Rebuild,
}

pub struct Reconciler {
    compute: Arc<dyn ComputeService>,
    storage: Arc<dyn ObjectStore>,
    source: Arc<dyn SourceControl>,
    store: Store,
    builds: Arc<BuildOrchestrator>,
    settings: Arc<OrchestratorSettings>,
}

impl Reconciler {
    pub fn new(
        collaborators: &Collaborators,
        store: Store,
        builds: Arc<BuildOrchestrator>,
        settings: Arc<OrchestratorSettings>,
    ) -> Self {
        Self {
            compute: collaborators.compute.clone(),
            storage: collaborators.storage.clone(),
            source: collaborators.source.clone(),
            store,
            builds,
            settings,
        }
    }

    /// Bring the build for a commit up to date.
    ///
    /// Commit metadata is refreshed from source control. The remote job is
    /// created or replaced first as `policy` allows.
    /// The build state mirrors the remote `build` task, and a download URL
    /// is attached once the artifact blob exists.
    pub async fn sync_build(&self, commit: CommitRef, policy: JobPolicy) -> Result<BuildRecord> {
        let commit = self.resolve_commit(commit).await?;
        let sha = commit.sha.clone();

        let mut job = self.compute.get_job(&sha).await?;
        let needs_job = match policy {
            JobPolicy::Observe => false,
            JobPolicy::CreateIfMissing => job.is_none(),
            JobPolicy::Rebuild => job.as_ref().is_none_or(|j| j.state.is_completed()),
        };
        if needs_job {
            self.builds.create_build_job(&sha).await?;
            job = self.compute.get_job(&sha).await?;
        }

        let state = match &job {
            Some(job) => {
                let task = self
                    .compute
                    .get_task(&job.id, BUILD_TASK_ID)
                    .await?
                    .ok_or_else(|| Error::BuildTaskMissing {
                        job: job.id.clone(),
                        task: BUILD_TASK_ID.to_string(),
                    })?;
                Some(task.state.to_string())
            }
            None => None,
        };

        let has_download_url = self
            .store
            .builds
            .get(&sha)
            .await?
            .is_some_and(|b| b.build_download_url.is_some());
        let build_download_url = if has_download_url {
            None
        } else {
            self.download_url(&sha).await?
        };

        let record = self
            .store
            .builds
            .upsert_sync(BuildSync {
                id: sha,
                commit: CommitInfo::from(&commit),
                state,
                build_download_url,
            })
            .await?;

        debug!(build = %record.id, state = %record.state, "Synced build");
        Ok(record)
    }

    /// Sync every commit of a push. Only the head commit gets a build job,
    /// and only when it has none yet, so redelivered pushes are harmless.
    pub async fn sync_push(&self, event: &PushEvent) -> Result<Vec<BuildRecord>> {
        let head = event.head_sha().map(str::to_string);
        let mut records = Vec::new();
        for sha in event.commit_shas() {
            let policy = if head.as_deref() == Some(sha.as_str()) {
                JobPolicy::CreateIfMissing
            } else {
                JobPolicy::Observe
            };
            records.push(self.sync_build(CommitRef::Sha(sha), policy).await?);
        }
        info!(git_ref = %event.git_ref, builds = records.len(), "Synced push");
        Ok(records)
    }

    /// Bring a test run up to date. `None` when the run is not recorded
    /// locally.
    pub async fn sync_test_run(&self, job_id: &str) -> Result<Option<TestRunRecord>> {
        if self.store.test_runs.get(job_id).await?.is_none() {
            warn!(test_run = %job_id, "Test run is not recorded");
            return Ok(None);
        }

        let job = self
            .compute
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::RemoteJobMissing(job_id.to_string()))?;
        self.sync_test_run_with_job(&job).await.map(Some)
    }

    /// Mirror an already fetched remote job into its test run.
    ///
    /// A completed job records one case per task, the manager task
    /// excluded. Cases already stored are neither refetched nor rewritten.
    pub(crate) async fn sync_test_run_with_job(&self, job: &CloudJob) -> Result<TestRunRecord> {
        let state = job.state.to_string();
        if !job.state.is_completed() {
            return Ok(self.store.test_runs.update_state(&job.id, &state).await?);
        }

        let tasks = self.compute.list_tasks(&job.id).await?;
        let existing = self.store.test_runs.existing_case_ids(&job.id).await?;

        let mut totals = CompletionTotals::default();
        let mut cases = Vec::new();
        for task in tasks.iter().filter(|t| t.id != MANAGER_TASK_ID) {
            let draft = TestCaseDraft::from_task(&job.id, task);
            totals.total += 1;
            if !draft.passed {
                totals.failed += 1;
            }
            if existing.contains(&draft.id) {
                continue;
            }

            let output = if draft.passed {
                None
            } else {
                Some(self.failure_output(&job.id, &draft.task_id).await?)
            };
            cases.push(case_record(&job.id, draft, output));
        }

        let record = self
            .store
            .test_runs
            .record_completion(&job.id, &state, totals, cases)
            .await?;
        info!(
            test_run = %record.id,
            total = record.total_tests,
            failed = record.failed_tests,
            "Recorded completed test run"
        );
        Ok(record)
    }

    /// Record a freshly created test job, inserting its build when the
    /// store has not seen it yet. A run with the same id is replaced.
    pub async fn register_test_run(&self, job_id: &str) -> Result<TestRunRecord> {
        let job = self
            .compute
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::RemoteJobMissing(job_id.to_string()))?;
        let build_id = job
            .metadata
            .build_id()
            .ok_or_else(|| Error::InvalidInput(format!("job {job_id} names no build")))?
            .to_string();

        if self.store.builds.get(&build_id).await?.is_none() {
            let (creation_time, state) = match self.compute.get_job(&build_id).await? {
                Some(build_job) => (build_job.creation_time, build_job.state.to_string()),
                None => (Utc::now(), INIT_STATE.to_string()),
            };
            self.store
                .builds
                .insert_observed(&build_id, creation_time, &state)
                .await?;
        }

        let record = self
            .store
            .test_runs
            .register(NewTestRun {
                id: job.id.clone(),
                creation_time: job.creation_time,
                build_id,
                live: job.metadata.is_live(),
                state: job.state.to_string(),
            })
            .await?;
        Ok(record)
    }

    pub async fn suppress_build(&self, sha: &str) -> Result<()> {
        self.store.builds.set_suppressed(sha, true).await?;
        info!(build = %sha, "Suppressed build");
        Ok(())
    }

    /// Delete a build with its test runs and cases.
    pub async fn delete_build(&self, sha: &str) -> Result<()> {
        self.store.builds.delete(sha).await?;
        info!(build = %sha, "Deleted build");
        Ok(())
    }

    pub async fn delete_test_run(&self, job_id: &str) -> Result<()> {
        self.store.test_runs.delete(job_id).await?;
        info!(test_run = %job_id, "Deleted test run");
        Ok(())
    }

    async fn resolve_commit(&self, commit: CommitRef) -> Result<Commit> {
        match commit {
            CommitRef::Commit(commit) => Ok(commit),
            CommitRef::Sha(sha) => self.source.get_commit(&sha).await,
            CommitRef::Latest => self
                .source
                .list_commits(None)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::NotFound("no commits on the tracked branch".to_string())),
        }
    }

    /// Signed download URL of the build artifact, once uploaded. A stored
    /// URL is kept as is, so repeated syncs leave the row unchanged.
    async fn download_url(&self, sha: &str) -> Result<Option<String>> {
        let blob = naming::artifact_blob(&self.settings.artifact_blob, sha);
        if !self.storage.blob_exists(BUILDS_CONTAINER, &blob).await? {
            return Ok(None);
        }
        let sas = self.storage.blob_sas(
            BUILDS_CONTAINER,
            &blob,
            SasPermissions::READ,
            Utc::now() + DOWNLOAD_URL_TTL,
        )?;
        Ok(Some(self.storage.blob_url(BUILDS_CONTAINER, &blob, Some(&sas))))
    }

    async fn failure_output(&self, job_id: &str, task_id: &str) -> Result<String> {
        let container = naming::output_container(job_id);
        let blob = naming::stdout_blob(task_id);
        let sas = self.storage.blob_sas(
            &container,
            &blob,
            SasPermissions::READ,
            Utc::now() + OUTPUT_READ_TTL,
        )?;
        let text = self
            .storage
            .get_text(&self.storage.blob_url(&container, &blob, Some(&sas)))
            .await?;
        Ok(self.settings.output_trim.apply(&text))
    }
}

fn case_record(job_id: &str, draft: TestCaseDraft, output: Option<String>) -> TestCaseRecord {
    TestCaseRecord {
        id: draft.id,
        test_run_id: job_id.to_string(),
        passed: draft.passed,
        output,
        module: draft.module,
        state: draft.state,
        test_method: draft.test_method,
        test_class: draft.test_class,
        test_full_name: draft.test_full_name,
        duration_seconds: draft.duration_seconds,
    }
}
