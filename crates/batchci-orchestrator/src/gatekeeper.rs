//! Authentication of task callbacks.
//!
//! Remote tasks call back with the secret generated when their job was
//! created. A callback is reconciled only once that secret matches the one
//! recorded in the remote job's metadata.

use std::sync::Arc;

use batchci_core::compute::ComputeService;
use batchci_core::naming::JobMetadataExt;
use batchci_core::secret::secrets_match;
use batchci_core::{Error, Result};
use batchci_db::{BuildRecord, Store, TestRunRecord};
use tracing::warn;

use crate::reconciler::{CommitRef, JobPolicy, Reconciler};
use crate::Collaborators;

/// Which kind of job a callback refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Build,
    TestRun,
}

#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Build(BuildRecord),
    TestRun(TestRunRecord),
}

pub struct Gatekeeper {
    compute: Arc<dyn ComputeService>,
    store: Store,
    reconciler: Arc<Reconciler>,
}

impl Gatekeeper {
    pub fn new(collaborators: &Collaborators, store: Store, reconciler: Arc<Reconciler>) -> Self {
        Self {
            compute: collaborators.compute.clone(),
            store,
            reconciler,
        }
    }

    /// Check a callback's secret, then reconcile the job it refers to.
    ///
    /// Checks run in a fixed order: secret present, job recorded locally,
    /// job present remotely, secret matching. The first failing check
    /// decides the error.
    pub async fn authenticate_and_reconcile(
        &self,
        job_id: &str,
        provided: Option<&str>,
        kind: CallbackKind,
    ) -> Result<CallbackOutcome> {
        let provided = match provided {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!(job = %job_id, ?kind, "Callback without secret");
                return Err(Error::MissingSecret);
            }
        };

        let known = match kind {
            CallbackKind::Build => self.store.builds.get(job_id).await?.is_some(),
            CallbackKind::TestRun => self.store.test_runs.get(job_id).await?.is_some(),
        };
        if !known {
            warn!(job = %job_id, ?kind, "Callback for unknown job");
            return Err(Error::NotFound(format!("job {job_id}")));
        }

        let job = self
            .compute
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::RemoteJobMissing(job_id.to_string()))?;

        let expected = job.metadata.secret().unwrap_or_default();
        if !secrets_match(expected, provided) {
            warn!(job = %job_id, ?kind, "Callback secret mismatch");
            return Err(Error::SecretMismatch);
        }

        match kind {
            CallbackKind::Build => self
                .reconciler
                .sync_build(CommitRef::from(job_id), JobPolicy::Observe)
                .await
                .map(CallbackOutcome::Build),
            CallbackKind::TestRun => self
                .reconciler
                .sync_test_run_with_job(&job)
                .await
                .map(CallbackOutcome::TestRun),
        }
    }
}
