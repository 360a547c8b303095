mod common;

use batchci_core::Error;
use batchci_core::compute::{JobState, Metadata, UploadCondition};
use batchci_core::naming::JobMetadataExt;
use batchci_core::testing::FakeCompute;
use batchci_orchestrator::{BuildOrchestrator, Collaborators};
use common::{harness, settings};
use std::sync::Arc;

#[tokio::test]
async fn test_creates_build_job_with_build_and_report_tasks() {
    let h = harness();

    let handle = h.builds.create_build_job("abc123").await.unwrap();
    assert!(handle.created);
    assert_eq!(handle.id.as_str(), "abc123");
    assert_eq!(handle.pool_id, "build-pool");

    let job = h.compute.job("abc123").unwrap();
    let spec = job.spec.unwrap();
    assert!(spec.uses_task_dependencies);
    assert!(spec.terminate_on_completion);
    assert_eq!(spec.metadata.usage(), Some("build"));
    assert_eq!(spec.metadata.get("source_sha"), Some("abc123"));
    // 64 random bytes, base64 encoded.
    assert_eq!(spec.metadata.secret().unwrap().len(), 88);

    let build = &job.task_specs[0];
    assert_eq!(build.id, "build");
    assert!(build.command_line.contains("git clone --depth=50 https://github.com/example/project gitsrc"));
    assert!(build.command_line.contains("git checkout -qf abc123"));
    assert!(build.command_line.contains("./scripts/batch/build_all.sh"));
    let output = &build.output_files[0];
    assert_eq!(output.path, "abc123");
    assert_eq!(output.upload_condition, UploadCondition::TaskSuccess);
    assert!(output.container_url.contains("sp=wl"));
    assert!(h.storage.has_container("builds"));

    let report = &job.task_specs[1];
    assert_eq!(report.id, "report");
    assert_eq!(report.depends_on, vec!["build".to_string()]);
    assert!(report.command_line.contains("https://ci.example.com/api/build/abc123"));
}

#[tokio::test]
async fn test_running_job_is_returned_without_recreation() {
    let h = harness();
    h.compute
        .insert_job("abc123", JobState::Active, Metadata::new());

    let handle = h.builds.create_build_job("abc123").await.unwrap();
    assert!(!handle.created);
    assert!(h.compute.created_jobs().is_empty());
    assert!(h.compute.deleted_jobs().is_empty());
}

#[tokio::test]
async fn test_completed_job_is_replaced_with_a_fresh_secret() {
    let h = harness();
    common::seed_completed_build(&h, "abc123", "old-secret");

    let handle = h.builds.create_build_job("abc123").await.unwrap();
    assert!(handle.created);
    assert_eq!(h.compute.deleted_jobs(), vec!["abc123".to_string()]);
    assert_eq!(h.compute.created_jobs(), vec!["abc123".to_string()]);

    let job = h.compute.job("abc123").unwrap();
    assert_eq!(job.job.state, JobState::Active);
    assert_ne!(job.job.metadata.secret(), Some("old-secret"));
}

#[tokio::test]
async fn test_completed_job_deleted_concurrently_is_still_replaced() {
    let h = harness();
    common::seed_completed_build(&h, "abc123", "old-secret");
    h.compute.vanish_on_next_delete();

    let handle = h.builds.create_build_job("abc123").await.unwrap();
    assert!(handle.created);
    assert_eq!(h.compute.deleted_jobs(), vec!["abc123".to_string()]);
    assert_eq!(h.compute.created_jobs(), vec!["abc123".to_string()]);
    assert_eq!(h.compute.job("abc123").unwrap().task_specs.len(), 2);
}

#[tokio::test]
async fn test_secrets_differ_between_jobs() {
    let h = harness();
    h.builds.create_build_job("aaa").await.unwrap();
    h.builds.create_build_job("bbb").await.unwrap();

    let a = h.compute.job("aaa").unwrap().job.metadata;
    let b = h.compute.job("bbb").unwrap().job.metadata;
    assert_ne!(a.secret(), b.secret());
}

#[tokio::test]
async fn test_missing_pool_creates_nothing() {
    let compute = Arc::new(FakeCompute::new());
    let storage = Arc::new(batchci_core::testing::FakeStorage::new());
    let collaborators = Collaborators {
        compute: compute.clone(),
        storage: storage.clone(),
        source: Arc::new(batchci_core::testing::FakeSourceControl::new()),
    };
    let builds = BuildOrchestrator::new(&collaborators, Arc::new(settings()));

    let err = builds.create_build_job("abc123").await.unwrap_err();
    assert!(matches!(err, Error::PoolNotFound(usage) if usage == "build"));
    assert_eq!(compute.job_count(), 0);
    assert!(!storage.has_container("builds"));
}

#[tokio::test]
async fn test_remote_create_failure_propagates() {
    let h = harness();
    h.compute.fail_next_create("quota exceeded");

    let err = h.builds.create_build_job("abc123").await.unwrap_err();
    assert!(matches!(err, Error::Remote(msg) if msg == "quota exceeded"));
    assert!(h.compute.job("abc123").is_none());
}
