mod common;

use batchci_core::Error;
use batchci_core::naming::JobMetadataExt;
use common::{harness, harness_with, settings};

fn seed_artifacts(h: &common::Harness, build_id: &str) {
    h.storage
        .put_blob("builds", &format!("{build_id}/app/install.sh"), "#!/bin/bash");
    h.storage
        .put_blob("builds", &format!("{build_id}/azure-cli.tar"), "tar");
    h.storage.put_blob("builds", "other/azure-cli.tar", "tar");
}

fn env<'a>(settings: &'a [batchci_core::compute::EnvironmentSetting], name: &str) -> Option<&'a str> {
    settings
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.value.as_str())
}

#[tokio::test]
async fn test_creates_test_job_from_build_artifacts() {
    let h = harness();
    seed_artifacts(&h, "abc123");

    let handle = h.tests.create_test_job("abc123", false).await.unwrap();
    assert!(handle.created);
    assert!(handle.id.as_str().starts_with("test-"));
    assert_eq!(handle.pool_id, "test-pool");

    let spec = h.compute.job(handle.id.as_str()).unwrap().spec.unwrap();
    assert!(spec.uses_task_dependencies);
    assert_eq!(
        spec.display_name.as_deref(),
        Some("Automation on build abc123. Live: False")
    );
    assert_eq!(spec.metadata.usage(), Some("test"));
    assert_eq!(spec.metadata.build_id(), Some("abc123"));
    assert!(!spec.metadata.is_live());
    assert!(spec.terminate_on_completion);

    let prep = spec.preparation_task.unwrap();
    assert!(prep.wait_for_success);
    assert!(prep.command_line.contains("./app/install.sh"));
    let mut paths: Vec<_> = prep.resource_files.iter().map(|f| f.file_path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["app/install.sh", "azure-cli.tar"]);
    assert!(prep.resource_files.iter().all(|f| f.blob_source.contains("sp=r")));

    let manager = spec.manager_task.unwrap();
    assert_eq!(manager.id, "test-creator");
    assert!(!manager.kill_job_on_completion);
    assert_eq!(env(&manager.environment, "AZURE_BATCH_KEY"), Some("batch-key"));
    assert_eq!(
        env(&manager.environment, "AUTOMATION_CALLBACK_URL"),
        Some(format!("https://ci.example.com/api/test/{}", handle.id).as_str())
    );
    assert_eq!(
        env(&manager.environment, "AUTOMATION_CALLBACK_SECRET"),
        spec.metadata.secret()
    );

    let output = format!("output-{}", handle.id);
    assert!(h.storage.has_container(&output));
    assert!(env(&spec.common_environment, "AUTOMATION_OUTPUT_CONTAINER").is_some());
    assert!(env(&spec.common_environment, "AZURE_TEST_RUN_LIVE").is_none());
}

#[tokio::test]
async fn test_live_run_carries_automation_credentials() {
    let h = harness();
    seed_artifacts(&h, "abc123");

    let handle = h.tests.create_test_job("abc123", true).await.unwrap();
    let spec = h.compute.job(handle.id.as_str()).unwrap().spec.unwrap();
    assert!(spec.metadata.is_live());
    assert_eq!(env(&spec.common_environment, "AZURE_TEST_RUN_LIVE"), Some("True"));
    assert_eq!(env(&spec.common_environment, "AUTOMATION_SP_PASSWORD"), Some("sp-password"));
    assert_eq!(env(&spec.common_environment, "AUTOMATION_SP_TENANT"), Some("tenant"));
}

#[tokio::test]
async fn test_live_run_without_credentials_is_rejected() {
    let mut settings = settings();
    settings.automation = None;
    let h = harness_with(settings);
    seed_artifacts(&h, "abc123");

    let err = h.tests.create_test_job("abc123", true).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(h.compute.job_count(), 0);
}

#[tokio::test]
async fn test_missing_builds_container_is_artifact_not_found() {
    let h = harness();

    let err = h.tests.create_test_job("abc123", false).await.unwrap_err();
    assert!(matches!(err, Error::BuildArtifactNotFound(id) if id == "abc123"));
    assert_eq!(h.compute.job_count(), 0);
}

#[tokio::test]
async fn test_build_without_blobs_is_artifact_not_found() {
    let h = harness();
    seed_artifacts(&h, "other-build");

    let err = h.tests.create_test_job("abc123", false).await.unwrap_err();
    assert!(matches!(err, Error::BuildArtifactNotFound(_)));
    assert_eq!(h.compute.job_count(), 0);
}

#[tokio::test]
async fn test_missing_test_pool_is_pool_not_found() {
    let h = harness();
    seed_artifacts(&h, "abc123");
    let compute = batchci_core::testing::FakeCompute::new();
    compute.add_pool("build-pool", "build");
    let collaborators = batchci_orchestrator::Collaborators {
        compute: std::sync::Arc::new(compute),
        storage: h.storage.clone(),
        source: h.source.clone(),
    };
    let tests = batchci_orchestrator::TestOrchestrator::new(
        &collaborators,
        std::sync::Arc::new(settings()),
    );

    let err = tests.create_test_job("abc123", false).await.unwrap_err();
    assert!(matches!(err, Error::PoolNotFound(usage) if usage == "test"));
}

#[tokio::test]
async fn test_remote_create_failure_propagates() {
    let h = harness();
    seed_artifacts(&h, "abc123");
    h.compute.fail_next_create("pool resizing");

    let err = h.tests.create_test_job("abc123", false).await.unwrap_err();
    assert!(matches!(err, Error::Remote(msg) if msg == "pool resizing"));
}
