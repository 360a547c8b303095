mod common;

use batchci_core::Error;
use batchci_core::compute::{ComputeService, JobState, TaskState};
use batchci_core::testing::commit;
use batchci_orchestrator::{CallbackKind, CallbackOutcome, CommitRef, JobPolicy};
use common::{harness, manager_task, seed_completed_build, seed_test_run, test_task};

const SECRET: &str = "c2VjcmV0LXNlY3JldC1zZWNyZXQ=";

async fn seeded_build() -> common::Harness {
    let h = harness();
    h.source.push_commit(commit("abc123", "Fix"));
    seed_completed_build(&h, "abc123", SECRET);
    h.compute
        .set_task_state("abc123", "build", TaskState::Running);
    h.reconciler
        .sync_build(CommitRef::from("abc123"), JobPolicy::Observe)
        .await
        .unwrap();
    h.compute
        .set_task_state("abc123", "build", TaskState::Completed);
    h
}

#[tokio::test]
async fn test_build_callback_with_matching_secret_reconciles() {
    let h = seeded_build().await;

    let outcome = h
        .gatekeeper
        .authenticate_and_reconcile("abc123", Some(SECRET), CallbackKind::Build)
        .await
        .unwrap();
    let CallbackOutcome::Build(build) = outcome else {
        panic!("expected a build outcome");
    };
    assert_eq!(build.state, "completed");
}

#[tokio::test]
async fn test_missing_secret_is_checked_first() {
    let h = harness();

    for provided in [None, Some("")] {
        let err = h
            .gatekeeper
            .authenticate_and_reconcile("unknown", provided, CallbackKind::Build)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSecret));
    }
}

#[tokio::test]
async fn test_unknown_build_is_not_found() {
    let h = harness();
    seed_completed_build(&h, "abc123", SECRET);

    let err = h
        .gatekeeper
        .authenticate_and_reconcile("abc123", Some(SECRET), CallbackKind::Build)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_missing_remote_job_is_reported() {
    let h = seeded_build().await;
    h.compute.delete_job("abc123").await.unwrap();

    let err = h
        .gatekeeper
        .authenticate_and_reconcile("abc123", Some(SECRET), CallbackKind::Build)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteJobMissing(id) if id == "abc123"));
}

#[tokio::test]
async fn test_wrong_secret_leaves_build_untouched() {
    let h = seeded_build().await;

    let err = h
        .gatekeeper
        .authenticate_and_reconcile("abc123", Some("not-the-secret"), CallbackKind::Build)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SecretMismatch));
    let build = h.store.builds.get("abc123").await.unwrap().unwrap();
    assert_eq!(build.state, "running");
}

#[tokio::test]
async fn test_missing_build_task_after_authentication() {
    let h = harness();
    h.source.push_commit(commit("abc123", "Fix"));
    h.reconciler
        .sync_build(CommitRef::from("abc123"), JobPolicy::Observe)
        .await
        .unwrap();
    let metadata = batchci_core::naming::build_metadata(
        &batchci_core::secret::Secret::new(SECRET),
        "https://github.com/example/project",
        "abc123",
    );
    h.compute.insert_job("abc123", JobState::Active, metadata);

    let err = h
        .gatekeeper
        .authenticate_and_reconcile("abc123", Some(SECRET), CallbackKind::Build)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BuildTaskMissing { .. }));
}

#[tokio::test]
async fn test_test_run_callback_records_results() {
    let h = harness();
    let run = "test-20230101-000000";
    seed_test_run(
        &h,
        run,
        "abc123",
        SECRET,
        JobState::Completed,
        vec![manager_task(), test_task("task-1", "test_create_vm", 0)],
    )
    .await;

    let outcome = h
        .gatekeeper
        .authenticate_and_reconcile(run, Some(SECRET), CallbackKind::TestRun)
        .await
        .unwrap();
    let CallbackOutcome::TestRun(record) = outcome else {
        panic!("expected a test run outcome");
    };
    assert_eq!(record.total_tests, 1);
    assert_eq!(record.failed_tests, 0);
}

#[tokio::test]
async fn test_test_run_callback_checks_the_run_table() {
    let h = seeded_build().await;

    // A build id is not a test run.
    let err = h
        .gatekeeper
        .authenticate_and_reconcile("abc123", Some(SECRET), CallbackKind::TestRun)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
