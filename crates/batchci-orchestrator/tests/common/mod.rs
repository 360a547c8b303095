#![allow(dead_code)]

use std::sync::Arc;

use batchci_config::AutomationConfig;
use batchci_core::compute::{CloudTask, JobState, TaskState};
use batchci_core::secret::Secret;
use batchci_core::test_case::OutputTrim;
use batchci_core::testing::{FakeCompute, FakeSourceControl, FakeStorage};
use batchci_db::Store;
use batchci_orchestrator::{
    BuildOrchestrator, Collaborators, Gatekeeper, OrchestratorSettings, Reconciler,
    TestOrchestrator,
};
use chrono::{Duration, TimeZone, Utc};

pub struct Harness {
    pub compute: Arc<FakeCompute>,
    pub storage: Arc<FakeStorage>,
    pub source: Arc<FakeSourceControl>,
    pub store: Store,
    pub builds: Arc<BuildOrchestrator>,
    pub tests: TestOrchestrator,
    pub reconciler: Arc<Reconciler>,
    pub gatekeeper: Gatekeeper,
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        source_url: "https://github.com/example/project".to_string(),
        public_url: "https://ci.example.com".to_string(),
        build_script: "./scripts/batch/build_all.sh".to_string(),
        artifact_pattern: "gitsrc/artifacts/**/*.*".to_string(),
        artifact_blob: "azure-cli-{sha}.tar".to_string(),
        install_script: "./app/install.sh".to_string(),
        scheduler_script: "$AZ_BATCH_NODE_SHARED_DIR/app/schedule.sh".to_string(),
        output_trim: OutputTrim::default(),
        batch_endpoint: "https://account.westus.batch.azure.com".to_string(),
        batch_key: Secret::new("batch-key"),
        automation: Some(AutomationConfig {
            sp_name: "http://automation".to_string(),
            sp_password: Secret::new("sp-password"),
            sp_tenant: "tenant".to_string(),
        }),
    }
}

pub fn harness() -> Harness {
    harness_with(settings())
}

pub fn harness_with(settings: OrchestratorSettings) -> Harness {
    let compute = Arc::new(FakeCompute::new());
    let storage = Arc::new(FakeStorage::new());
    let source = Arc::new(FakeSourceControl::new());
    compute.add_pool("build-pool", "build");
    compute.add_pool("test-pool", "test");

    let collaborators = Collaborators {
        compute: compute.clone(),
        storage: storage.clone(),
        source: source.clone(),
    };
    let store = Store::memory();
    let settings = Arc::new(settings);

    let builds = Arc::new(BuildOrchestrator::new(&collaborators, settings.clone()));
    let tests = TestOrchestrator::new(&collaborators, settings.clone());
    let reconciler = Arc::new(Reconciler::new(
        &collaborators,
        store.clone(),
        builds.clone(),
        settings,
    ));
    let gatekeeper = Gatekeeper::new(&collaborators, store.clone(), reconciler.clone());

    Harness {
        compute,
        storage,
        source,
        store,
        builds,
        tests,
        reconciler,
        gatekeeper,
    }
}

/// A completed task whose display name follows the scheduler's format.
pub fn test_task(id: &str, method: &str, exit_code: i32) -> CloudTask {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    CloudTask {
        id: id.to_string(),
        display_name: Some(format!(
            "run {method} (azure.cli.command_modules.vm.tests.test_vm.VMTest)"
        )),
        state: TaskState::Completed,
        exit_code: Some(exit_code),
        start_time: Some(start),
        end_time: Some(start + Duration::seconds(42)),
    }
}

pub fn manager_task() -> CloudTask {
    CloudTask {
        id: "test-creator".to_string(),
        display_name: Some("Automation tasks creator".to_string()),
        state: TaskState::Completed,
        exit_code: Some(0),
        start_time: None,
        end_time: None,
    }
}

pub fn completed_build_task() -> CloudTask {
    CloudTask {
        id: "build".to_string(),
        display_name: Some("Build all product and test code.".to_string()),
        state: TaskState::Completed,
        exit_code: Some(0),
        start_time: None,
        end_time: None,
    }
}

/// Seed a completed build job for `sha` with the given secret.
pub fn seed_completed_build(h: &Harness, sha: &str, secret: &str) {
    let metadata = batchci_core::naming::build_metadata(
        &Secret::new(secret),
        "https://github.com/example/project",
        sha,
    );
    h.compute.insert_job(sha, JobState::Completed, metadata);
    h.compute.insert_task(sha, completed_build_task());
}

/// Seed a test job and its local run, with `tasks` attached.
pub async fn seed_test_run(
    h: &Harness,
    run_id: &str,
    build_id: &str,
    secret: &str,
    state: JobState,
    tasks: Vec<CloudTask>,
) {
    let metadata =
        batchci_core::naming::test_metadata(&Secret::new(secret), build_id, false);
    h.compute.insert_job(run_id, state, metadata);
    for task in tasks {
        h.compute.insert_task(run_id, task);
    }
    h.reconciler.register_test_run(run_id).await.unwrap();
}
