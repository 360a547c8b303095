//! Application state.

use batchci_core::secret::Secret;
use batchci_db::Store;
use batchci_orchestrator::{
    BuildOrchestrator, Collaborators, Gatekeeper, OrchestratorSettings, Reconciler,
    TestOrchestrator,
};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub builds: Arc<BuildOrchestrator>,
    pub tests: Arc<TestOrchestrator>,
    pub reconciler: Arc<Reconciler>,
    pub gatekeeper: Arc<Gatekeeper>,
    /// Bearer token operator routes require. Unset rejects every operator call.
    pub operator_token: Option<Secret>,
    /// Branch whose pushes are synced.
    pub branch: String,
}

impl AppState {
    pub fn new(
        collaborators: Collaborators,
        store: Store,
        settings: OrchestratorSettings,
        operator_token: Option<Secret>,
        branch: impl Into<String>,
    ) -> Self {
        let settings = Arc::new(settings);
        let builds = Arc::new(BuildOrchestrator::new(&collaborators, settings.clone()));
        let tests = Arc::new(TestOrchestrator::new(&collaborators, settings.clone()));
        let reconciler = Arc::new(Reconciler::new(
            &collaborators,
            store.clone(),
            builds.clone(),
            settings,
        ));
        let gatekeeper = Arc::new(Gatekeeper::new(
            &collaborators,
            store.clone(),
            reconciler.clone(),
        ));

        Self {
            store,
            builds,
            tests,
            reconciler,
            gatekeeper,
            operator_token,
            branch: branch.into(),
        }
    }
}
