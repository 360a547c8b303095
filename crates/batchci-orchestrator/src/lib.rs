//! Job orchestration and state reconciliation.
//!
//! - [`BuildOrchestrator`] and [`TestOrchestrator`] create remote jobs
//! - [`Reconciler`] projects remote job and task state into the store
//! - [`Gatekeeper`] authenticates task callbacks before reconciling

pub mod build;
pub mod gatekeeper;
pub mod pool;
pub mod reconciler;
pub mod settings;
pub mod test_job;

pub use build::BuildOrchestrator;
pub use gatekeeper::{CallbackKind, CallbackOutcome, Gatekeeper};
pub use reconciler::{CommitRef, JobPolicy, Reconciler};
pub use settings::OrchestratorSettings;
pub use test_job::TestOrchestrator;

use batchci_core::compute::ComputeService;
use batchci_core::source::SourceControl;
use batchci_core::storage::ObjectStore;
use std::sync::Arc;

/// Remote collaborators, constructed once and injected everywhere.
#[derive(Clone)]
pub struct Collaborators {
    pub compute: Arc<dyn ComputeService>,
    pub storage: Arc<dyn ObjectStore>,
    pub source: Arc<dyn SourceControl>,
}
