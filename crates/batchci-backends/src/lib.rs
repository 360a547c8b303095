//! Concrete collaborators for batch CI orchestration.
//!
//! Only the operations the orchestrators depend on are implemented:
//! - Azure Batch REST (jobs, tasks, pools)
//! - Azure Blob REST (containers, listing, shared access signatures)
//! - GitHub commits API

pub mod batch;
pub mod blob;
pub mod error;
pub mod github;
pub mod shared_key;

pub use batch::AzureBatchClient;
pub use blob::AzureBlobClient;
pub use error::BackendError;
pub use github::GitHubClient;
