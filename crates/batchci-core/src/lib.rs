//! Core domain types and traits for batch-compute CI orchestration.
//!
//! This crate contains:
//! - Job identifiers, naming and metadata conventions
//! - Collaborator traits: compute service, object store, source control
//! - Per-job callback secrets
//! - Test-case heuristics applied to remote task output

pub mod compute;
pub mod error;
pub mod id;
pub mod naming;
pub mod secret;
pub mod source;
pub mod storage;
pub mod test_case;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use id::JobId;
