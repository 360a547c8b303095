//! Compute pool selection.

use batchci_core::compute::{ComputeService, Pool};
use batchci_core::naming::JobMetadataExt;
use batchci_core::{Error, Result};

/// First pool whose metadata tags it for `usage`.
pub async fn find_pool(compute: &dyn ComputeService, usage: &str) -> Result<Pool> {
    compute
        .list_pools()
        .await?
        .into_iter()
        .find(|pool| pool.metadata.usage() == Some(usage))
        .ok_or_else(|| Error::PoolNotFound(usage.to_string()))
}
