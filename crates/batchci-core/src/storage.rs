//! Object storage abstraction: containers, blobs and signed access URLs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::Result;

/// Permissions granted by a shared access signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub write: bool,
    pub list: bool,
}

impl SasPermissions {
    pub const READ: Self = Self {
        read: true,
        write: false,
        list: false,
    };

    pub const WRITE_LIST: Self = Self {
        read: false,
        write: true,
        list: true,
    };

    pub const READ_LIST: Self = Self {
        read: true,
        write: false,
        list: true,
    };
}

impl fmt::Display for SasPermissions {
    /// Canonical permission string, in the `r w l` order storage expects.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        if self.list {
            f.write_str("l")?;
        }
        Ok(())
    }
}

/// Client for the blob storage service.
///
/// Signing is local computation and therefore synchronous. Everything else
/// is a network call with no internal retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a container. Succeeds when it already exists.
    async fn create_container(&self, container: &str) -> Result<()>;

    async fn container_exists(&self, container: &str) -> Result<bool>;

    /// Names of blobs in `container` starting with `prefix`.
    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool>;

    /// Fetch a blob as text through a (signed) URL.
    async fn get_text(&self, url: &str) -> Result<String>;

    /// Shared access signature query string for a whole container.
    fn container_sas(
        &self,
        container: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Result<String>;

    /// Shared access signature query string for a single blob.
    fn blob_sas(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Result<String>;

    /// HTTPS URL of a container, with the signature appended when given.
    fn container_url(&self, container: &str, sas: Option<&str>) -> String;

    /// HTTPS URL of a blob, with the signature appended when given.
    fn blob_url(&self, container: &str, blob: &str, sas: Option<&str>) -> String;
}

/// Append a SAS query string to a base URL.
pub fn with_sas(base: String, sas: Option<&str>) -> String {
    match sas {
        Some(sas) if !sas.is_empty() => format!("{base}?{}", sas.trim_start_matches('?')),
        _ => base,
    }
}
