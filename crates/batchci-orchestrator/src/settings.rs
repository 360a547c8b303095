//! Settings shared by the orchestrators and the reconciler.

use batchci_config::{AutomationConfig, SystemConfig};
use batchci_core::secret::Secret;
use batchci_core::test_case::OutputTrim;
use chrono::Duration;

/// Lifetime of the write URL build tasks upload artifacts through.
pub const BUILD_UPLOAD_TTL: Duration = Duration::days(1);
/// Lifetime of the read URL test jobs download artifacts through.
pub const ARTIFACT_READ_TTL: Duration = Duration::days(1);
/// Lifetime of the write URL test tasks upload output through.
pub const OUTPUT_WRITE_TTL: Duration = Duration::days(1);
/// Lifetime of the read URL used to fetch a failed case's stdout.
pub const OUTPUT_READ_TTL: Duration = Duration::hours(1);
/// Lifetime of the download URL stored on a build.
pub const DOWNLOAD_URL_TTL: Duration = Duration::days(365);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub source_url: String,
    /// Base URL remote tasks call back to.
    pub public_url: String,
    pub build_script: String,
    pub artifact_pattern: String,
    pub artifact_blob: String,
    pub install_script: String,
    pub scheduler_script: String,
    pub output_trim: OutputTrim,
    pub batch_endpoint: String,
    pub batch_key: Secret,
    pub automation: Option<AutomationConfig>,
}

impl From<&SystemConfig> for OrchestratorSettings {
    fn from(config: &SystemConfig) -> Self {
        Self {
            source_url: config.source.url.clone(),
            public_url: config.server.public_url.clone(),
            build_script: config.build.script.clone(),
            artifact_pattern: config.build.artifact_pattern.clone(),
            artifact_blob: config.build.artifact_blob.clone(),
            install_script: config.test.install_script.clone(),
            scheduler_script: config.test.scheduler_script.clone(),
            output_trim: config.test.output_trim,
            batch_endpoint: config.batch.endpoint.clone(),
            batch_key: config.batch.key.clone(),
            automation: config.automation.clone(),
        }
    }
}

impl OrchestratorSettings {
    pub fn build_callback_url(&self, sha: &str) -> String {
        format!("{}/api/build/{}", self.public_url, sha)
    }

    pub fn test_callback_url(&self, job_id: &str) -> String {
        format!("{}/api/test/{}", self.public_url, job_id)
    }
}
