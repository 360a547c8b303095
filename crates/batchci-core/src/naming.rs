//! Job identifiers, well-known task and container names, and the metadata
//! bag attached to every remote job.

use chrono::{DateTime, Utc};

use crate::JobId;
use crate::compute::Metadata;
use crate::secret::Secret;

pub const BUILD_TASK_ID: &str = "build";
pub const REPORT_TASK_ID: &str = "report";
/// Manager task of a test job. Infrastructure, never a test case.
pub const MANAGER_TASK_ID: &str = "test-creator";
pub const BUILDS_CONTAINER: &str = "builds";

pub const USAGE_BUILD: &str = "build";
pub const USAGE_TEST: &str = "test";

pub mod keys {
    pub const USAGE: &str = "usage";
    pub const SECRET: &str = "secret";
    pub const SOURCE_URL: &str = "source_url";
    pub const SOURCE_SHA: &str = "source_sha";
    pub const BUILD: &str = "build";
    pub const LIVE: &str = "live";
}

/// Build jobs are named by the commit they build.
pub fn build_job_id(sha: &str) -> JobId {
    JobId::new(sha)
}

/// Test jobs are named by their creation second.
pub fn test_run_id(now: DateTime<Utc>) -> JobId {
    JobId::new(now.format("test-%Y%m%d-%H%M%S").to_string())
}

pub fn test_case_id(test_run_id: &str, task_id: &str) -> String {
    format!("{test_run_id}.{task_id}")
}

/// Per-run container receiving test task output.
pub fn output_container(test_run_id: &str) -> String {
    format!("output-{test_run_id}")
}

/// Blob holding a test task's stdout inside the output container.
pub fn stdout_blob(task_id: &str) -> String {
    format!("{task_id}/stdout.txt")
}

/// Artifact blob name for a build, from a `{sha}` template.
pub fn artifact_blob(template: &str, sha: &str) -> String {
    template.replace("{sha}", sha)
}

/// Wrap commands into a single fail-fast shell command line.
pub fn command_line<S: AsRef<str>>(commands: &[S]) -> String {
    let joined = commands
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(";");
    format!("/bin/bash -c 'set -e; set -o pipefail; {joined}; wait'")
}

pub fn build_metadata(secret: &Secret, source_url: &str, sha: &str) -> Metadata {
    Metadata::new()
        .with(keys::USAGE, USAGE_BUILD)
        .with(keys::SECRET, secret.expose())
        .with(keys::SOURCE_URL, source_url)
        .with(keys::SOURCE_SHA, sha)
}

pub fn test_metadata(secret: &Secret, build_id: &str, live: bool) -> Metadata {
    Metadata::new()
        .with(keys::USAGE, USAGE_TEST)
        .with(keys::SECRET, secret.expose())
        .with(keys::BUILD, build_id)
        .with(keys::LIVE, if live { "True" } else { "False" })
}

/// Typed accessors over a remote job's metadata.
pub trait JobMetadataExt {
    fn usage(&self) -> Option<&str>;
    fn secret(&self) -> Option<&str>;
    fn build_id(&self) -> Option<&str>;
    fn is_live(&self) -> bool;
}

impl JobMetadataExt for Metadata {
    fn usage(&self) -> Option<&str> {
        self.get(keys::USAGE)
    }

    fn secret(&self) -> Option<&str> {
        self.get(keys::SECRET)
    }

    fn build_id(&self) -> Option<&str> {
        self.get(keys::BUILD)
    }

    fn is_live(&self) -> bool {
        self.get(keys::LIVE)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}
