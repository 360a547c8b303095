//! Repository traits and implementations.

pub mod access_key;
pub mod build;
pub mod test_run;
pub mod webhook_event;

pub use access_key::{AccessKeyRecord, AccessKeyRepo, PgAccessKeyRepo};
pub use build::{BuildRecord, BuildRepo, BuildSync, CommitInfo, PgBuildRepo};
pub use test_run::{
    CompletionTotals, NewTestRun, PgTestRunRepo, TestCaseRecord, TestRunRecord, TestRunRepo,
};
pub use webhook_event::{PgWebhookEventRepo, WebhookEventRecord, WebhookEventRepo};
