//! Read-only projections of stored records.
//!
//! Each view mirrors its record's fields and adds the derived values the
//! dashboards show: short sha, commit subject, formatted date and pass rate.

use batchci_db::{AccessKeyRecord, BuildRecord, TestCaseRecord, TestRunRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const SHORT_SHA_LEN: usize = 6;
pub const NOT_AVAILABLE: &str = "N/A";

/// Build state as returned to task callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct BuildView {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub state: String,
}

impl From<&BuildRecord> for BuildView {
    fn from(build: &BuildRecord) -> Self {
        Self {
            id: build.id.clone(),
            creation_time: build.creation_time,
            state: build.state.clone(),
        }
    }
}

/// Test run state as returned to task callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunView {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub state: String,
    pub total_tests: i32,
    pub failed_tests: i32,
}

impl From<&TestRunRecord> for TestRunView {
    fn from(run: &TestRunRecord) -> Self {
        Self {
            id: run.id.clone(),
            creation_time: run.creation_time,
            state: run.state.clone(),
            total_tests: run.total_tests,
            failed_tests: run.failed_tests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunSummary {
    #[serde(flatten)]
    pub run: TestRunView,
    pub build_id: String,
    pub live: bool,
    pub pass_percentage: i32,
}

impl From<&TestRunRecord> for TestRunSummary {
    fn from(run: &TestRunRecord) -> Self {
        Self {
            run: TestRunView::from(run),
            build_id: run.build_id.clone(),
            live: run.live,
            pass_percentage: pass_percentage(run.total_tests, run.failed_tests),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunDetail {
    #[serde(flatten)]
    pub summary: TestRunSummary,
    pub cases: Vec<TestCaseView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseView {
    pub id: String,
    pub passed: bool,
    pub module: String,
    pub state: String,
    pub test_method: String,
    pub test_class: String,
    pub test_full_name: String,
    pub duration_seconds: i32,
    pub output: Option<String>,
}

impl From<TestCaseRecord> for TestCaseView {
    fn from(case: TestCaseRecord) -> Self {
        Self {
            id: case.id,
            passed: case.passed,
            module: case.module,
            state: case.state,
            test_method: case.test_method,
            test_class: case.test_class,
            test_full_name: case.test_full_name,
            duration_seconds: case.duration_seconds,
            output: case.output,
        }
    }
}

/// One line of the build listing.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub id: String,
    pub short_sha: String,
    pub commit_subject: String,
    pub commit_date: String,
    pub commit_author: Option<String>,
    pub state: String,
    pub creation_time: DateTime<Utc>,
    pub suppressed: bool,
}

impl From<&BuildRecord> for BuildSummary {
    fn from(build: &BuildRecord) -> Self {
        Self {
            id: build.id.clone(),
            short_sha: short_sha(&build.id),
            commit_subject: commit_subject(build.commit_message.as_deref()),
            commit_date: commit_date(build.commit_date),
            commit_author: build.commit_author.clone(),
            state: build.state.clone(),
            creation_time: build.creation_time,
            suppressed: build.suppressed,
        }
    }
}

/// A build with the outcome of its most recent live test run.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub build: BuildSummary,
    pub commit_url: Option<String>,
    pub build_download_url: Option<String>,
    pub live_test_run: Option<TestRunSummary>,
    pub failed_cases: Vec<TestCaseView>,
}

impl Snapshot {
    pub fn new(
        build: &BuildRecord,
        live_run: Option<&TestRunRecord>,
        cases: Vec<TestCaseRecord>,
    ) -> Self {
        Self {
            build: BuildSummary::from(build),
            commit_url: build.commit_url.clone(),
            build_download_url: build.build_download_url.clone(),
            live_test_run: live_run.map(TestRunSummary::from),
            failed_cases: cases
                .into_iter()
                .filter(|c| !c.passed)
                .map(TestCaseView::from)
                .collect(),
        }
    }
}

/// An access key without its values.
#[derive(Debug, Clone, Serialize)]
pub struct AccessKeyView {
    pub name: String,
    pub remark: Option<String>,
}

impl From<&AccessKeyRecord> for AccessKeyView {
    fn from(key: &AccessKeyRecord) -> Self {
        Self {
            name: key.name.clone(),
            remark: key.remark.clone(),
        }
    }
}

/// An access key with its values, shown once on creation and rotation.
#[derive(Serialize)]
pub struct IssuedAccessKey {
    pub name: String,
    pub key1: String,
    pub key2: String,
    pub remark: Option<String>,
}

impl From<AccessKeyRecord> for IssuedAccessKey {
    fn from(key: AccessKeyRecord) -> Self {
        Self {
            name: key.name,
            key1: key.key1,
            key2: key.key2,
            remark: key.remark,
        }
    }
}

/// Percentage of passing tests, rounded down. Zero for an empty run.
pub fn pass_percentage(total: i32, failed: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    (total - failed) * 100 / total
}

pub fn short_sha(sha: &str) -> String {
    sha.chars().take(SHORT_SHA_LEN).collect()
}

/// First line of a commit message.
pub fn commit_subject(message: Option<&str>) -> String {
    message
        .and_then(|m| m.lines().next())
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn commit_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pass_percentage() {
        assert_eq!(pass_percentage(0, 0), 0);
        assert_eq!(pass_percentage(4, 1), 75);
        assert_eq!(pass_percentage(3, 1), 66);
        assert_eq!(pass_percentage(7, 0), 100);
        assert_eq!(pass_percentage(2, 2), 0);
    }

    #[test]
    fn test_commit_fields() {
        assert_eq!(short_sha("abc123def456"), "abc123");
        assert_eq!(short_sha("abc"), "abc");
        assert_eq!(commit_subject(Some("Fix vm create\n\nLonger body")), "Fix vm create");
        assert_eq!(commit_subject(Some("")), "N/A");
        assert_eq!(commit_subject(None), "N/A");

        let date = Utc.with_ymd_and_hms(2023, 1, 5, 12, 0, 0).unwrap();
        assert_eq!(commit_date(Some(date)), "Jan 05, 2023");
        assert_eq!(commit_date(None), "N/A");
    }

    #[test]
    fn test_snapshot_keeps_only_failed_cases() {
        let build = BuildRecord {
            id: "abc123def".to_string(),
            creation_time: Utc::now(),
            state: "completed".to_string(),
            commit_author: None,
            commit_message: Some("Fix".to_string()),
            commit_date: None,
            commit_url: None,
            build_download_url: None,
            suppressed: false,
        };
        let case = |id: &str, passed: bool| TestCaseRecord {
            id: id.to_string(),
            test_run_id: "test-1".to_string(),
            passed,
            output: None,
            module: "VM".to_string(),
            state: "completed".to_string(),
            test_method: "test_x".to_string(),
            test_class: "VMTest".to_string(),
            test_full_name: "VMTest.test_x".to_string(),
            duration_seconds: 1,
        };

        let snapshot = Snapshot::new(&build, None, vec![case("a", true), case("b", false)]);
        assert_eq!(snapshot.build.short_sha, "abc123");
        assert_eq!(snapshot.failed_cases.len(), 1);
        assert_eq!(snapshot.failed_cases[0].id, "b");
    }
}
