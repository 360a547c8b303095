//! Source-control abstraction and the parts of a push event we consume.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A commit descriptor as returned by the source-control host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author: Option<String>,
    /// Committer date.
    pub date: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub html_url: Option<String>,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn get_commit(&self, sha: &str) -> Result<Commit>;

    /// Commits on the configured branch, newest first.
    async fn list_commits(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Commit>>;
}

/// The subset of a GitHub push event needed to sync commits.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    pub head_commit: Option<PushCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    pub id: String,
}

impl PushEvent {
    /// Commit shas in the push, with the head commit last.
    pub fn commit_shas(&self) -> Vec<String> {
        let mut shas: Vec<String> = self.commits.iter().map(|c| c.id.clone()).collect();
        if let Some(head) = &self.head_commit {
            shas.retain(|sha| sha != &head.id);
            shas.push(head.id.clone());
        }
        shas
    }

    pub fn head_sha(&self) -> Option<&str> {
        self.head_commit
            .as_ref()
            .map(|c| c.id.as_str())
            .or_else(|| self.commits.last().map(|c| c.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_event_puts_head_last() {
        let event: PushEvent = serde_json::from_str(
            r#"{
                "ref": "refs/heads/master",
                "commits": [{"id": "aaa"}, {"id": "bbb"}, {"id": "ccc"}],
                "head_commit": {"id": "bbb"}
            }"#,
        )
        .unwrap();
        assert_eq!(event.git_ref, "refs/heads/master");
        assert_eq!(event.commit_shas(), vec!["aaa", "ccc", "bbb"]);
        assert_eq!(event.head_sha(), Some("bbb"));
    }

    #[test]
    fn test_push_event_without_head() {
        let event: PushEvent = serde_json::from_str(r#"{"commits": [{"id": "aaa"}]}"#).unwrap();
        assert_eq!(event.head_sha(), Some("aaa"));

        let empty: PushEvent = serde_json::from_str(r#"{"ref": "refs/tags/x"}"#).unwrap();
        assert!(empty.commit_shas().is_empty());
        assert_eq!(empty.head_sha(), None);
    }
}
