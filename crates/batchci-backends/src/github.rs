//! GitHub commits API client.

use async_trait::async_trait;
use batchci_config::SourceConfig;
use batchci_core::secret::Secret;
use batchci_core::source::{Commit, SourceControl};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::BackendError;

const USER_AGENT: &str = "batchci";
const PAGE_SIZE: u32 = 100;

/// Read-only client for one repository's commits on one branch.
pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    branch: String,
    token: Option<Secret>,
}

impl GitHubClient {
    pub fn new(config: &SourceConfig) -> Result<Self, BackendError> {
        let (owner, repo) = parse_repository(&config.url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_base: format!("https://api.github.com/repos/{}/{}", owner, repo),
            branch: config.branch.clone(),
            token: config.token.clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, BackendError> {
        let mut request = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token.expose()));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await);
        }
        Ok(response)
    }
}

/// `https://github.com/<owner>/<repo>[.git]` into its owner and repo.
fn parse_repository(url: &str) -> Result<(String, String), BackendError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| BackendError::Parse(format!("source url {}: {}", url, e)))?;
    let mut segments = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => Err(BackendError::Parse(format!(
            "source url {} does not name a repository",
            url
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<Signature>,
    committer: Option<Signature>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

impl From<CommitResponse> for Commit {
    fn from(response: CommitResponse) -> Self {
        Self {
            sha: response.sha,
            author: response.commit.author.and_then(|a| a.name),
            date: response.commit.committer.and_then(|c| c.date),
            message: response.commit.message,
            html_url: response.html_url,
        }
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn get_commit(&self, sha: &str) -> batchci_core::Result<Commit> {
        let url = format!("{}/commits/{}", self.api_base, urlencoding::encode(sha));
        let commit: CommitResponse = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(commit.into())
    }

    async fn list_commits(&self, since: Option<DateTime<Utc>>) -> batchci_core::Result<Vec<Commit>> {
        let mut url = format!(
            "{}/commits?sha={}&per_page={}",
            self.api_base,
            urlencoding::encode(&self.branch),
            PAGE_SIZE
        );
        if let Some(since) = since {
            url.push_str(&format!(
                "&since={}",
                urlencoding::encode(&since.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            ));
        }
        let commits: Vec<CommitResponse> = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(commits.into_iter().map(Commit::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repository() {
        assert_eq!(
            parse_repository("https://github.com/Azure/azure-cli").unwrap(),
            ("Azure".to_string(), "azure-cli".to_string())
        );
        assert_eq!(
            parse_repository("https://github.com/Azure/azure-cli.git/").unwrap(),
            ("Azure".to_string(), "azure-cli".to_string())
        );
        assert!(parse_repository("https://github.com/Azure").is_err());
        assert!(parse_repository("not a url").is_err());
    }

    #[test]
    fn test_commit_from_response() {
        let response: CommitResponse = serde_json::from_str(
            r#"{
                "sha": "abc123",
                "commit": {
                    "author": {"name": "Ada", "date": "2023-01-01T00:00:00Z"},
                    "committer": {"name": "GitHub", "date": "2023-01-02T03:04:05Z"},
                    "message": "Fix the thing\n\nLonger body"
                },
                "html_url": "https://github.com/o/r/commit/abc123"
            }"#,
        )
        .unwrap();
        let commit = Commit::from(response);
        assert_eq!(commit.author.as_deref(), Some("Ada"));
        assert_eq!(
            commit.date.map(|d| d.to_rfc3339()),
            Some("2023-01-02T03:04:05+00:00".to_string())
        );
        assert_eq!(commit.html_url.as_deref(), Some("https://github.com/o/r/commit/abc123"));
    }
}
