//! Build commands.

use anyhow::Result;
use serde_json::json;

use super::{ApiClient, print};

pub const REFRESH: &str = "refresh";
pub const REBUILD: &str = "rebuild";
pub const SUPPRESS: &str = "suppress";

pub async fn build(api: &ApiClient, sha: Option<String>, rebuild: bool) -> Result<()> {
    match sha {
        Some(sha) => action(api, &sha, if rebuild { REBUILD } else { REFRESH }).await,
        None => print(&api.post("/build", None).await?),
    }
}

pub async fn action(api: &ApiClient, sha: &str, action: &str) -> Result<()> {
    let build = api
        .post(&format!("/build/{}", sha), Some(json!({ "action": action })))
        .await?;
    print(&build)
}

pub async fn list(api: &ApiClient, limit: u32, all: bool) -> Result<()> {
    let builds = api
        .get(&format!("/api/builds?limit={}&include_suppressed={}", limit, all))
        .await?;
    for build in builds.as_array().into_iter().flatten() {
        println!(
            "{:<8} {:<12} {:<14} {}",
            build["short_sha"].as_str().unwrap_or_default(),
            build["state"].as_str().unwrap_or_default(),
            build["commit_date"].as_str().unwrap_or_default(),
            build["commit_subject"].as_str().unwrap_or_default(),
        );
    }
    Ok(())
}

pub async fn show(api: &ApiClient, sha: &str) -> Result<()> {
    print(&api.get(&format!("/api/build/{}", sha)).await?)
}
