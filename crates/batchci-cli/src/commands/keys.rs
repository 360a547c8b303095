//! Access-key commands.

use anyhow::Result;
use serde_json::json;

use super::{ApiClient, print};

pub async fn list(api: &ApiClient) -> Result<()> {
    let keys = api.get("/admin/keys").await?;
    for key in keys.as_array().into_iter().flatten() {
        println!(
            "{:<24} {}",
            key["name"].as_str().unwrap_or_default(),
            key["remark"].as_str().unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn create(api: &ApiClient, name: &str, remark: Option<String>) -> Result<()> {
    let key = api
        .post("/admin/keys", Some(json!({ "name": name, "remark": remark })))
        .await?;
    print(&key)
}

pub async fn rotate(api: &ApiClient, name: &str) -> Result<()> {
    print(&api.post(&format!("/admin/keys/{}/rotate", name), None).await?)
}

pub async fn delete(api: &ApiClient, name: &str) -> Result<()> {
    api.delete(&format!("/admin/keys/{}", name)).await?;
    println!("Deleted access key {}", name);
    Ok(())
}
