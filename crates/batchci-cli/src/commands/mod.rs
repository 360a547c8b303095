//! CLI command implementations.

pub mod builds;
pub mod keys;

use anyhow::{Context, Result, bail};
use batchci_config::SystemConfig;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Thin client over the server's JSON routes.
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.send(Method::POST, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::DELETE, path, None).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.base.join(path)?;
        debug!(%method, %url, "Calling API");

        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.context("API request failed")?;
        let status = response.status();
        let text = response.text().await?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            let message = value
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            bail!("{}: {}", status, message);
        }
        Ok(value)
    }
}

pub fn print(value: &Value) -> Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

pub fn validate(path: &str) -> Result<()> {
    match SystemConfig::load(std::path::Path::new(path)) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:     {}", config.server.listen);
            println!("  public url: {}", config.server.public_url);
            println!("  source:     {} ({})", config.source.url, config.source.branch);
            println!(
                "  live runs:  {}",
                if config.automation.is_some() { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
