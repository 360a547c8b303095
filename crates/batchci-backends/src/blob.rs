//! Azure Blob storage REST client.

use async_trait::async_trait;
use batchci_config::StorageConfig;
use batchci_core::storage::{ObjectStore, SasPermissions, with_sas};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Method, StatusCode};
use std::sync::LazyLock;
use url::Url;

use crate::BackendError;
use crate::shared_key::{CanonicalRequest, SharedKey, http_date};

pub const STORAGE_VERSION: &str = "2019-12-12";

// List Blobs responses are small and flat; only names and the paging marker matter.
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Name>([^<]*)</Name>").unwrap());
static MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<NextMarker>([^<]*)</NextMarker>").unwrap());

/// Client for one storage account's blob service.
pub struct AzureBlobClient {
    client: reqwest::Client,
    endpoint: String,
    credentials: SharedKey,
}

impl AzureBlobClient {
    pub fn new(config: &StorageConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("https://{}.blob.{}", config.account, config.endpoint_suffix),
            credentials: SharedKey::new(&config.account, &config.key)?,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, path))
            .map_err(|e| BackendError::Parse(format!("blob url {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url) -> Result<reqwest::Response, BackendError> {
        let headers = [
            ("x-ms-date", http_date(Utc::now())),
            ("x-ms-version", STORAGE_VERSION.to_string()),
        ];
        let authorization = self.credentials.authorization(&CanonicalRequest {
            method: method.as_str(),
            url: &url,
            content_length: 0,
            content_type: None,
            headers: &headers,
        })?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", authorization);
        for (name, value) in &headers {
            request = request.header(*name, value);
        }
        if method == Method::PUT {
            request = request.body(Vec::new());
        }
        Ok(request.send().await?)
    }

    async fn exists(&self, url: Url) -> Result<bool, BackendError> {
        let response = self.send(Method::HEAD, url).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(BackendError::from_response(response).await),
        }
    }
}

/// Parse one List Blobs page into blob names and the next marker.
fn parse_blob_list(xml: &str) -> (Vec<String>, Option<String>) {
    let names = NAME_REGEX
        .captures_iter(xml)
        .map(|c| unescape_xml(&c[1]))
        .collect();
    let marker = MARKER_REGEX
        .captures(xml)
        .map(|c| unescape_xml(&c[1]))
        .filter(|m| !m.is_empty());
    (names, marker)
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl ObjectStore for AzureBlobClient {
    async fn create_container(&self, container: &str) -> batchci_core::Result<()> {
        let url = self.url(container, &[("restype", "container")])?;
        let response = self.send(Method::PUT, url).await?;
        match response.status() {
            status if status.is_success() => {
                tracing::info!(container = %container, "Created storage container");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            _ => Err(BackendError::from_response(response).await.into()),
        }
    }

    async fn container_exists(&self, container: &str) -> batchci_core::Result<bool> {
        let url = self.url(container, &[("restype", "container")])?;
        Ok(self.exists(url).await?)
    }

    async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> batchci_core::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("restype", "container"), ("comp", "list")];
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix));
            }
            if let Some(marker) = marker.as_deref() {
                query.push(("marker", marker));
            }
            let url = self.url(container, &query)?;
            let response = self.send(Method::GET, url).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(batchci_core::Error::NotFound(format!("container {}", container)));
            }
            if !response.status().is_success() {
                return Err(BackendError::from_response(response).await.into());
            }
            let body = response.text().await.map_err(BackendError::from)?;
            let (page, next) = parse_blob_list(&body);
            names.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(names)
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> batchci_core::Result<bool> {
        let url = self.url(&format!("{}/{}", container, blob), &[])?;
        Ok(self.exists(url).await?)
    }

    async fn get_text(&self, url: &str) -> batchci_core::Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(BackendError::from)?;
        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await.into());
        }
        Ok(response.text().await.map_err(BackendError::from)?)
    }

    fn container_sas(
        &self,
        container: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> batchci_core::Result<String> {
        Ok(self
            .credentials
            .service_sas(container, None, &permissions.to_string(), expiry)?)
    }

    fn blob_sas(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> batchci_core::Result<String> {
        Ok(self
            .credentials
            .service_sas(container, Some(blob), &permissions.to_string(), expiry)?)
    }

    fn container_url(&self, container: &str, sas: Option<&str>) -> String {
        with_sas(format!("{}/{}", self.endpoint, container), sas)
    }

    fn blob_url(&self, container: &str, blob: &str, sas: Option<&str>) -> String {
        with_sas(format!("{}/{}/{}", self.endpoint, container, blob), sas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchci_core::secret::Secret;

    fn client() -> AzureBlobClient {
        AzureBlobClient::new(&StorageConfig {
            account: "cistore".to_string(),
            key: Secret::new("a2V5"),
            endpoint_suffix: "core.windows.net".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_blob_list_page() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
            <EnumerationResults ServiceEndpoint="https://cistore.blob.core.windows.net/" ContainerName="builds">
              <Prefix>abc</Prefix>
              <Blobs>
                <Blob><Name>abc/azure-cli.tar</Name><Properties /></Blob>
                <Blob><Name>abc/a&amp;b.whl</Name><Properties /></Blob>
              </Blobs>
              <NextMarker>2!marker</NextMarker>
            </EnumerationResults>"#;
        let (names, marker) = parse_blob_list(xml);
        assert_eq!(names, vec!["abc/azure-cli.tar", "abc/a&b.whl"]);
        assert_eq!(marker.as_deref(), Some("2!marker"));
    }

    #[test]
    fn test_parse_last_page() {
        let (names, marker) = parse_blob_list("<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>");
        assert!(names.is_empty());
        assert_eq!(marker, None);
        let (_, empty) = parse_blob_list("<NextMarker></NextMarker>");
        assert_eq!(empty, None);
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.blob_url("builds", "azure-cli-abc.tar", None),
            "https://cistore.blob.core.windows.net/builds/azure-cli-abc.tar"
        );
        let sas = client
            .container_sas("builds", SasPermissions::WRITE_LIST, Utc::now())
            .unwrap();
        let url = client.container_url("builds", Some(&sas));
        assert!(url.starts_with("https://cistore.blob.core.windows.net/builds?sv=2018-11-09&sr=c&sp=wl"));
    }

    #[test]
    fn test_request_url_query() {
        let url = client()
            .url("builds", &[("restype", "container"), ("comp", "list"), ("prefix", "abc/")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://cistore.blob.core.windows.net/builds?restype=container&comp=list&prefix=abc%2F"
        );
    }
}
