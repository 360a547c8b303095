//! Azure Shared Key request signing and service SAS generation.
//!
//! Batch and Blob sign the same canonical request layout and differ only in
//! the prefix of the headers folded into the signature (`ocp-` vs `x-ms-`).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use batchci_core::secret::Secret;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

use crate::BackendError;

type HmacSha256 = Hmac<Sha256>;

/// Version of the service SAS format produced by [`SharedKey::service_sas`].
pub const SAS_VERSION: &str = "2018-11-09";

/// HTTP date format used by `x-ms-date` and `ocp-date`.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Account name plus decoded account key.
#[derive(Clone)]
pub struct SharedKey {
    account: String,
    key: Vec<u8>,
}

/// The parts of an outgoing request that are covered by the signature.
#[derive(Debug)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    pub content_length: usize,
    pub content_type: Option<&'a str>,
    /// Service headers (`ocp-*` or `x-ms-*`) sent with the request.
    pub headers: &'a [(&'a str, String)],
}

impl SharedKey {
    pub fn new(account: &str, key: &Secret) -> Result<Self, BackendError> {
        let key = STANDARD
            .decode(key.expose())
            .map_err(|e| BackendError::Credentials(format!("account key is not base64: {}", e)))?;
        Ok(Self {
            account: account.to_string(),
            key,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` under the account key.
    pub fn sign(&self, string_to_sign: &str) -> Result<String, BackendError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| BackendError::Credentials(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Value of the `Authorization` header for a request.
    pub fn authorization(&self, request: &CanonicalRequest<'_>) -> Result<String, BackendError> {
        let signature = self.sign(&self.string_to_sign(request))?;
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    pub fn string_to_sign(&self, request: &CanonicalRequest<'_>) -> String {
        let content_length = if request.content_length == 0 {
            String::new()
        } else {
            request.content_length.to_string()
        };

        let mut headers: Vec<(String, &str)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .collect();
        headers.sort();
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
            request.method,
            content_length,
            request.content_type.unwrap_or_default(),
            canonical_headers,
            self.canonical_resource(request.url),
        )
    }

    /// `/account/path` followed by one `name:value` line per query parameter,
    /// sorted by lowercase name with repeated values comma-joined.
    fn canonical_resource(&self, url: &Url) -> String {
        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            params
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.into_owned());
        }

        let mut resource = format!("/{}{}", self.account, url.path());
        for (name, mut values) in params {
            values.sort();
            resource.push_str(&format!("\n{}:{}", name, values.join(",")));
        }
        resource
    }

    /// Query string of a blob-service SAS for a container (`blob = None`) or
    /// a single blob, restricted to HTTPS.
    pub fn service_sas(
        &self,
        container: &str,
        blob: Option<&str>,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<String, BackendError> {
        let expiry = expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let (resource, canonical) = match blob {
            Some(blob) => ("b", format!("/blob/{}/{}/{}", self.account, container, blob)),
            None => ("c", format!("/blob/{}/{}", self.account, container)),
        };

        // sp, st, se, resource, si, sip, spr, sv, sr, snapshot time, then
        // the five response header overrides.
        let string_to_sign = format!(
            "{permissions}\n\n{expiry}\n{canonical}\n\n\nhttps\n{SAS_VERSION}\n{resource}\n\n\n\n\n\n"
        );
        let signature = self.sign(&string_to_sign)?;

        Ok(format!(
            "sv={}&sr={}&sp={}&se={}&spr=https&sig={}",
            SAS_VERSION,
            resource,
            permissions,
            urlencoding::encode(&expiry),
            urlencoding::encode(&signature)
        ))
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}
