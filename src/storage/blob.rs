//! Hosted blob store provider, spoken to over its HTTP API with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;

use super::{
    public_url, ListOptions, ListResult, ObjectEntry, PutOptions, PutResult, StorageBackend,
    StorageError, StoredObject,
};
use crate::config::BlobConfig;

const PROVIDER: &str = "blob";
const API_VERSION: &str = "7";

pub struct BlobBackend {
    client: Client,
    token: String,
    api_url: String,
    public_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    url: String,
    pathname: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedBlob {
    url: String,
    pathname: String,
    uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    blobs: Vec<ListedBlob>,
}

impl BlobBackend {
    pub fn new(config: &BlobConfig, timeout: Duration) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?;

        Ok(Self {
            client,
            token: config.token.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            public_url: config.public_url.clone(),
        })
    }

    /// Where `key` can be read from. Without a public base URL the key is looked up by listing,
    /// matching the pathname exactly so `posts.json` never resolves to `posts.json.bak`.
    async fn read_url(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(base) = &self.public_url {
            return Ok(Some(public_url(base, key)));
        }

        let listing = self
            .list(&ListOptions {
                prefix: Some(key.to_string()),
                limit: None,
            })
            .await?;

        Ok(listing
            .entries
            .into_iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.url))
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Turn a non-success response into a `Rejected` error.
    async fn check(
        &self,
        key: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        tracing::error!("Blob request for {} failed with {}: {}", key, status, message);
        Err(StorageError::Rejected {
            provider: PROVIDER,
            key: key.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[async_trait]
impl StorageBackend for BlobBackend {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn supports_conditional_put(&self) -> bool {
        false
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<PutResult, StorageError> {
        if options.condition.is_some() {
            return Err(StorageError::Unsupported {
                provider: PROVIDER,
                capability: "conditional writes",
            });
        }

        let response = self
            .client
            .put(format!("{}/", self.api_url))
            .query(&[("pathname", key)])
            .header(header::AUTHORIZATION, self.bearer())
            .header("x-api-version", API_VERSION)
            .header("x-content-type", &options.content_type)
            .header("x-add-random-suffix", flag(options.add_random_suffix))
            .header("x-allow-overwrite", flag(options.allow_overwrite))
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?;

        let response = self.check(key, response).await?;
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let created: PutResponse = response
            .json()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?;

        Ok(PutResult {
            url: created.url,
            key: created.pathname,
            etag,
        })
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult, StorageError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(prefix) = &options.prefix {
            query.push(("prefix", prefix.clone()));
        }
        if let Some(limit) = options.limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .client
            .get(&self.api_url)
            .query(&query)
            .header(header::AUTHORIZATION, self.bearer())
            .header("x-api-version", API_VERSION)
            .send()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?;

        let listing: ListResponse = self
            .check(options.prefix.as_deref().unwrap_or(""), response)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?;

        let entries = listing
            .blobs
            .into_iter()
            .map(|blob| ObjectEntry {
                url: blob.url,
                key: blob.pathname,
                modified_at: blob.uploaded_at,
            })
            .collect();

        Ok(ListResult { entries })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let Some(url) = self.read_url(key).await? else {
            return Ok(None);
        };

        let response = self
            .client
            .get(url)
            .header(header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = self.check(key, response).await?;
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?
            .to_vec();

        Ok(Some(StoredObject { body, etag }))
    }
}
