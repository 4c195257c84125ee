//! HTTP object store
//!
//! Reads `GET {endpoint}/{bucket}/{key}`, which matches path-style S3 URLs and
//! most S3-compatible gateways serving public or pre-authorized buckets.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::store::{check_key, ObjectStore, StorageError, StoredObject};

/// Object store reached over plain HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    endpoint: String,
}

impl HttpStore {
    /// Creates a store for `endpoint`, e.g. `https://storage.example.com`
    pub fn new(endpoint: &str) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(concat!("image-serving/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| StorageError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        check_key(bucket, key)?;
        let url = self.object_url(bucket, key);
        debug!("Fetching object from {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StorageError::Transport(format!("GET {} failed: {}", url, e)))?;

        match resp.status() {
            status if status.is_success() => {
                let etag = resp
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim_matches('"').to_string());

                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| StorageError::Transport(format!("Reading body of {} failed: {}", url, e)))?;

                Ok(StoredObject { bytes, etag })
            }
            StatusCode::NOT_FOUND => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            status => Err(StorageError::Transport(format!("GET {} returned HTTP {}", url, status))),
        }
    }

    fn describe(&self) -> String {
        format!("http:{}", self.endpoint)
    }
}
