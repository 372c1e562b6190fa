use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::ObjectSource;
use crate::error::BackendError;

/// Reads published objects from the public CDN over HTTPS.
#[derive(Clone)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    pub fn url_for(&self, key: &str) -> String { format!("{}/{}", self.base_url, key.trim_start_matches('/')) }
}

#[async_trait]
impl ObjectSource for HttpSource {
    async fn read(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let url = self.url_for(key);
        debug!(%url, "fetching from CDN");
        let resp = self.client.get(&url).send().await?;
        // CloudFront in front of a private bucket answers 403 for missing keys
        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::FORBIDDEN) {
            return Err(BackendError::NotFound(key.to_string()));
        }
        let resp = resp.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}
