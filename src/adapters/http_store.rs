//! Object store over plain HTTP.
//!
//! `PUT {base}/{key}` to write, `GET` to read, `HEAD {base}` to ping. Fits
//! S3-compatible gateways with pre-authorized buckets and simple blob
//! servers alike.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::capability::ObjectStore;
use crate::error::{BackendError, ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base: Url,
}

impl HttpObjectStore {
    pub fn new(service: &str, base: &str, connect_timeout: Duration) -> ServiceResult<Self> {
        let invalid = |reason: String| ServiceError::Configuration {
            service: service.to_string(),
            reason,
        };
        let base = Url::parse(base).map_err(|e| invalid(format!("invalid object store URL: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("object store URL must be http(s), got '{base}'")));
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| invalid(format!("HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn object_url(&self, key: &str) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Operation(format!("'{}' cannot hold a path", self.base)))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BackendError> {
        let url = self.object_url(key)?;
        self.client
            .put(url.clone())
            .body(bytes.to_vec())
            .send()
            .await?
            .error_for_status()?;
        Ok(url.to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let response = self.client.get(self.object_url(key)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let response = self.client.head(self.base.clone()).send().await?;
        // Any non-5xx answer means the server is up, even if HEAD on the root is denied.
        if response.status().is_server_error() {
            return Err(BackendError::Probe(format!("{} returned {}", self.base, response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> HttpObjectStore {
        HttpObjectStore::new("object-store", base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_object_url_appends_key_segments() {
        let store = store("http://blobs.internal/bucket/");
        assert_eq!(
            store.object_url("attachments/cv 1.pdf").unwrap().as_str(),
            "http://blobs.internal/bucket/attachments/cv%201.pdf"
        );

        let no_slash = HttpObjectStore::new("object-store", "http://blobs.internal/bucket", Duration::from_secs(1)).unwrap();
        assert_eq!(
            no_slash.object_url("a.txt").unwrap().as_str(),
            "http://blobs.internal/bucket/a.txt"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        let err = HttpObjectStore::new("object-store", "s3:bucket", Duration::from_secs(1)).unwrap_err();
        assert!(err.is_fatal());
    }
}
