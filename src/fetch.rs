//! Resource fetching abstraction.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Abstraction over the network collaborator that supplies resource bytes.
///
/// The synchronizer only invokes this for added and changed manifest entries
/// (and for lookup-channel passthrough on cache misses).
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetches the current bytes for a logical resource name.
    async fn fetch(&self, name: &str) -> Result<Bytes>;
}

#[async_trait]
impl<T: ResourceFetcher + ?Sized> ResourceFetcher for std::sync::Arc<T> {
    async fn fetch(&self, name: &str) -> Result<Bytes> {
        (**self).fetch(name).await
    }
}

/// HTTP fetcher resolving logical names against a base URL.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Creates a fetcher with a tuned HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates a fetcher from an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Returns the absolute URL for a logical resource name.
    fn resource_url(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            name.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, name: &str) -> Result<Bytes> {
        let url = self.resource_url(name);
        log::debug!("fetching {url}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch {
                name: name.to_string(),
                reason: format!("unexpected status {}", response.status()),
            });
        }
        Ok(response.bytes().await?)
    }
}
