//! HTTP implementation of the [`FileSource`] trait.

use async_trait::async_trait;
use log::info;

use crate::error::OfflineError;
use crate::resource::{FetchResult, FileSource, Resource};
use crate::time::unix_now;

/// File source that fetches resources with plain HTTP GET requests.
///
/// Expiration of fetched resources is taken from the `Cache-Control: max-age`
/// response header when present.
#[derive(Debug, Clone)]
pub struct HttpFileSource {
    client: reqwest::Client,
}

impl HttpFileSource {
    /// Creates a new instance with a default client.
    pub fn new() -> Result<Self, OfflineError> {
        let client = reqwest::Client::builder()
            .user_agent("tilestash/0.1")
            .build()?;
        Ok(Self { client })
    }

    /// Creates a new instance using the given pre-configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileSource for HttpFileSource {
    async fn fetch(&self, resource: &Resource) -> Result<FetchResult, OfflineError> {
        let url = resource.url();
        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OfflineError::NotFound);
        }

        if !response.status().is_success() {
            info!("Failed to load {url}: {}", response.status());
            return Err(OfflineError::Network(format!(
                "{url} returned status {}",
                response.status()
            )));
        }

        let expires = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_max_age)
            .map(|max_age| unix_now() + max_age as i64);

        let data = response.bytes().await?;
        Ok(FetchResult { data, expires })
    }
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|value| value.parse().ok())
    })
}
