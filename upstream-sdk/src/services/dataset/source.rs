//! Places the dataset can be read from

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::services::common::{build_http_client, parse_error_response, UserAgent};

/// One tier of the dataset cache
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Short label used in logs and errors
    fn name(&self) -> &str;

    /// Read the whole dataset as text
    async fn fetch(&self) -> Result<String>;
}

/// The published copy, fetched with `GET` over HTTP(S)
#[derive(Debug, Clone)]
pub struct RemoteCsvSource {
    http_client: Client,
    url: String,
}

impl RemoteCsvSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = build_http_client(
            Some(UserAgent {
                extra: Some("dataset-fetch".to_string()),
                ..UserAgent::default()
            }),
            Some(timeout),
        )?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DatasetSource for RemoteCsvSource {
    fn name(&self) -> &str {
        "remote"
    }

    async fn fetch(&self) -> Result<String> {
        debug!(url = %self.url, "Fetching dataset");

        let response = self.http_client.get(&self.url).send().await?;
        let status = response.status();
        debug!(url = %self.url, status = status.as_u16(), "Dataset store responded");

        if !status.is_success() {
            return Err(parse_error_response("dataset", &self.url, response).await);
        }

        Ok(response.text().await?)
    }
}

/// The copy bundled with the deployment
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetSource for LocalFileSource {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ServiceError::io(format!("{}: {}", self.path.display(), e)))
    }
}
