//! HTTP download of synthesized clips

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::AudioFetcher;
use crate::voice::{ApiCredentials, Locator};
use crate::{Error, Result};

/// Streams synthesis responses straight to disk
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    credentials: ApiCredentials,
}

impl HttpFetcher {
    /// Create a fetcher sending `credentials` with every request
    #[must_use]
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
        }
    }
}

#[async_trait]
impl AudioFetcher for HttpFetcher {
    async fn fetch(&self, locator: &Locator, dest: &Path) -> Result<()> {
        let response = self
            .credentials
            .apply(self.client.get(locator.as_str()))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Download(format!("synthesis error {status}: {body}")));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(Error::Download("synthesis returned no audio".to_string()));
        }

        tracing::debug!(%locator, bytes = written, path = %dest.display(), "downloaded narration clip");
        Ok(())
    }
}
