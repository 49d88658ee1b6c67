//! Word-timing transcript lookup
//!
//! Transcripts are JSON arrays of `{word, start, end, aligned}`. A missing
//! transcript is not an error: the segment simply gets no highlighting.

use std::path::Path;

use crate::highlight::WordInterval;
use crate::voice::ApiCredentials;
use crate::{Error, Result};

/// Parse a transcript body; blank or `null` bodies yield an empty table
///
/// # Errors
///
/// Returns error if the body is neither empty nor a valid transcript array
pub fn parse_transcript(body: &str) -> Result<Vec<WordInterval>> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let words: Option<Vec<WordInterval>> = serde_json::from_str(body)?;
    Ok(words.unwrap_or_default())
}

/// Read a transcript from a local JSON file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub async fn load_transcript_file(path: &Path) -> Result<Vec<WordInterval>> {
    let body = tokio::fs::read_to_string(path).await?;
    parse_transcript(&body)
}

/// Fetches segment transcripts from the story service
#[derive(Debug, Clone)]
pub struct TranscriptClient {
    client: reqwest::Client,
    endpoint: String,
    credentials: ApiCredentials,
}

impl TranscriptClient {
    /// Create a client for `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>, credentials: ApiCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            credentials,
        }
    }

    /// Transcript of one segment as narrated by (gender, lang)
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, a non-404 error status, or an
    /// unparsable body
    pub async fn fetch(&self, gender: &str, lang: &str, segment_id: &str) -> Result<Vec<WordInterval>> {
        let response = self
            .credentials
            .apply(self.client.get(&self.endpoint).query(&[
                ("gender", gender),
                ("lang", lang),
                ("segmentId", segment_id),
            ]))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(segment = segment_id, "no transcript for segment");
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transcript(format!("lookup error {status}: {body}")));
        }

        let words = parse_transcript(&response.text().await?)?;
        tracing::debug!(segment = segment_id, words = words.len(), "transcript loaded");
        Ok(words)
    }
}
