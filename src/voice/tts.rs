//! Text-to-speech (TTS) locators
//!
//! The synthesis endpoint is a plain HTTP GET: the text and voice are encoded
//! into the query string, so a locator doubles as the cache identity of a clip.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Which voice narrates a clip
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoiceSelection {
    /// A fixed voice known to the synthesis service
    Voice {
        /// Voice identifier
        voice_id: String,
    },
    /// Voice picked by the service from narrator gender and language
    Profile {
        /// Narrator gender (e.g. "female")
        gender: String,
        /// Narration language (e.g. "vi")
        lang: String,
        /// Segment the clip belongs to, if any
        segment_id: Option<String>,
    },
}

impl VoiceSelection {
    /// Same voice, bound to a segment
    ///
    /// Fixed voices ignore the segment.
    #[must_use]
    pub fn for_segment(&self, segment: &str) -> Self {
        match self {
            Self::Voice { .. } => self.clone(),
            Self::Profile { gender, lang, .. } => Self::Profile {
                gender: gender.clone(),
                lang: lang.clone(),
                segment_id: Some(segment.to_string()),
            },
        }
    }

    fn append_query(&self, url: &mut String) {
        match self {
            Self::Voice { voice_id } => {
                url.push_str("&voiceId=");
                url.push_str(&urlencoding::encode(voice_id));
            }
            Self::Profile {
                gender,
                lang,
                segment_id,
            } => {
                url.push_str("&gender=");
                url.push_str(&urlencoding::encode(gender));
                url.push_str("&lang=");
                url.push_str(&urlencoding::encode(lang));
                if let Some(segment_id) = segment_id {
                    url.push_str("&segmentId=");
                    url.push_str(&urlencoding::encode(segment_id));
                }
            }
        }
    }
}

/// Remote address of a synthesizable audio clip
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    /// Wrap an already-built URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// URL string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable file-name-safe key derived from the URL
    #[must_use]
    pub fn cache_key(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..16])
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication headers shared by the synthesis and transcript endpoints
#[derive(Debug, Clone, Default)]
pub struct ApiCredentials {
    api_key_header: String,
    api_key: Option<SecretString>,
    bearer_token: Option<SecretString>,
}

impl ApiCredentials {
    /// Credentials from the TTS configuration
    #[must_use]
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            api_key_header: config.api_key_header.clone(),
            api_key: config.api_key.clone(),
            bearer_token: config.bearer_token.clone(),
        }
    }

    /// Attach the API key and bearer token headers to a request
    #[must_use]
    pub fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(key) = &self.api_key {
            request = request.header(self.api_key_header.as_str(), key.expose_secret());
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }
        request
    }
}

/// Builds synthesis locators for the configured endpoint
#[derive(Debug, Clone)]
pub struct TextToSpeech {
    endpoint: String,
    credentials: ApiCredentials,
}

impl TextToSpeech {
    /// Create a locator builder for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not an http(s) URL
    pub fn new(config: &TtsConfig) -> Result<Self> {
        Self::with_endpoint(&config.endpoint, ApiCredentials::from_config(config))
    }

    /// Create a locator builder for an explicit endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not an http(s) URL
    pub fn with_endpoint(endpoint: &str, credentials: ApiCredentials) -> Result<Self> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Config(format!(
                "TTS endpoint must be an http(s) URL: {endpoint:?}"
            )));
        }

        Ok(Self {
            endpoint: endpoint.to_string(),
            credentials,
        })
    }

    /// Build the locator for `text` spoken in `voice`
    #[must_use]
    pub fn locator(&self, text: &str, voice: &VoiceSelection) -> Locator {
        let mut url = self.endpoint.clone();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str("text=");
        url.push_str(&urlencoding::encode(text));
        voice.append_query(&mut url);
        Locator(url)
    }

    /// Credentials sent with synthesis requests
    #[must_use]
    pub const fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }
}
