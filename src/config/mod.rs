//! Configuration management for the narration engine

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::voice::VoiceSelection;
use crate::{Error, Result};

/// Default download timeout for a single narration clip
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 20;

/// Default highlight tick interval
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

/// Narration engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Speech synthesis endpoint
    pub tts: TtsConfig,

    /// Local audio cache
    pub cache: CacheConfig,

    /// Transcript lookup
    pub transcript: TranscriptConfig,

    /// Playback and highlighting
    pub playback: PlaybackConfig,
}

/// Speech synthesis endpoint configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis endpoint URL (HTTP GET)
    pub endpoint: String,

    /// API key header value
    pub api_key: Option<SecretString>,

    /// Header name carrying the API key
    pub api_key_header: String,

    /// Bearer token for the `Authorization` header
    pub bearer_token: Option<SecretString>,

    /// Voice used when the caller does not pick one
    pub voice: VoiceSelection,

    /// Upper bound on a single audio download
    pub download_timeout: Duration,
}

/// Audio cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory downloaded clips are written to
    pub dir: PathBuf,
}

impl CacheConfig {
    /// Cache directory from env, then file, then the platform default
    #[must_use]
    pub fn resolve(fc: file::CacheFileConfig) -> Self {
        Self {
            dir: std::env::var("NARRATOR_CACHE_DIR")
                .ok()
                .or(fc.dir)
                .map_or_else(default_cache_dir, PathBuf::from),
        }
    }
}

/// Transcript lookup configuration
#[derive(Debug, Clone, Default)]
pub struct TranscriptConfig {
    /// Transcript endpoint URL; lookups are skipped when unset
    pub endpoint: Option<String>,
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// How often the playback position is sampled for highlighting
    pub tick_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
        }
    }
}

/// Return the cache directory for narration audio: `~/.cache/storybook/narration/`
pub fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".cache/storybook/narration"),
        |d| d.cache_dir().join("storybook").join("narration"),
    )
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if no synthesis endpoint is configured
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from a parsed config file, with env overrides applied
    ///
    /// # Errors
    ///
    /// Returns error if no synthesis endpoint is configured
    pub fn from_file(fc: file::NarratorConfigFile) -> Result<Self> {
        let endpoint = std::env::var("NARRATOR_TTS_URL")
            .ok()
            .or(fc.tts.endpoint)
            .ok_or_else(|| {
                Error::Config("TTS endpoint required (NARRATOR_TTS_URL or [tts].endpoint)".to_string())
            })?;

        let voice_id = std::env::var("NARRATOR_VOICE_ID").ok().or(fc.tts.voice_id);
        let voice = voice_id.map_or_else(
            || VoiceSelection::Profile {
                gender: std::env::var("NARRATOR_GENDER")
                    .ok()
                    .or(fc.tts.gender)
                    .unwrap_or_else(|| "female".to_string()),
                lang: std::env::var("NARRATOR_LANG")
                    .ok()
                    .or(fc.tts.lang)
                    .unwrap_or_else(|| "en".to_string()),
                segment_id: None,
            },
            |voice_id| VoiceSelection::Voice { voice_id },
        );

        let download_timeout_secs = std::env::var("NARRATOR_DOWNLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(fc.tts.download_timeout_secs)
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS);

        let tts = TtsConfig {
            endpoint,
            api_key: std::env::var("NARRATOR_API_KEY")
                .ok()
                .or(fc.tts.api_key)
                .map(SecretString::from),
            api_key_header: fc
                .tts
                .api_key_header
                .unwrap_or_else(|| "x-api-key".to_string()),
            bearer_token: std::env::var("NARRATOR_BEARER_TOKEN")
                .ok()
                .or(fc.tts.bearer_token)
                .map(SecretString::from),
            voice,
            download_timeout: Duration::from_secs(download_timeout_secs),
        };

        let cache = CacheConfig::resolve(fc.cache);

        let transcript = TranscriptConfig {
            endpoint: std::env::var("NARRATOR_TRANSCRIPT_URL")
                .ok()
                .or(fc.transcript.endpoint),
        };

        let playback = fc
            .playback
            .tick_interval_ms
            .map_or_else(PlaybackConfig::default, |ms| PlaybackConfig {
                tick_interval: Duration::from_millis(ms.max(1)),
            });

        Ok(Self {
            tts,
            cache,
            transcript,
            playback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_fill_config() {
        // Env overrides are not set in the test environment for these keys
        let fc = file::parse_config(
            r#"
            [tts]
            endpoint = "https://tts.example.com/speak"
            voice_id = "narrator-1"
            download_timeout_secs = 3

            [cache]
            dir = "/tmp/narration-test"

            [playback]
            tick_interval_ms = 0
            "#,
        )
        .unwrap();

        let config = Config::from_file(fc).unwrap();
        if std::env::var("NARRATOR_TTS_URL").is_err() {
            assert_eq!(config.tts.endpoint, "https://tts.example.com/speak");
        }
        if std::env::var("NARRATOR_VOICE_ID").is_err() {
            assert_eq!(
                config.tts.voice,
                VoiceSelection::Voice {
                    voice_id: "narrator-1".to_string()
                }
            );
        }
        assert_eq!(config.tts.api_key_header, "x-api-key");
        assert_eq!(config.playback.tick_interval, Duration::from_millis(1));
    }

    #[test]
    fn missing_endpoint_is_config_error() {
        if std::env::var("NARRATOR_TTS_URL").is_ok() {
            return;
        }
        let err = Config::from_file(file::NarratorConfigFile::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
