//! TOML configuration file loading
//!
//! Supports `~/.config/storybook/narrator.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NarratorConfigFile {
    /// Speech synthesis endpoint configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Local audio cache configuration
    #[serde(default)]
    pub cache: CacheFileConfig,

    /// Transcript lookup configuration
    #[serde(default)]
    pub transcript: TranscriptFileConfig,

    /// Playback/highlight configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Synthesis endpoint URL
    pub endpoint: Option<String>,

    /// API key sent with every request
    pub api_key: Option<String>,

    /// Header carrying the API key (defaults to `x-api-key`)
    pub api_key_header: Option<String>,

    /// Bearer token sent with every request
    pub bearer_token: Option<String>,

    /// Fixed voice identifier; takes precedence over gender/lang
    pub voice_id: Option<String>,

    /// Narrator gender (e.g. "female")
    pub gender: Option<String>,

    /// Narration language (e.g. "vi")
    pub lang: Option<String>,

    /// Download timeout in seconds
    pub download_timeout_secs: Option<u64>,
}

/// Audio cache configuration
#[derive(Debug, Default, Deserialize)]
pub struct CacheFileConfig {
    /// Directory for downloaded narration audio
    pub dir: Option<String>,
}

/// Transcript lookup configuration
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptFileConfig {
    /// Transcript endpoint URL
    pub endpoint: Option<String>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// Highlight tick interval in milliseconds
    pub tick_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `NarratorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NarratorConfigFile {
    let Some(path) = config_file_path() else {
        return NarratorConfigFile::default();
    };

    if !path.exists() {
        return NarratorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                NarratorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            NarratorConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for the schema
pub fn parse_config(content: &str) -> crate::Result<NarratorConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/storybook/narrator.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("storybook").join("narrator.toml"))
}
