//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Conversational backend configuration
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Hands-free capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Local playback configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Address to bind
    pub host: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Default session language (e.g. "en-IN")
    pub language: Option<String>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
}

/// Assistant configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// Chat model identifier
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Maximum conversation turns kept per session
    pub max_history: Option<usize>,

    /// System prompt sent before the conversation
    pub system_prompt: Option<String>,
}

/// Capture watchdog configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Bound on waiting for the capture resource to become ready
    pub ready_timeout_ms: Option<u64>,

    /// Interval between partial-text polls while recording
    pub poll_interval_ms: Option<u64>,
}

/// Playback controller configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// Speech poll interval while an item is playing
    pub tick_ms: Option<u64>,

    /// Queue poll interval while idle
    pub idle_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub assistant: Option<String>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path is
/// tried and any problem falls back to `ParleyConfigFile::default()`.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<ParleyConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(ParleyConfigFile::default());
    };

    if !path.exists() {
        return Ok(ParleyConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(ParleyConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(ParleyConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "parley", "parley")
        .map(|d| d.config_dir().join("config.toml"))
}
