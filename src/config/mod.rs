//! Configuration management for Parley gateway
//!
//! Values resolve with priority: environment variable, then the TOML file,
//! then built-in defaults. CLI flags are applied on top by the binary.

pub mod file;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

pub use file::{ParleyConfigFile, config_file_path, load_config_file};

/// Default session language
pub const DEFAULT_LANGUAGE: &str = "en-IN";

/// Default system prompt for the conversational backend
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional AI assistant able to answer \
questions on a wide range of subjects, including science and general queries. Give clear, \
concise and friendly answers. If you don't know the answer, say so instead of making \
something up.";

/// Parley gateway configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Conversational backend configuration
    pub assistant: AssistantConfig,

    /// Hands-free capture configuration
    pub capture: CaptureConfig,

    /// Local playback configuration
    pub playback: PlaybackConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Default session language, passed to STT/TTS as a hint
    pub language: String,

    /// STT provider
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// TTS provider
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

/// Conversational backend configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Chat model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum conversation turns kept per session
    pub max_history: usize,

    /// System prompt
    pub system_prompt: String,
}

/// Capture watchdog configuration
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Bound on waiting for the capture resource to become ready
    pub ready_timeout: Duration,

    /// Interval between partial-text polls while recording
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Playback controller configuration
#[derive(Debug, Clone, Copy)]
pub struct PlaybackConfig {
    /// Speech poll interval while an item is playing (~30 Hz)
    pub tick: Duration,

    /// Queue poll interval while idle (~10 Hz)
    pub idle: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(33),
            idle: Duration::from_millis(100),
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, and assistant fallback)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// Assistant API key for a non-OpenAI backend
    pub assistant: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = load_config_file(path)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or numeric value is invalid
    pub fn resolve<F>(file: ParleyConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let port = match env("PARLEY_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid PARLEY_PORT: {raw}")))?,
            None => file.server.port.unwrap_or(8765),
        };
        let server = ServerConfig {
            host: env("PARLEY_HOST")
                .or(file.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
        };

        let voice = VoiceConfig {
            language: env("PARLEY_LANGUAGE")
                .or(file.voice.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            stt_provider: env("PARLEY_STT_PROVIDER")
                .or(file.voice.stt_provider)
                .map_or(Ok(SttProvider::Whisper), |s| s.parse())?,
            stt_model: env("PARLEY_STT_MODEL")
                .or(file.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_provider: env("PARLEY_TTS_PROVIDER")
                .or(file.voice.tts_provider)
                .map_or(Ok(TtsProvider::OpenAI), |s| s.parse())?,
            tts_model: env("PARLEY_TTS_MODEL")
                .or(file.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: env("PARLEY_TTS_VOICE")
                .or(file.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: file.voice.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
        };

        let assistant = AssistantConfig {
            base_url: env("PARLEY_ASSISTANT_URL")
                .or(file.assistant.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env("PARLEY_ASSISTANT_MODEL")
                .or(file.assistant.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: file.assistant.temperature.unwrap_or(0.9),
            max_history: file.assistant.max_history.unwrap_or(20),
            system_prompt: file
                .assistant
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        let capture_defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            ready_timeout: file
                .capture
                .ready_timeout_ms
                .map_or(capture_defaults.ready_timeout, Duration::from_millis),
            poll_interval: file
                .capture
                .poll_interval_ms
                .map_or(capture_defaults.poll_interval, Duration::from_millis),
        };

        let playback_defaults = PlaybackConfig::default();
        let playback = PlaybackConfig {
            tick: file
                .playback
                .tick_ms
                .map_or(playback_defaults.tick, Duration::from_millis),
            idle: file
                .playback
                .idle_ms
                .map_or(playback_defaults.idle, Duration::from_millis),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(file.api_keys.openai)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(file.api_keys.deepgram)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(file.api_keys.elevenlabs)
                .map(SecretString::from),
            assistant: env("PARLEY_ASSISTANT_API_KEY")
                .or(file.api_keys.assistant)
                .map(SecretString::from),
        };

        Ok(Self {
            server,
            voice,
            assistant,
            capture,
            playback,
            api_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = Config::resolve(ParleyConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.voice.language, DEFAULT_LANGUAGE);
        assert_eq!(config.voice.stt_provider, SttProvider::Whisper);
        assert_eq!(config.voice.tts_provider, TtsProvider::OpenAI);
        assert_eq!(config.playback.tick, Duration::from_millis(33));
        assert_eq!(config.playback.idle, Duration::from_millis(100));
        assert_eq!(config.assistant.max_history, 20);
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let file: ParleyConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000
            [voice]
            language = "hi-IN"
            stt_provider = "deepgram"
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            file,
            env_from(&[("PARLEY_PORT", "7000"), ("OPENAI_API_KEY", "sk-test")]),
        )
        .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.voice.language, "hi-IN");
        assert_eq!(config.voice.stt_provider, SttProvider::Deepgram);
        assert_eq!(
            config.api_keys.openai.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = Config::resolve(
            ParleyConfigFile::default(),
            env_from(&[("OPENAI_API_KEY", "  "), ("PARLEY_LANGUAGE", "")]),
        )
        .unwrap();

        assert!(config.api_keys.openai.is_none());
        assert_eq!(config.voice.language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let result = Config::resolve(
            ParleyConfigFile::default(),
            env_from(&[("PARLEY_PORT", "not-a-port")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!("whisper".parse::<SttProvider>().is_ok());
        assert!("ElevenLabs".parse::<TtsProvider>().is_ok());
        assert!("carrier-pigeon".parse::<SttProvider>().is_err());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = Config::resolve(
            ParleyConfigFile::default(),
            env_from(&[("OPENAI_API_KEY", "sk-very-secret")]),
        )
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
    }
}
