//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::Synthesizer;
use super::stt::iso_639_1;
use crate::config::TtsProvider;
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_SPEECH_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

#[derive(Serialize)]
struct OpenAiSpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

#[derive(Serialize)]
struct ElevenLabsSpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    language_code: &'a str,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    /// Only `OpenAI` honours a speed multiplier
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(
        api_key: SecretString,
        voice: String,
        speed: f32,
        model: String,
    ) -> Result<Self> {
        Self::new(api_key, voice, speed.clamp(0.25, 4.0), model, TtsProvider::OpenAI)
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String, model: String) -> Result<Self> {
        Self::new(api_key, voice_id, 1.0, model, TtsProvider::ElevenLabs)
    }

    fn new(
        api_key: SecretString,
        voice: String,
        speed: f32,
        model: String,
        provider: TtsProvider,
    ) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(format!("{provider:?} API key required for TTS")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider,
        })
    }

    fn openai_request(&self, text: &str) -> reqwest::RequestBuilder {
        self.client
            .post(OPENAI_SPEECH_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&OpenAiSpeechRequest {
                model: &self.model,
                input: text,
                voice: &self.voice,
                speed: self.speed,
                response_format: "mp3",
            })
    }

    fn elevenlabs_request(&self, text: &str, language: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{ELEVENLABS_SPEECH_URL}/{}", self.voice))
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&ElevenLabsSpeechRequest {
                text,
                model_id: &self.model,
                language_code: iso_639_1(language),
            })
    }

    /// Send a speech request and collect the encoded audio
    async fn fetch_audio(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("{:?} TTS error {status}: {body}", self.provider)));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), provider = ?self.provider, "synthesizing speech");

        let request = match self.provider {
            TtsProvider::OpenAI => self.openai_request(text),
            TtsProvider::ElevenLabs => self.elevenlabs_request(text, language),
        };
        let audio = self.fetch_audio(request).await?;

        if audio.is_empty() {
            return Err(Error::Tts("provider returned no audio".to_string()));
        }
        tracing::debug!(audio_bytes = audio.len(), "speech synthesized");
        Ok(audio)
    }
}
