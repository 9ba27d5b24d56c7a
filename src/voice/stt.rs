//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::Transcriber;
use crate::config::SttProvider;
use crate::{Error, Result};

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Container format guessed from leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Webm,
    Ogg,
    Mp3,
}

impl AudioFormat {
    /// File name used for multipart uploads
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Wav => "audio.wav",
            Self::Webm => "audio.webm",
            Self::Ogg => "audio.ogg",
            Self::Mp3 => "audio.mp3",
        }
    }

    /// MIME type for this format
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
            Self::Ogg => "audio/ogg",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

/// Guess the container format of an audio blob
///
/// Browsers usually record webm, so unknown data is treated as webm.
#[must_use]
pub fn sniff_audio_format(audio: &[u8]) -> AudioFormat {
    match audio {
        [b'R', b'I', b'F', b'F', ..] => AudioFormat::Wav,
        [0x1A, 0x45, 0xDF, 0xA3, ..] => AudioFormat::Webm,
        [b'O', b'g', b'g', b'S', ..] => AudioFormat::Ogg,
        [b'I', b'D', b'3', ..] | [0xFF, 0xFB | 0xF3 | 0xF2, ..] => AudioFormat::Mp3,
        _ => AudioFormat::Webm,
    }
}

/// ISO-639-1 code from a BCP 47 tag ("en-IN" -> "en")
pub(super) fn iso_639_1(language: &str) -> &str {
    language.split(['-', '_']).next().unwrap_or(language)
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: SecretString, model: String) -> Result<Self> {
        Self::new(api_key, model, SttProvider::Whisper)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        Self::new(api_key, model, SttProvider::Deepgram)
    }

    fn new(api_key: SecretString, model: String, provider: SttProvider) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("{provider:?} API key required for STT")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Transcribe audio to text
    ///
    /// # Errors
    ///
    /// Returns error if the provider request fails
    pub async fn try_transcribe(&self, audio: &[u8], language: &str) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio, language).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio, language).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8], language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let format = sniff_audio_format(audio);
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name(format.file_name())
                    .mime_str(format.mime())
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", iso_639_1(language).to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8], language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true&language={language}",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", sniff_audio_format(audio).mime())
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &[u8], language: &str) -> String {
        match self.try_transcribe(audio, language).await {
            Ok(text) => {
                let text = text.trim().to_string();
                tracing::info!(transcript = %text, "transcription complete");
                text
            }
            Err(e) => {
                tracing::error!(error = %e, provider = ?self.provider, "transcription failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_containers() {
        assert_eq!(sniff_audio_format(b"RIFF\0\0\0\0WAVE"), AudioFormat::Wav);
        assert_eq!(
            sniff_audio_format(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]),
            AudioFormat::Webm
        );
        assert_eq!(sniff_audio_format(b"OggS\0"), AudioFormat::Ogg);
        assert_eq!(sniff_audio_format(b"ID3\x04"), AudioFormat::Mp3);
        assert_eq!(sniff_audio_format(&[0xFF, 0xFB, 0x90]), AudioFormat::Mp3);
    }

    #[test]
    fn unknown_audio_defaults_to_webm() {
        assert_eq!(sniff_audio_format(b"xyz"), AudioFormat::Webm);
        assert_eq!(sniff_audio_format(&[]), AudioFormat::Webm);
    }

    #[test]
    fn language_tag_reduces_to_primary_subtag() {
        assert_eq!(iso_639_1("en-IN"), "en");
        assert_eq!(iso_639_1("hi_IN"), "hi");
        assert_eq!(iso_639_1("fr"), "fr");
    }

    #[test]
    fn empty_key_is_rejected() {
        let result = SpeechToText::new_whisper(SecretString::from(String::new()), "whisper-1".into());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
