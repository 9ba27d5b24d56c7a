//! Transcribe, respond and synthesize collaborators shared by all sessions

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{ChatResponder, ChatTurn, Responder};
use crate::config::{Config, SttProvider, TtsProvider};
use crate::voice::{SpeechToText, Synthesizer, TextToSpeech, Transcriber};
use crate::{Error, Result};

/// The three collaborators a turn runs through
#[derive(Clone)]
pub struct Pipeline {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            responder,
            synthesizer,
        }
    }

    /// Build providers from configuration
    ///
    /// A missing API key leaves that stage unconfigured instead of failing,
    /// so the server still starts and those turns report errors.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            build_transcriber(config),
            build_responder(config),
            build_synthesizer(config),
        )
    }

    /// Names of stages that have no real backend
    #[must_use]
    pub fn unavailable(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.transcriber.is_available() {
            missing.push("transcriber");
        }
        if !self.responder.is_available() {
            missing.push("responder");
        }
        if !self.synthesizer.is_available() {
            missing.push("synthesizer");
        }
        missing
    }
}

fn build_transcriber(config: &Config) -> Arc<dyn Transcriber> {
    let voice = &config.voice;
    let built = match voice.stt_provider {
        SttProvider::Whisper => config
            .api_keys
            .openai
            .clone()
            .map(|key| SpeechToText::new_whisper(key, voice.stt_model.clone())),
        SttProvider::Deepgram => config
            .api_keys
            .deepgram
            .clone()
            .map(|key| SpeechToText::new_deepgram(key, voice.stt_model.clone())),
    };

    match built {
        Some(Ok(stt)) => Arc::new(stt),
        Some(Err(e)) => Arc::new(Unconfigured::new("transcriber", &e.to_string())),
        None => Arc::new(Unconfigured::new("transcriber", "no STT API key")),
    }
}

fn build_synthesizer(config: &Config) -> Arc<dyn Synthesizer> {
    let voice = &config.voice;
    let built = match voice.tts_provider {
        TtsProvider::OpenAI => config.api_keys.openai.clone().map(|key| {
            TextToSpeech::new_openai(
                key,
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            )
        }),
        TtsProvider::ElevenLabs => config.api_keys.elevenlabs.clone().map(|key| {
            TextToSpeech::new_elevenlabs(key, voice.tts_voice.clone(), voice.tts_model.clone())
        }),
    };

    match built {
        Some(Ok(tts)) => Arc::new(tts),
        Some(Err(e)) => Arc::new(Unconfigured::new("synthesizer", &e.to_string())),
        None => Arc::new(Unconfigured::new("synthesizer", "no TTS API key")),
    }
}

fn build_responder(config: &Config) -> Arc<dyn Responder> {
    // A dedicated assistant key wins over the shared OpenAI key
    let key = config
        .api_keys
        .assistant
        .clone()
        .or_else(|| config.api_keys.openai.clone());

    match key.map(|key| ChatResponder::new(key, &config.assistant)) {
        Some(Ok(responder)) => Arc::new(responder),
        Some(Err(e)) => Arc::new(Unconfigured::new("responder", &e.to_string())),
        None => Arc::new(Unconfigured::new("responder", "no assistant API key")),
    }
}

/// Placeholder for a stage without credentials
pub struct Unconfigured {
    stage: &'static str,
}

impl Unconfigured {
    fn new(stage: &'static str, reason: &str) -> Self {
        tracing::warn!(stage, reason, "stage unavailable");
        Self { stage }
    }

    fn error(&self) -> Error {
        Error::Config(format!("{} is not configured", self.stage))
    }
}

#[async_trait]
impl Transcriber for Unconfigured {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> String {
        tracing::warn!(stage = self.stage, "transcription requested but not configured");
        String::new()
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[async_trait]
impl Responder for Unconfigured {
    async fn reply(&self, _history: &[ChatTurn], _text: &str) -> Result<String> {
        Err(self.error())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[async_trait]
impl Synthesizer for Unconfigured {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        Err(self.error())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParleyConfigFile;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::resolve(ParleyConfigFile::default(), |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn missing_keys_leave_stages_unconfigured() {
        let pipeline = Pipeline::from_config(&config(&[]));
        assert_eq!(
            pipeline.unavailable(),
            ["transcriber", "responder", "synthesizer"]
        );
    }

    #[test]
    fn openai_key_configures_default_stages() {
        let pipeline = Pipeline::from_config(&config(&[("OPENAI_API_KEY", "sk-test")]));
        assert!(pipeline.unavailable().is_empty());
    }

    #[test]
    fn deepgram_without_key_is_unconfigured() {
        let pipeline = Pipeline::from_config(&config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PARLEY_STT_PROVIDER", "deepgram"),
        ]));
        assert_eq!(pipeline.unavailable(), ["transcriber"]);
    }

    #[tokio::test]
    async fn unconfigured_stages_fail_softly() {
        let stage = Unconfigured { stage: "test" };
        assert_eq!(Transcriber::transcribe(&stage, b"audio", "en").await, "");
        assert!(Responder::reply(&stage, &[], "hi").await.is_err());
        assert!(Synthesizer::synthesize(&stage, "hi", "en").await.is_err());
    }
}
