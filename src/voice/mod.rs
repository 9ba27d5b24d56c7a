//! Voice processing module
//!
//! Speech-to-text and text-to-speech backends, the hands-free capture
//! watchdog and the barge-in aware playback controller. Local microphone
//! and speaker devices live behind the `local-audio` feature.

mod capture;
mod playback;
mod stt;
mod tts;

#[cfg(feature = "local-audio")]
mod mic;
#[cfg(feature = "local-audio")]
mod speaker;

use async_trait::async_trait;

use crate::Result;

pub use capture::{
    CaptureFactory, CaptureOutcome, CaptureResource, CaptureSession, CaptureWatchdog, Health,
    MAX_CAPTURE_ATTEMPTS,
};
pub use playback::{
    ActivePlayback, AudioSink, PlaybackController, PlaybackEvent, PlaybackItem, SilentProbe,
    SpeechProbe, SpeechSignal,
};
pub use stt::{AudioFormat, SpeechToText, sniff_audio_format};
pub use tts::TextToSpeech;

#[cfg(feature = "local-audio")]
pub use mic::{MicCapture, MicFactory, SAMPLE_RATE, samples_to_wav};
#[cfg(feature = "local-audio")]
pub use speaker::CpalSink;

/// Turns recorded audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio in the given language
    ///
    /// Failures are logged and reported as an empty transcript.
    async fn transcribe(&self, audio: &[u8], language: &str) -> String;

    /// Whether a real backend is configured
    fn is_available(&self) -> bool {
        true
    }
}

/// Turns reply text into encoded speech audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize speech for `text`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or produces no audio
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;

    /// Whether a real backend is configured
    fn is_available(&self) -> bool {
        true
    }
}
