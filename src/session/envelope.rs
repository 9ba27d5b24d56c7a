//! Wire envelopes exchanged with voice clients

use axum::body::Bytes;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status sent once a connection is accepted
pub const STATUS_CONNECTED: &str = "Connected";

/// Status sent after a transcript came back empty
pub const STATUS_NO_SPEECH: &str = "No speech detected. Please try again.";

/// Status sent after the reply audio has been streamed
pub const STATUS_READY: &str = "Ready for next input";

/// Best-effort notification before the server closes a session
pub const STATUS_CLOSING: &str = "Session closing";

/// Structured message sent by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Base64 audio, optionally prefixed by a data URI header
    AudioData { audio_data: String },
    /// Text that skips transcription
    TextData { text: String },
}

/// Structured message sent to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Progress or lifecycle notice
    Status { message: String },
    /// A turn failed
    Error { kind: ErrorKind, message: String },
    /// Assistant reply text
    Response { message: String },
}

/// Error taxonomy reported to clients and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or empty inbound payload
    DecodeError,
    /// No usable text in the input
    EmptyInput,
    /// The conversational backend failed
    AssistantError,
    /// Speech generation failed
    SynthesisError,
    /// Send attempted on a dead connection (logged only)
    TransportClosed,
    /// Capture resource failed to (re)initialize
    CaptureExhausted,
}

/// One decoded inbound frame
#[derive(Debug, Clone)]
pub enum Inbound {
    /// `audio_data` envelope with its still-encoded payload
    Audio(String),
    /// Raw binary audio frame
    AudioFrame(Bytes),
    /// `text_data` envelope
    Text(String),
    /// Text frame that is not a valid client envelope
    Malformed(String),
}

impl Inbound {
    /// Parse a text frame into an inbound message
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<ClientEnvelope>(text) {
            Ok(ClientEnvelope::AudioData { audio_data }) => Self::Audio(audio_data),
            Ok(ClientEnvelope::TextData { text }) => Self::Text(text),
            Err(e) => Self::Malformed(e.to_string()),
        }
    }
}

/// Reasons an audio payload cannot be used
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("empty audio payload")]
    Empty,

    #[error("malformed base64 audio: {0}")]
    Malformed(#[from] base64::DecodeError),
}

/// Decode a base64 audio payload, stripping any data URI header
///
/// # Errors
///
/// Returns error if the payload is empty or not valid base64
pub fn decode_audio_payload(payload: &str) -> Result<Vec<u8>, PayloadError> {
    let encoded = payload
        .split_once(',')
        .map_or(payload, |(_, data)| data)
        .trim();

    if encoded.is_empty() {
        return Err(PayloadError::Empty);
    }

    let audio = BASE64.decode(encoded)?;
    if audio.is_empty() {
        return Err(PayloadError::Empty);
    }

    Ok(audio)
}
