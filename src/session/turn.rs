//! One processing turn: transcribe, respond, synthesize, stream

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, watch};

use super::envelope::{ErrorKind, STATUS_NO_SPEECH, STATUS_READY, decode_audio_payload};
use super::outbound::Outbound;
use super::{SessionId, SessionState};
use crate::agent::History;
use crate::pipeline::Pipeline;

/// Input that starts a turn
#[derive(Debug)]
pub(super) enum TurnInput {
    /// Base64 payload from an `audio_data` envelope
    Encoded(String),
    /// Raw binary frame
    Raw(Vec<u8>),
    Text(String),
}

/// Move to `next` unless the session is already closing
fn enter(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if *current == SessionState::Closing || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Clears the single-flight flag when the turn ends, however it ends
pub(super) struct TurnGuard {
    pub(super) in_flight: Arc<AtomicBool>,
    pub(super) state: Arc<watch::Sender<SessionState>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.state.send_if_modified(|current| {
            self.in_flight.store(false, Ordering::SeqCst);
            if matches!(current, SessionState::Idle | SessionState::Closing) {
                return false;
            }
            *current = SessionState::Idle;
            true
        });
    }
}

pub(super) struct Turn {
    pub(super) session_id: SessionId,
    pub(super) language: String,
    pub(super) outbound: Outbound,
    pub(super) pipeline: Arc<Pipeline>,
    pub(super) state: Arc<watch::Sender<SessionState>>,
    pub(super) history: Arc<Mutex<History>>,
}

impl Turn {
    pub(super) async fn run(self, input: TurnInput) {
        let started = Instant::now();

        match self.execute(input).await {
            Ok(()) => tracing::info!(
                session_id = %self.session_id,
                elapsed_ms = started.elapsed().as_millis(),
                "turn complete"
            ),
            Err(TurnEnd::NoSpeech) => {
                tracing::debug!(session_id = %self.session_id, "turn ended without speech");
            }
            Err(TurnEnd::Failed(kind)) => tracing::debug!(
                session_id = %self.session_id,
                ?kind,
                elapsed_ms = started.elapsed().as_millis(),
                "turn failed"
            ),
        }
    }

    async fn execute(&self, input: TurnInput) -> Result<(), TurnEnd> {
        let text = match input {
            TurnInput::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(self.fail(ErrorKind::EmptyInput, "Empty text input").await);
                }
                text.to_string()
            }
            TurnInput::Encoded(payload) => {
                let audio = match decode_audio_payload(&payload) {
                    Ok(audio) => audio,
                    Err(e) => {
                        return Err(self
                            .fail(ErrorKind::DecodeError, format!("Invalid audio data: {e}"))
                            .await);
                    }
                };
                self.transcribe(audio).await?
            }
            TurnInput::Raw(audio) => {
                if audio.is_empty() {
                    return Err(self.fail(ErrorKind::DecodeError, "Empty audio frame").await);
                }
                self.transcribe(audio).await?
            }
        };

        let reply = self.respond(&text).await?;
        self.speak(&reply).await
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, TurnEnd> {
        enter(&self.state, SessionState::Processing);
        tracing::debug!(
            session_id = %self.session_id,
            audio_bytes = audio.len(),
            "transcribing"
        );

        let text = self
            .pipeline
            .transcriber
            .transcribe(&audio, &self.language)
            .await;
        let text = text.trim();

        if text.is_empty() {
            let _ = self.outbound.status(STATUS_NO_SPEECH).await;
            return Err(TurnEnd::NoSpeech);
        }

        tracing::info!(session_id = %self.session_id, transcript = %text, "user said");
        Ok(text.to_string())
    }

    async fn respond(&self, text: &str) -> Result<String, TurnEnd> {
        enter(&self.state, SessionState::Responding);
        let context = self.history.lock().await.snapshot();

        let reply = match self.pipeline.responder.reply(&context, text).await {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "assistant failed");
                return Err(self
                    .fail(ErrorKind::AssistantError, format!("Error getting response: {e}"))
                    .await);
            }
        };

        if reply.is_empty() {
            return Err(self
                .fail(ErrorKind::AssistantError, "Assistant returned an empty reply")
                .await);
        }

        self.history.lock().await.record(text, &reply);
        let _ = self.outbound.response(reply.clone()).await;
        Ok(reply)
    }

    async fn speak(&self, reply: &str) -> Result<(), TurnEnd> {
        enter(&self.state, SessionState::SynthesizingSpeech);

        let audio = match self.pipeline.synthesizer.synthesize(reply, &self.language).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "synthesis failed");
                return Err(self
                    .fail(ErrorKind::SynthesisError, format!("Error generating audio: {e}"))
                    .await);
            }
        };

        enter(&self.state, SessionState::Streaming);
        tracing::debug!(session_id = %self.session_id, audio_bytes = audio.len(), "streaming reply");
        let _ = self.outbound.audio(audio).await;
        let _ = self.outbound.status(STATUS_READY).await;
        Ok(())
    }

    async fn fail(&self, kind: ErrorKind, message: impl Into<String>) -> TurnEnd {
        let _ = self.outbound.error(kind, message).await;
        TurnEnd::Failed(kind)
    }
}

/// Why a turn stopped before streaming
#[derive(Debug, Clone, Copy)]
enum TurnEnd {
    NoSpeech,
    Failed(ErrorKind),
}
