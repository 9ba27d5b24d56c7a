//! Per-connection voice session
//!
//! A [`Session`] owns the protocol state machine for one client:
//!
//! ```text
//! Idle → Receiving → Processing → Responding → SynthesizingSpeech → Streaming → Idle
//!                               (any state → Closing)
//! ```
//!
//! At most one turn runs at a time. Input that arrives while a turn is in
//! flight is dropped without a reply.

pub mod envelope;
pub mod outbound;
pub mod registry;
mod turn;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent::{ChatTurn, History};
use crate::pipeline::Pipeline;

pub use envelope::{
    ClientEnvelope, ErrorKind, Inbound, PayloadError, STATUS_CLOSING, STATUS_CONNECTED,
    STATUS_NO_SPEECH, STATUS_READY, ServerEnvelope, decode_audio_payload,
};
pub use outbound::{Delivery, Outbound, OutboundFrame};
pub use registry::{ConnectionRegistry, RegisteredSession, SharedRegistry};

use turn::{Turn, TurnGuard, TurnInput};

/// Unique session identifier
pub type SessionId = Uuid;

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Receiving,
    Processing,
    Responding,
    SynthesizingSpeech,
    Streaming,
    /// Terminal
    Closing,
}

/// What happened to an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A new turn was started
    Started,
    /// A turn was already in flight
    Dropped,
    /// Rejected before a turn could start
    Rejected(ErrorKind),
    /// The session is closing
    Ignored,
}

/// Settings shared by every session a server creates
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Language used when the client does not pick one
    pub language: String,
    /// Conversation turns kept per session
    pub max_history: usize,
}

/// One client connection's protocol state
pub struct Session {
    id: SessionId,
    language: String,
    outbound: Outbound,
    pipeline: Arc<Pipeline>,
    state: Arc<watch::Sender<SessionState>>,
    in_flight: Arc<AtomicBool>,
    history: Arc<Mutex<History>>,
    turn: Option<JoinHandle<()>>,
}

impl Session {
    #[must_use]
    pub fn new(
        language: String,
        outbound: Outbound,
        pipeline: Arc<Pipeline>,
        max_history: usize,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id: Uuid::new_v4(),
            language,
            outbound,
            pipeline,
            state: Arc::new(state),
            in_flight: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(History::new(max_history))),
            turn: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Conversation so far, oldest first
    pub async fn history(&self) -> Vec<ChatTurn> {
        self.history.lock().await.snapshot()
    }

    /// Tell the client the session is ready
    pub async fn announce(&self) -> Delivery {
        self.outbound.status(STATUS_CONNECTED).await
    }

    /// Handle one inbound message
    pub async fn dispatch(&mut self, inbound: Inbound) -> Dispatch {
        if self.state() == SessionState::Closing {
            tracing::trace!(session_id = %self.id, "ignoring input while closing");
            return Dispatch::Ignored;
        }

        let input = match inbound {
            Inbound::Audio(payload) => TurnInput::Encoded(payload),
            Inbound::AudioFrame(frame) => TurnInput::Raw(frame.to_vec()),
            Inbound::Text(text) => TurnInput::Text(text),
            Inbound::Malformed(reason) => {
                tracing::debug!(session_id = %self.id, reason = %reason, "malformed message");
                let _ = self
                    .outbound
                    .error(ErrorKind::DecodeError, format!("Invalid message: {reason}"))
                    .await;
                return Dispatch::Rejected(ErrorKind::DecodeError);
            }
        };

        self.start_turn(input)
    }

    fn start_turn(&mut self, input: TurnInput) -> Dispatch {
        // Flag and state move together under the state lock
        let mut acquired = false;
        self.state.send_if_modified(|current| {
            if *current == SessionState::Closing
                || self
                    .in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                return false;
            }
            acquired = true;
            *current = SessionState::Receiving;
            true
        });
        if !acquired {
            tracing::debug!(session_id = %self.id, "turn in flight, dropping input");
            return Dispatch::Dropped;
        }

        let guard = TurnGuard {
            in_flight: Arc::clone(&self.in_flight),
            state: Arc::clone(&self.state),
        };
        let turn = Turn {
            session_id: self.id,
            language: self.language.clone(),
            outbound: self.outbound.clone(),
            pipeline: Arc::clone(&self.pipeline),
            state: Arc::clone(&self.state),
            history: Arc::clone(&self.history),
        };

        self.turn = Some(tokio::spawn(async move {
            let _guard = guard;
            turn.run(input).await;
        }));
        Dispatch::Started
    }

    /// Resolve once no turn is running (or the session is closing)
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, SessionState::Idle | SessionState::Closing))
            .await;
    }

    /// Enter `Closing`, stop any running turn and say goodbye
    ///
    /// Calling this more than once is a no-op.
    pub async fn close(&mut self) {
        let entered = self.state.send_if_modified(|s| {
            if *s == SessionState::Closing {
                return false;
            }
            *s = SessionState::Closing;
            true
        });
        if !entered {
            return;
        }

        if let Some(turn) = self.turn.take() {
            turn.abort();
        }

        let _ = self.outbound.status(STATUS_CLOSING).await;
        let _ = self.outbound.close("session closed").await;
        tracing::info!(session_id = %self.id, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.abort();
        }
    }
}
