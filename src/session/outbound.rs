//! Best-effort frame delivery to a connected client

use tokio::sync::mpsc;

use super::envelope::{ErrorKind, ServerEnvelope};

/// One frame queued for the connection writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Envelope(ServerEnvelope),
    /// Raw synthesized speech
    Audio(Vec<u8>),
    /// Graceful close handshake
    Close { reason: String },
}

/// Outcome of a best-effort send
#[must_use = "delivery can be ignored explicitly with `let _ =`"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The writer is gone; the frame was dropped
    TransportClosed,
}

impl Delivery {
    #[must_use]
    pub const fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Sending half of a session's frame queue
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundFrame>,
}

impl Outbound {
    /// Create a bounded frame queue
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame, swallowing a closed transport
    pub async fn send(&self, frame: OutboundFrame) -> Delivery {
        match self.tx.send(frame).await {
            Ok(()) => Delivery::Sent,
            Err(_) => {
                tracing::debug!(kind = ?ErrorKind::TransportClosed, "dropping frame for closed transport");
                Delivery::TransportClosed
            }
        }
    }

    pub async fn status(&self, message: impl Into<String>) -> Delivery {
        self.send(OutboundFrame::Envelope(ServerEnvelope::Status {
            message: message.into(),
        }))
        .await
    }

    pub async fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Delivery {
        self.send(OutboundFrame::Envelope(ServerEnvelope::Error {
            kind,
            message: message.into(),
        }))
        .await
    }

    pub async fn response(&self, message: impl Into<String>) -> Delivery {
        self.send(OutboundFrame::Envelope(ServerEnvelope::Response {
            message: message.into(),
        }))
        .await
    }

    pub async fn audio(&self, audio: Vec<u8>) -> Delivery {
        self.send(OutboundFrame::Audio(audio)).await
    }

    pub async fn close(&self, reason: impl Into<String>) -> Delivery {
        self.send(OutboundFrame::Close {
            reason: reason.into(),
        })
        .await
    }

    /// Whether the writer has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reaches_receiver() {
        let (outbound, mut rx) = Outbound::channel(4);
        assert_eq!(outbound.status("hi").await, Delivery::Sent);

        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame,
            OutboundFrame::Envelope(ServerEnvelope::Status {
                message: "hi".to_string()
            })
        );
    }

    #[tokio::test]
    async fn send_after_close_is_swallowed() {
        let (outbound, rx) = Outbound::channel(4);
        drop(rx);

        assert!(outbound.is_closed());
        assert_eq!(outbound.audio(vec![1, 2, 3]).await, Delivery::TransportClosed);
        assert_eq!(
            outbound.error(ErrorKind::DecodeError, "bad").await,
            Delivery::TransportClosed
        );
    }
}
