//! Tracks live sessions for broadcast and shutdown

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::timeout;

use super::SessionId;
use super::envelope::STATUS_CLOSING;
use super::outbound::Outbound;

/// How long shutdown waits on one session's writer
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared registry handle
pub type SharedRegistry = Arc<ConnectionRegistry>;

/// What the registry keeps per session
#[derive(Debug, Clone)]
pub struct RegisteredSession {
    pub outbound: Outbound,
    pub language: String,
    pub connected_at: DateTime<Utc>,
}

/// Active sessions keyed by id; insert and remove only
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<SessionId, RegisteredSession>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: SessionId, outbound: Outbound, language: String) {
        let entry = RegisteredSession {
            outbound,
            language,
            connected_at: Utc::now(),
        };
        let count = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, entry);
            sessions.len()
        };
        tracing::debug!(session_id = %id, active = count, "session registered");
    }

    /// Remove a session; removing an unknown id is a no-op
    pub async fn remove(&self, id: &SessionId) -> Option<RegisteredSession> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session removed");
        }
        removed
    }

    pub async fn get(&self, id: &SessionId) -> Option<RegisteredSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Send a status message to every session, returning how many were reached
    pub async fn broadcast_status(&self, message: &str) -> usize {
        let targets: Vec<Outbound> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.outbound.clone())
            .collect();

        let mut delivered = 0;
        for outbound in targets {
            if outbound.status(message).await.is_sent() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Notify and close every session, emptying the registry
    pub async fn close_all(&self, reason: &str) -> usize {
        let drained: Vec<(SessionId, RegisteredSession)> =
            self.sessions.write().await.drain().collect();
        let count = drained.len();

        join_all(drained.into_iter().map(|(id, session)| async move {
            let farewell = async {
                let _ = session.outbound.status(STATUS_CLOSING).await;
                let _ = session.outbound.close(reason).await;
            };
            if timeout(CLOSE_TIMEOUT, farewell).await.is_err() {
                tracing::warn!(session_id = %id, "session writer stalled, skipping close");
            } else {
                tracing::debug!(session_id = %id, "session closed by server");
            }
        }))
        .await;

        if count > 0 {
            tracing::info!(sessions = count, reason, "closed all sessions");
        }
        count
    }
}
