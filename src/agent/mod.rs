//! Conversational backend
//!
//! The [`Responder`] turns user text into a reply, given the turns of the
//! session so far. [`History`] keeps those turns in memory for one session.

mod chat;

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use chat::ChatResponder;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a session's conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Produces a conversational reply
#[async_trait]
pub trait Responder: Send + Sync {
    /// Reply to `text`, with `history` as prior context (oldest first)
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn reply(&self, history: &[ChatTurn], text: &str) -> Result<String>;

    /// Whether a real backend is configured
    fn is_available(&self) -> bool {
        true
    }
}

/// Bounded conversation history, dropped with its session
#[derive(Debug, Clone)]
pub struct History {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl History {
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns.min(64)),
            max_turns,
        }
    }

    /// Record a user/assistant exchange, evicting the oldest turns past the bound
    pub fn record(&mut self, user: &str, assistant: &str) {
        self.push(ChatTurn::user(user));
        self.push(ChatTurn::assistant(assistant));
    }

    fn push(&mut self, turn: ChatTurn) {
        if self.max_turns == 0 {
            return;
        }
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Turns oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
