//! OpenAI-compatible chat completions responder

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatTurn, Responder, Role};
use crate::config::AssistantConfig;
use crate::{Error, Result};

/// Responder backed by a `/chat/completions` endpoint
pub struct ChatResponder {
    client: Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl ChatResponder {
    /// Create a responder from the assistant configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, config: &AssistantConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("assistant API key required".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
        })
    }

    fn build_messages<'a>(&'a self, history: &'a [ChatTurn], text: &'a str) -> Vec<Message<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message {
            role: "system",
            content: &self.system_prompt,
        });
        messages.extend(history.iter().map(|turn| Message {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &turn.content,
        }));
        messages.push(Message {
            role: "user",
            content: text,
        });
        messages
    }
}

#[async_trait]
impl Responder for ChatResponder {
    async fn reply(&self, history: &[ChatTurn], text: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: self.build_messages(history, text),
            temperature: self.temperature,
        };

        tracing::debug!(
            model = %self.model,
            history = history.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Assistant(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Assistant(format!("API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Assistant(format!("failed to parse response: {e}")))?;

        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(Error::Assistant("empty reply".to_string()));
        }
        Ok(reply)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
