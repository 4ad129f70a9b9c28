//! Test doubles shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::services::llm_client::{ChatMessage, ChatModel, LlmError};

/// A recorded `complete` call.
#[derive(Debug, Clone)]
pub struct StubCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

enum Behaviour {
    /// Replies handed out in order; the last one repeats.
    Replies(VecDeque<String>),
    Fail,
    Panic,
}

/// Scripted [`ChatModel`]. Replies are chosen by matching a needle against
/// the system prompt, so each agent persona can be scripted separately.
#[derive(Default)]
pub struct StubModel {
    rules: Mutex<Vec<(String, Behaviour)>>,
    fallback: Option<String>,
    failing: bool,
    calls: Mutex<Vec<StubCall>>,
}

impl StubModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `reply` whenever the system prompt contains `needle`.
    pub fn reply(self, needle: &str, reply: &str) -> Self {
        self.sequence(needle, vec![reply])
    }

    /// Answer with `replies` in turn; the last one repeats.
    pub fn sequence(self, needle: &str, replies: Vec<&str>) -> Self {
        let replies = replies.into_iter().map(str::to_string).collect();
        self.rules
            .lock()
            .push((needle.to_string(), Behaviour::Replies(replies)));
        self
    }

    /// Fail every call whose system prompt contains `needle`.
    pub fn fail_on(self, needle: &str) -> Self {
        self.rules.lock().push((needle.to_string(), Behaviour::Fail));
        self
    }

    /// Panic inside every call whose system prompt contains `needle`.
    pub fn panic_on(self, needle: &str) -> Self {
        self.rules.lock().push((needle.to_string(), Behaviour::Panic));
        self
    }

    /// Reply for calls no rule matches.
    pub fn fallback(mut self, reply: &str) -> Self {
        self.fallback = Some(reply.to_string());
        self
    }

    /// Fail every call.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatModel for StubModel {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.lock().push(StubCall {
            model: model.to_string(),
            messages: messages.to_vec(),
        });

        if self.failing {
            return Err(LlmError::Unavailable("stub offline".to_string()));
        }

        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let mut rules = self.rules.lock();
        if let Some((_, behaviour)) = rules.iter_mut().find(|(needle, _)| system.contains(needle.as_str())) {
            return match behaviour {
                Behaviour::Fail => Err(LlmError::Unavailable("stub offline".to_string())),
                Behaviour::Panic => panic!("stub model crashed"),
                Behaviour::Replies(replies) if replies.len() > 1 => {
                    Ok(replies.pop_front().unwrap_or_default())
                }
                Behaviour::Replies(replies) => Ok(replies.front().cloned().unwrap_or_default()),
            };
        }

        self.fallback
            .clone()
            .ok_or_else(|| LlmError::InvalidResponse("no scripted reply".to_string()))
    }
}

/// Signed HS256 session token for `user_id`.
pub fn session_token(secret: &str, issuer: Option<&str>, user_id: &str, ttl_seconds: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = crate::auth::Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl_seconds,
        iss: issuer.map(str::to_string),
        email: Some("bids@acme.in".to_string()),
        role: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
