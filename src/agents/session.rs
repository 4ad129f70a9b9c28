use crate::services::llm_client::{ChatMessage, ChatModel, LlmError};

/// Conversation with one agent persona.
///
/// Keeps the system prompt and every exchange so follow-up prompts
/// (self-correction) are answered with the earlier turns in view.
pub struct ChatSession<'a> {
    model: &'a dyn ChatModel,
    model_name: String,
    messages: Vec<ChatMessage>,
}

impl<'a> ChatSession<'a> {
    pub fn new(model: &'a dyn ChatModel, model_name: impl Into<String>, system_prompt: &str) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub async fn send(&mut self, text: impl Into<String>) -> Result<String, LlmError> {
        self.messages.push(ChatMessage::user(text));

        match self.model.complete(&self.model_name, &self.messages).await {
            Ok(reply) => {
                self.messages.push(ChatMessage::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                // Drop the unanswered prompt so the history stays paired
                self.messages.pop();
                Err(e)
            }
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}
