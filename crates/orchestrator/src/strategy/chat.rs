use async_trait::async_trait;
use parley_core::Result;
use parley_core::message::{Message, Role};
use parley_core::operation::{ModelParameters, OperationInput};

use super::{Strategy, StrategyPayload};

pub(super) const NAME: &str = "chat";

const SYSTEM_PROMPT: &str = "You are Parley, an expert technical support assistant.

When a user first describes a problem:
1. Ask for the device make and model (e.g. \"HP LaserJet Pro M404\", \"iPhone 14 Pro\", \"Dell XPS 15\")
2. Ask for the operating system or firmware version if relevant
3. Ask specific clarifying questions about the issue

Provide solutions in this order:
1. Quick fixes and common solutions
2. Diagnostic steps the user can perform
3. Advanced troubleshooting
4. When to seek professional help

Be friendly, clear, and patient. Use simple language and step-by-step instructions.";

/// General conversational turn.
///
/// The support prompt is prepended unless the conversation already starts
/// with its own system message.
pub struct ChatStrategy {
    system_prompt: String,
}

impl ChatStrategy {
    pub fn new() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.into(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        if let Some(prompt) = prompt {
            self.system_prompt = prompt;
        }
        self
    }
}

impl Default for ChatStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for ChatStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn defaults(&self) -> ModelParameters {
        ModelParameters::new(0.7, 1000)
    }

    async fn build_payload(&self, context: &[Message], _input: &OperationInput) -> Result<StrategyPayload> {
        let mut messages = Vec::with_capacity(context.len() + 1);
        if context.first().is_none_or(|m| m.role != Role::System) {
            messages.push(Message::system(&self.system_prompt));
        }
        messages.extend(context.iter().cloned());

        Ok(StrategyPayload {
            messages,
            parameters: self.defaults(),
            metadata: serde_json::Map::new(),
        })
    }
}
