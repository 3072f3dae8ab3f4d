use async_trait::async_trait;
use parley_core::Result;
use parley_core::message::Message;
use parley_core::operation::{ModelParameters, OperationInput};
use serde_json::json;

use super::{Strategy, StrategyPayload, assemble, split_turn};

pub(super) const NAME: &str = "code_assistant";

const SYSTEM_PROMPT: &str =
    "You are an expert programming assistant. Provide clear, accurate code help with explanations.";

/// Programming help at a low temperature.
///
/// Input attributes: `code` (snippet appended as a fenced block) and
/// `language` (fence tag).
pub struct CodeAssistantStrategy {
    system_prompt: String,
}

impl CodeAssistantStrategy {
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

impl Default for CodeAssistantStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for CodeAssistantStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn defaults(&self) -> ModelParameters {
        ModelParameters::new(0.2, 1500)
    }

    async fn build_payload(&self, context: &[Message], input: &OperationInput) -> Result<StrategyPayload> {
        let language = input.attribute_str("language");
        let content = match input.attribute_str("code") {
            Some(code) => format!(
                "{}\n\nCode context:\n```{}\n{}\n```",
                input.text,
                language.unwrap_or_default(),
                code
            ),
            None => input.text.clone(),
        };

        let (history, _) = split_turn(context);
        let messages = assemble(&self.system_prompt, history, Message::user(content));

        let mut metadata = serde_json::Map::new();
        if let Some(language) = language {
            metadata.insert("language".into(), json!(language));
        }

        Ok(StrategyPayload {
            messages,
            parameters: self.defaults(),
            metadata,
        })
    }
}
