use async_trait::async_trait;
use parley_core::Result;
use parley_core::error::Error;
use parley_core::message::Message;
use parley_core::operation::{ModelParameters, OperationInput};
use serde_json::json;

use super::{Strategy, StrategyPayload, assemble, split_turn};

pub(super) const NAME: &str = "image_analysis";

const SYSTEM_PROMPT: &str = "You are a visual technical support assistant. Describe what the image shows, \
identify the device, parts, error messages or indicator lights visible, and explain what they mean.";

const DEFAULT_PROMPT: &str = "Describe this image in detail";

/// Descriptive analysis of an attached image.
pub struct ImageAnalysisStrategy {
    system_prompt: String,
}

impl ImageAnalysisStrategy {
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

impl Default for ImageAnalysisStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for ImageAnalysisStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn defaults(&self) -> ModelParameters {
        ModelParameters::new(0.4, 500)
    }

    async fn build_payload(&self, context: &[Message], input: &OperationInput) -> Result<StrategyPayload> {
        let image_url = input
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::InvalidInput("image_analysis requires an image reference".into()))?;

        let prompt = match input.text.trim() {
            "" => DEFAULT_PROMPT,
            text => text,
        };

        let (history, _) = split_turn(context);
        let messages = assemble(&self.system_prompt, history, Message::user(prompt).with_image(image_url));

        let mut metadata = serde_json::Map::new();
        metadata.insert("image_url".into(), json!(image_url));

        Ok(StrategyPayload {
            messages,
            parameters: self.defaults(),
            metadata,
        })
    }
}
